use std::sync::OnceLock;

use minicmd::{
    host::{EditorList, Incoming, Sender},
    CommandPlugin,
};
use serenity::{
    model::{channel::Message, gateway::Ready},
    prelude::*,
};

use super::{address::Identity, responder::ChannelResponder};
use crate::prelude::*;

#[derive(Debug)]
pub struct Handler {
    plugin: CommandPlugin,
    editors: EditorList,
    me: OnceLock<Identity>,
}

impl Handler {
    pub fn new_rc(plugin: CommandPlugin, editors: EditorList) -> Arc<Self> {
        Arc::new(Self {
            plugin,
            editors,
            me: OnceLock::new(),
        })
    }
}

#[instrument(skip(f))]
async fn handler(method: &'static str, f: impl Future<Output = Result<()>>) {
    match f.await {
        Ok(()) => (),
        Err(e) => error!("Error in {method}: {e:?}"),
    }
}

#[async_trait]
impl serenity::client::EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        handler("message", async move {
            if msg.author.bot {
                return Ok(());
            }

            let Some(me) = self.me.get() else {
                debug!("Ignoring message received before ready");
                return Ok(());
            };

            let (text, addressed) = match me.strip(&msg.content) {
                Some(rest) => (rest, true),
                None => (msg.content.as_str(), msg.guild_id.is_none()),
            };

            let incoming = Incoming {
                text: text.to_owned(),
                addressed,
                sender: Sender {
                    id: msg.author.id.to_string(),
                    nick: msg.author.name.clone(),
                },
            };
            let responder = Arc::new(ChannelResponder::new(
                &ctx.http,
                msg.channel_id,
                msg.author.id,
            ));

            if self
                .plugin
                .handle(&incoming, responder, &self.editors)
                .await
                .is_some()
            {
                trace!(sender = %msg.author.id, "Spawned command run");
            }

            Ok(())
        })
        .await;
    }

    async fn ready(&self, _: Context, ready: Ready) {
        let me = Identity {
            id: ready.user.id,
            name: ready.user.name.clone(),
        };

        info!(id = %me.id, name = %me.name, "Connected to Discord");

        if self.me.set(me).is_err() {
            debug!("Identity already known, keeping it");
        }
    }
}
