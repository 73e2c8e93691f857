use minicmd::host::Responder;
use serenity::{
    builder::CreateMessage,
    http::Http,
    model::id::{ChannelId, UserId},
};

use crate::{
    prelude::*,
    util::{split_message, DebugShim},
};

/// Discord's per-message character limit
const MESSAGE_LIMIT: usize = 2000;

/// Answers a message in its channel, or privately to its author
#[derive(Debug)]
pub struct ChannelResponder {
    http: DebugShim<Arc<Http>>,
    channel: ChannelId,
    user: UserId,
}

impl ChannelResponder {
    pub fn new(http: &Arc<Http>, channel: ChannelId, user: UserId) -> Self {
        Self {
            http: Arc::clone(http).into(),
            channel,
            user,
        }
    }
}

#[async_trait]
impl Responder for ChannelResponder {
    async fn reply(&self, text: &str) -> Result {
        for piece in split_message(text, MESSAGE_LIMIT) {
            self.channel
                .say(&self.http.0, piece)
                .await
                .with_context(|| format!("Error sending message to {}", self.channel))?;
        }

        Ok(())
    }

    async fn tell(&self, text: &str) -> Result {
        for piece in split_message(text, MESSAGE_LIMIT) {
            self.user
                .direct_message(Arc::clone(&self.http.0), CreateMessage::new().content(piece))
                .await
                .with_context(|| format!("Error sending direct message to {}", self.user))?;
        }

        Ok(())
    }
}
