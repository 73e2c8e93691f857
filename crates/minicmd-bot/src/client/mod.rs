use serenity::{model::gateway::GatewayIntents, Client};

use crate::{prelude::*, util::DebugShim};

mod address;
mod commands;
mod handler;
mod responder;

#[derive(Debug, clap::Args)]
pub struct ClientOpts {
    /// The Discord API token to use
    #[arg(long, env)]
    discord_token: DebugShim<String>,

    #[command(flatten)]
    commands: commands::CommandOpts,
}

impl ClientOpts {
    pub fn snippet_concurrency(&self) -> std::num::NonZeroUsize {
        self.commands.snippet_concurrency()
    }
}

pub async fn build(opts: ClientOpts) -> Result<Client> {
    let ClientOpts {
        discord_token,
        commands,
    } = opts;

    let (plugin, editors) = commands.load().await?;

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;
    let handler = handler::Handler::new_rc(plugin, editors);

    Client::builder(discord_token.0, intents)
        .event_handler_arc(handler)
        .await
        .context("Error constructing Serenity client")
}
