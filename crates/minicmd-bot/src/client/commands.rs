use std::{num::NonZeroUsize, path::PathBuf, time::Duration};

use minicmd::{
    grammar::PLUGIN_NAME,
    host::EditorList,
    sandbox::{Limits, Sandbox},
    store::{FileStore, MemoryStore, RedisStore, Store},
    CommandPlugin,
};

use crate::{prelude::*, util::DebugShim};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum Backend {
    /// Keep commands in memory only; they are lost on restart
    Memory,
    /// One JSON file per key under --data-dir
    File,
    /// A Redis server at --redis-url
    Redis,
}

#[derive(Debug, clap::Args)]
pub struct CommandOpts {
    /// Where to persist user-defined commands
    #[arg(long, env, value_enum, default_value_t = Backend::File)]
    store: Backend,

    /// Directory for the file store
    #[arg(long, env, default_value = "data")]
    data_dir: PathBuf,

    /// Connection URL for the Redis store
    #[arg(long, env)]
    redis_url: Option<DebugShim<String>>,

    /// Comma-separated Discord user IDs allowed to add and delete commands
    #[arg(long, env, value_delimiter = ',')]
    command_editors: Vec<String>,

    /// Wall-clock limit for one command run, in milliseconds
    #[arg(long, env, default_value_t = 5000)]
    snippet_timeout_ms: u64,

    /// Operation budget for one command run, or 0 for none
    #[arg(long, env, default_value_t = 1_000_000)]
    snippet_max_operations: u64,

    /// Maximum number of messages one command run may send
    #[arg(long, env, default_value_t = 10)]
    snippet_max_replies: usize,

    /// Maximum number of command runs in flight at once
    #[arg(long, env, default_value = "4")]
    snippet_concurrency: NonZeroUsize,
}

impl CommandOpts {
    async fn open_store(&self) -> Result<Arc<dyn Store>> {
        let store: Arc<dyn Store> = match self.store {
            Backend::Memory => {
                warn!("Using the in-memory store, commands will not survive a restart");
                Arc::new(MemoryStore::new(PLUGIN_NAME))
            },
            Backend::File => {
                debug!(dir = ?self.data_dir, "Using the file store");
                Arc::new(FileStore::new(&self.data_dir, PLUGIN_NAME))
            },
            Backend::Redis => {
                let url = self
                    .redis_url
                    .as_ref()
                    .context("A Redis URL is required to use the Redis store")?;

                Arc::new(RedisStore::connect(&url.0, PLUGIN_NAME).await?)
            },
        };

        Ok(store)
    }

    fn sandbox(&self) -> Sandbox {
        Sandbox::new(Limits {
            timeout: Duration::from_millis(self.snippet_timeout_ms),
            max_operations: self.snippet_max_operations,
            max_replies: self.snippet_max_replies,
            ..Limits::default()
        })
    }

    pub fn snippet_concurrency(&self) -> NonZeroUsize { self.snippet_concurrency }

    pub async fn load(self) -> Result<(CommandPlugin, EditorList)> {
        let store = self.open_store().await?;
        let plugin = CommandPlugin::load(store, self.sandbox(), self.snippet_concurrency)
            .await
            .context("Error loading user commands")?;

        let editors = EditorList::new(self.command_editors);

        if editors.is_empty() {
            warn!("No command editors configured, nobody will be able to add or delete commands");
        }

        Ok((plugin, editors))
    }
}
