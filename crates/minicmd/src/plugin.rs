//! The command registry plugin

use std::num::NonZeroUsize;

use tokio::{
    sync::{RwLock, Semaphore},
    task::JoinHandle,
};

use crate::{
    grammar::{self, AdminCommand},
    host::{Authorizer, Incoming, Responder, Sender},
    prelude::*,
    sandbox::{Evaluation, Invocation, Sandbox, ScriptReply},
    store::Store,
    table::CommandTable,
};

/// The store key the command table is persisted under
pub const TABLE_KEY: &str = "commands";

const DONE: &str = "done";
const NOT_FOUND: &str = "Command does not exist.";
const NO_COMMANDS: &str = "No commands available.";
const SAVE_FAILED: &str = "Error saving commands, nothing was changed.";
const DENIED: &str = "You are not authorized to do that.";

const HELP: &str = "Create mini plugins in chat. 'command add <name> <code>' => Create command \
                    named <name> with the code <code>. 'command list' => Show a list of all \
                    known commands. 'command show <name>' => Show the source code for <name>. \
                    'command del <name>' => Delete command <name>.";
const HELP_ADD: &str = "Commands are little Rhai scripts. They can read args (the words after \
                        the command name), nick (who invoked them) and cmd (their own name), and \
                        call reply(text) or tell(text) to answer in the channel or privately. \
                        Example: 'command add greet reply(\"Hello \" + if args.is_empty() { nick \
                        } else { args[0] })'. Invoke the command just like a plugin: \
                        '<botnick>: greet'.";

/// Runtime-defined chat commands
///
/// Owns the command table, loading it once on construction and saving it
/// after every change.  Snippets run on the blocking pool, at most
/// `concurrency` at a time.
#[derive(Debug)]
pub struct CommandPlugin {
    table: RwLock<CommandTable>,
    store: Arc<dyn Store>,
    sandbox: Sandbox,
    permits: Arc<Semaphore>,
}

impl CommandPlugin {
    /// Load the command table from `store`
    ///
    /// # Errors
    /// Returns an error if the store can't be read or holds a malformed table.
    #[instrument(level = "info", skip(store, sandbox), fields(namespace = store.namespace()))]
    pub async fn load(
        store: Arc<dyn Store>,
        sandbox: Sandbox,
        concurrency: NonZeroUsize,
    ) -> Result<Self> {
        let table = match store
            .load(TABLE_KEY)
            .await
            .context("Error loading command table")?
        {
            Some(json) => CommandTable::from_json(&json)?,
            None => {
                debug!("No stored commands, starting empty");
                CommandTable::new()
            },
        };

        info!(count = table.len(), "Loaded commands");

        Ok(Self {
            table: RwLock::new(table),
            store,
            sandbox,
            permits: Arc::new(Semaphore::new(concurrency.get())),
        })
    }

    /// A copy of the current command table
    pub async fn snapshot(&self) -> CommandTable { self.table.read().await.clone() }

    /// Help text for the plugin, or for the `add` topic
    #[must_use]
    pub fn help(topic: Option<&str>) -> &'static str {
        match topic {
            Some("add") => HELP_ADD,
            _ => HELP,
        }
    }

    async fn update(
        &self,
        f: impl FnOnce(&mut CommandTable) -> Result<(), &'static str>,
    ) -> Vec<String> {
        let mut table = self.table.write().await;
        let mut next = table.clone();

        if let Err(msg) = f(&mut next) {
            return vec![msg.into()];
        }

        let saved = match next.to_json() {
            Ok(json) => self.store.save(TABLE_KEY, json).await,
            Err(e) => Err(e),
        };

        if let Err(e) = saved {
            error!("Error saving commands: {e:?}");
            return vec![SAVE_FAILED.into()];
        }

        *table = next;
        vec![DONE.into()]
    }

    /// Store `code` under `name`, replacing any existing command
    #[instrument(level = "debug", skip(self, code))]
    pub async fn add(&self, name: &str, code: &str) -> Vec<String> {
        self.update(|table| match table.insert(name, code) {
            Ok(prev) => {
                debug!(code, replaced = prev.is_some(), "Added command");
                Ok(())
            },
            Err(e) => {
                debug!(%e, "Refusing to add command");
                Err("Usage: command add <name> <code>")
            },
        })
        .await
    }

    /// Delete the command stored under `name`
    #[instrument(level = "debug", skip(self))]
    pub async fn delete(&self, name: &str) -> Vec<String> {
        if !self.table.read().await.contains(name) {
            return vec![NOT_FOUND.into()];
        }

        self.update(|table| table.remove(name).map(drop).map_err(|_| NOT_FOUND))
            .await
    }

    /// List every command name
    pub async fn list(&self) -> Vec<String> {
        let table = self.table.read().await;

        if table.is_empty() {
            return vec![NO_COMMANDS.into()];
        }

        vec![format!(
            "Available commands: {}",
            table.names().collect::<Vec<_>>().join(", ")
        )]
    }

    /// Show the source of the command stored under `name`
    pub async fn show(&self, name: &str) -> Vec<String> {
        match self.table.read().await.get(name) {
            Some(source) => vec![
                format!("Source code for command '{name}':"),
                source.to_owned(),
            ],
            None => vec![NOT_FOUND.into()],
        }
    }

    /// Run an administrative operation on behalf of `sender`
    #[instrument(level = "debug", skip(self, sender, auth), fields(sender = %sender.id))]
    pub async fn admin(
        &self,
        cmd: AdminCommand,
        sender: &Sender,
        auth: &dyn Authorizer,
    ) -> Vec<String> {
        if let Some(cap) = cmd.required_capability() {
            if !auth.permits(sender, cap) {
                warn!(%cap, "Sender lacks capability");
                return vec![DENIED.into()];
            }
        }

        match cmd {
            AdminCommand::Add { name, code } => self.add(&name, &code).await,
            AdminCommand::Del { name } => self.delete(&name).await,
            AdminCommand::List => self.list().await,
            AdminCommand::Show { name } => self.show(&name).await,
            AdminCommand::Help { topic } => vec![Self::help(topic.as_deref()).into()],
        }
    }

    /// Run the snippet named by an addressed message, if there is one
    ///
    /// The snippet runs on its own task; the returned handle may be dropped.
    /// Unaddressed messages and unknown names are ignored.
    pub async fn dispatch(
        &self,
        msg: &Incoming,
        responder: Arc<dyn Responder>,
    ) -> Option<JoinHandle<()>> {
        if !msg.addressed {
            return None;
        }

        let mut toks = msg.text.split_whitespace();
        let name = toks.next()?;
        let source = self.table.read().await.get(name)?.to_owned();

        let inv = Invocation {
            name: name.to_owned(),
            source,
            args: toks.map(ToOwned::to_owned).collect(),
            nick: msg.sender.nick.clone(),
        };
        let span = info_span!("snippet", name, sender = %msg.sender.id);

        Some(tokio::spawn(
            run_snippet(self.sandbox, Arc::clone(&self.permits), inv, responder).instrument(span),
        ))
    }

    /// Handle any inbound message
    ///
    /// Addressed administrative operations are answered directly; anything
    /// else is passed to [`dispatch`](Self::dispatch).
    pub async fn handle(
        &self,
        msg: &Incoming,
        responder: Arc<dyn Responder>,
        auth: &dyn Authorizer,
    ) -> Option<JoinHandle<()>> {
        let parsed = if msg.addressed {
            grammar::parse(&msg.text)
        } else {
            None
        };

        let Some(parsed) = parsed else {
            return self.dispatch(msg, responder).await;
        };

        let replies = match parsed {
            Ok(cmd) => self.admin(cmd, &msg.sender, auth).await,
            Err(e) => vec![e.to_string()],
        };

        for reply in replies {
            if let Err(e) = responder.reply(&reply).await {
                warn!("Error sending reply: {e:?}");
            }
        }

        None
    }
}

async fn run_snippet(
    sandbox: Sandbox,
    permits: Arc<Semaphore>,
    inv: Invocation,
    responder: Arc<dyn Responder>,
) {
    let Ok(permit) = permits.acquire_owned().await else {
        warn!("Snippet pool closed, dropping invocation");
        return;
    };

    let name = inv.name.clone();
    trace!(args = ?inv.args, "Running snippet");
    let Evaluation { replies, outcome } = sandbox.run(inv).await;
    drop(permit);

    for reply in replies {
        let res = match reply {
            ScriptReply::Channel(text) => responder.reply(&text).await,
            ScriptReply::Private(text) => responder.tell(&text).await,
        };

        if let Err(e) = res {
            warn!("Error delivering snippet output: {e:?}");
        }
    }

    if let Err(err) = outcome {
        debug!(%err, "Snippet failed");

        if let Err(e) = responder.reply(&format!("Command '{name}' failed.")).await {
            warn!("Error reporting snippet failure: {e:?}");
        }

        if let Err(e) = responder
            .tell(&format!("Backtrace for command '{name}': {err}"))
            .await
        {
            warn!("Error sending snippet backtrace: {e:?}");
        }
    }
}
