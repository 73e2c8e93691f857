use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use minicmd::{
    host::{AllowAll, EditorList, Incoming, Responder, Sender},
    sandbox::{Limits, Sandbox},
    store::{MemoryStore, Store},
    CommandPlugin,
};

#[derive(Debug, Default)]
struct Recorder {
    public: Mutex<Vec<String>>,
    private: Mutex<Vec<String>>,
}

impl Recorder {
    fn public(&self) -> Vec<String> { self.public.lock().unwrap().clone() }

    fn private(&self) -> Vec<String> { self.private.lock().unwrap().clone() }
}

#[async_trait]
impl Responder for Recorder {
    async fn reply(&self, text: &str) -> anyhow::Result<()> {
        self.public.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    async fn tell(&self, text: &str) -> anyhow::Result<()> {
        self.private.lock().unwrap().push(text.to_owned());
        Ok(())
    }
}

#[derive(Debug)]
struct BrokenStore;

#[async_trait]
impl Store for BrokenStore {
    fn namespace(&self) -> &str { "command" }

    async fn load(&self, _: &str) -> anyhow::Result<Option<String>> { Ok(None) }

    async fn save(&self, _: &str, _: String) -> anyhow::Result<()> {
        anyhow::bail!("disk on fire")
    }
}

fn one() -> NonZeroUsize { NonZeroUsize::new(1).unwrap() }

async fn plugin_on(store: &MemoryStore) -> CommandPlugin {
    CommandPlugin::load(Arc::new(store.clone()), Sandbox::default(), one())
        .await
        .unwrap()
}

async fn plugin() -> CommandPlugin { plugin_on(&MemoryStore::new("command")).await }

fn sender(id: &str) -> Sender {
    Sender {
        id: id.into(),
        nick: format!("nick{id}"),
    }
}

fn msg(text: &str, addressed: bool) -> Incoming {
    Incoming {
        text: text.into(),
        addressed,
        sender: sender("1"),
    }
}

async fn run(plugin: &CommandPlugin, text: &str) -> Arc<Recorder> {
    let rec = Arc::new(Recorder::default());
    if let Some(task) = plugin
        .handle(&msg(text, true), Arc::clone(&rec) as _, &AllowAll)
        .await
    {
        task.await.unwrap();
    }
    rec
}

#[tokio::test]
async fn test_add_then_show_verbatim() {
    let plugin = plugin().await;
    let code = "let x = \"  spaced\ttabs\n\";\r\nreply(x)";

    assert_eq!(plugin.add("greet", code).await, ["done"]);
    assert_eq!(plugin.show("greet").await, [
        "Source code for command 'greet':",
        code
    ]);
}

#[tokio::test]
async fn test_add_overwrites() {
    let plugin = plugin().await;

    plugin.add("greet", "reply(1)").await;
    plugin.add("greet", "reply(2)").await;

    let table = plugin.snapshot().await;
    assert_eq!(table.len(), 1);
    assert_eq!(table.get("greet"), Some("reply(2)"));
}

#[tokio::test]
async fn test_add_rejects_empty() {
    let plugin = plugin().await;

    assert_eq!(plugin.add("greet", "").await, [
        "Usage: command add <name> <code>"
    ]);
    assert!(plugin.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_list() {
    let plugin = plugin().await;
    assert_eq!(plugin.list().await, ["No commands available."]);

    for name in ["b", "a", "c"] {
        plugin.add(name, "reply(1)").await;
    }

    assert_eq!(plugin.list().await, ["Available commands: a, b, c"]);
}

#[tokio::test]
async fn test_delete() {
    let plugin = plugin().await;
    plugin.add("a", "reply(1)").await;
    let before = plugin.snapshot().await;

    assert_eq!(plugin.delete("b").await, ["Command does not exist."]);
    assert_eq!(plugin.snapshot().await, before);

    assert_eq!(plugin.delete("a").await, ["done"]);
    assert_eq!(plugin.show("a").await, ["Command does not exist."]);
}

#[tokio::test]
async fn test_unaddressed_never_runs() {
    let plugin = plugin().await;
    plugin.add("greet", "reply(\"hi\")").await;

    let rec = Arc::new(Recorder::default());
    let task = plugin
        .handle(&msg("greet", false), Arc::clone(&rec) as _, &AllowAll)
        .await;

    assert!(task.is_none());
    assert!(plugin
        .dispatch(&msg("greet bob", false), Arc::clone(&rec) as _)
        .await
        .is_none());
    assert!(rec.public().is_empty());
    assert!(rec.private().is_empty());
}

#[tokio::test]
async fn test_unknown_name_ignored() {
    let plugin = plugin().await;
    let rec = run(&plugin, "greet").await;

    assert!(rec.public().is_empty());
    assert!(rec.private().is_empty());
}

#[tokio::test]
async fn test_dispatch_runs_snippet() {
    let plugin = plugin().await;
    plugin
        .add(
            "greet",
            r#"reply("Hello " + if args.is_empty() { nick } else { args[0] })"#,
        )
        .await;

    assert_eq!(run(&plugin, "greet").await.public(), ["Hello nick1"]);
    assert_eq!(run(&plugin, "greet  bob carol").await.public(), ["Hello bob"]);
}

#[tokio::test]
async fn test_failing_snippet_reports_twice() {
    let plugin = plugin().await;
    plugin.add("boom", r#"throw "kaboom""#).await;
    let before = plugin.snapshot().await;

    let rec = run(&plugin, "boom").await;

    assert_eq!(rec.public(), ["Command 'boom' failed."]);
    let private = rec.private();
    assert_eq!(private.len(), 1);
    assert!(private[0].starts_with("Backtrace for command 'boom': "));
    assert!(private[0].contains("kaboom"));
    assert_eq!(plugin.snapshot().await, before);
}

#[tokio::test]
async fn test_syntax_error_reported() {
    let plugin = plugin().await;
    plugin.add("bad", "reply(").await;

    let rec = run(&plugin, "bad").await;
    assert_eq!(rec.public(), ["Command 'bad' failed."]);
    assert_eq!(rec.private().len(), 1);
}

#[tokio::test]
async fn test_runaway_snippet_cancelled() {
    let sandbox = Sandbox::new(Limits {
        timeout: Duration::from_millis(100),
        max_operations: 0,
        ..Limits::default()
    });
    let plugin = CommandPlugin::load(Arc::new(MemoryStore::new("command")), sandbox, one())
        .await
        .unwrap();
    plugin.add("spin", "loop {}").await;

    let rec = tokio::time::timeout(Duration::from_secs(10), run(&plugin, "spin"))
        .await
        .unwrap();

    assert_eq!(rec.public(), ["Command 'spin' failed."]);
    assert!(rec.private()[0].contains("Timed out"));
}

async fn spinning_plugin(timeout_ms: u64, concurrency: usize) -> CommandPlugin {
    let sandbox = Sandbox::new(Limits {
        timeout: Duration::from_millis(timeout_ms),
        max_operations: 0,
        ..Limits::default()
    });
    let plugin = CommandPlugin::load(
        Arc::new(MemoryStore::new("command")),
        sandbox,
        NonZeroUsize::new(concurrency).unwrap(),
    )
    .await
    .unwrap();

    plugin.add("spin", "loop {}").await;
    plugin.add("hi", r#"reply("hi")"#).await;
    plugin
}

#[tokio::test]
async fn test_dispatch_returns_while_snippet_runs() {
    let plugin = spinning_plugin(1000, 2).await;
    let spin_rec = Arc::new(Recorder::default());

    let start = Instant::now();
    let spin = plugin
        .handle(&msg("spin", true), Arc::clone(&spin_rec) as _, &AllowAll)
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_millis(100));

    // Other work is still served while the first snippet spins
    assert_eq!(plugin.list().await, ["Available commands: hi, spin"]);
    assert_eq!(run(&plugin, "hi").await.public(), ["hi"]);
    assert!(!spin.is_finished());
    assert!(spin_rec.public().is_empty());

    spin.await.unwrap();
    assert_eq!(spin_rec.public(), ["Command 'spin' failed."]);
}

#[tokio::test]
async fn test_runs_bounded_by_concurrency() {
    let plugin = spinning_plugin(300, 1).await;

    let start = Instant::now();
    let spin = plugin
        .handle(&msg("spin", true), Arc::new(Recorder::default()), &AllowAll)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let hi_rec = Arc::new(Recorder::default());
    let hi = plugin
        .handle(&msg("hi", true), Arc::clone(&hi_rec) as _, &AllowAll)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!hi.is_finished());
    assert!(hi_rec.public().is_empty());

    hi.await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert_eq!(hi_rec.public(), ["hi"]);

    spin.await.unwrap();
}

#[tokio::test]
async fn test_restart_keeps_commands() {
    let store = MemoryStore::new("command");

    {
        let plugin = plugin_on(&store).await;
        plugin.add("greet", "reply(\"hi\")").await;
        plugin.add("gone", "reply(0)").await;
        plugin.delete("gone").await;
    }

    let plugin = plugin_on(&store).await;
    let table = plugin.snapshot().await;
    assert_eq!(table.len(), 1);
    assert_eq!(table.get("greet"), Some("reply(\"hi\")"));
}

#[tokio::test]
async fn test_save_failure_rolls_back() {
    let plugin = CommandPlugin::load(Arc::new(BrokenStore), Sandbox::default(), one())
        .await
        .unwrap();

    assert_eq!(plugin.add("a", "reply(1)").await, [
        "Error saving commands, nothing was changed."
    ]);
    assert!(plugin.snapshot().await.is_empty());
}

#[tokio::test]
async fn test_admin_routing() {
    let plugin = plugin().await;

    let rec = run(&plugin, "command add greet reply( \"hi\" )").await;
    assert_eq!(rec.public(), ["done"]);
    assert_eq!(
        plugin.snapshot().await.get("greet"),
        Some("reply( \"hi\" )")
    );

    assert_eq!(run(&plugin, "command list").await.public(), [
        "Available commands: greet"
    ]);
    assert_eq!(run(&plugin, "command show greet").await.public(), [
        "Source code for command 'greet':",
        "reply( \"hi\" )"
    ]);
    assert_eq!(run(&plugin, "command add greet").await.public(), [
        "Usage: command add <name> <code>"
    ]);
    assert_eq!(run(&plugin, "command del greet").await.public(), ["done"]);
    assert_eq!(run(&plugin, "command del greet").await.public(), [
        "Command does not exist."
    ]);
}

#[tokio::test]
async fn test_admin_body_not_dispatched() {
    let plugin = plugin().await;
    plugin.add("command", "reply(\"snippet ran\")").await;

    let rec = run(&plugin, "command list").await;
    assert_eq!(rec.public(), ["Available commands: command"]);
}

#[tokio::test]
async fn test_help() {
    let plugin = plugin().await;

    let general = run(&plugin, "help command").await.public();
    let add = run(&plugin, "help command add").await.public();

    assert_eq!(general.len(), 1);
    assert!(general[0].contains("command add <name> <code>"));
    assert_eq!(add.len(), 1);
    assert!(add[0].contains("reply(text)"));
}

#[tokio::test]
async fn test_editing_requires_capability() {
    let plugin = plugin().await;
    plugin.add("keep", "reply(1)").await;
    let editors = EditorList::new(["2"]);

    for text in ["command add x reply(1)", "command del keep"] {
        let rec = Arc::new(Recorder::default());
        plugin
            .handle(&msg(text, true), Arc::clone(&rec) as _, &editors)
            .await;
        assert_eq!(rec.public(), ["You are not authorized to do that."]);
    }

    let rec = Arc::new(Recorder::default());
    plugin
        .handle(&msg("command show keep", true), Arc::clone(&rec) as _, &editors)
        .await;
    assert_eq!(rec.public()[1], "reply(1)");

    let table = plugin.snapshot().await;
    assert_eq!(table.len(), 1);
    assert!(table.contains("keep"));
}
