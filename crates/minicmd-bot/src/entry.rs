use std::num::NonZeroUsize;

use tokio::runtime::Runtime;
use tracing_loki::BackgroundTask;
use tracing_subscriber::EnvFilter;

use crate::{client::ClientOpts, prelude::*};

/// Blocking threads kept free for file I/O beyond those held by snippet runs
const BLOCKING_HEADROOM: usize = 4;

#[derive(Debug, clap::Parser)]
#[command(version, author, about)]
struct Opts {
    #[command(flatten)]
    log: LogOpts,

    #[command(flatten)]
    client: ClientOpts,
}

#[derive(Debug, clap::Args)]
struct LogOpts {
    /// Log filter, using env_logger-like syntax
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_filter: String,

    /// Grafana Loki endpoint to ship logs to
    #[arg(long, env)]
    loki_endpoint: Option<Url>,
}

impl LogOpts {
    /// Install the global subscriber
    ///
    /// If a Loki endpoint is configured, the returned task must be spawned on
    /// the runtime for logs to be shipped.
    fn install(&self) -> Result<Option<BackgroundTask>> {
        let filter = EnvFilter::try_new(&self.log_filter)
            .with_context(|| format!("Invalid log filter {:?}", self.log_filter))?;
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());

        let Some(endpoint) = &self.loki_endpoint else {
            registry.try_init().context("Error installing logger")?;
            return Ok(None);
        };

        let host = hostname::get()
            .context("Error reading hostname")?
            .into_string()
            .map_err(|h| anyhow!("Hostname {h:?} is not valid UTF-8"))?;

        let (layer, task) = tracing_loki::builder()
            .label("host", host)?
            .label("crate", env!("CARGO_PKG_NAME"))?
            .build_url(endpoint.clone())
            .context("Error initializing Loki exporter")?;

        registry.with(layer).try_init().context("Error installing logger")?;
        Ok(Some(task))
    }
}

/// Load `.env` files, most specific first; variables already set win
fn load_env() -> Result {
    let profile = if cfg!(debug_assertions) {
        ".env.dev"
    } else {
        ".env.prod"
    };

    for path in [".env.local", profile, ".env"] {
        match dotenvy::from_filename(path) {
            Ok(p) => trace!("Loaded env from {p:?}"),
            Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => (),
            Err(e) => return Err(e).with_context(|| format!("Error loading env from {path:?}")),
        }
    }

    Ok(())
}

/// Build the runtime snippets run on
///
/// Each snippet run holds a blocking thread for its whole duration, so the
/// blocking pool is sized from the snippet concurrency limit.
fn runtime(snippet_concurrency: NonZeroUsize) -> Result<Runtime> {
    let blocking = snippet_concurrency.get() + BLOCKING_HEADROOM;
    debug!(blocking, "Building runtime");

    tokio::runtime::Builder::new_multi_thread()
        .thread_name("minicmd-worker")
        .max_blocking_threads(blocking)
        .enable_all()
        .build()
        .context("Error building async runtime")
}

fn boot() -> Result<(Runtime, ClientOpts, Option<BackgroundTask>)> {
    load_env().context("Error loading .env files")?;

    let Opts { log, client } = clap::Parser::parse();
    let loki = log.install()?;
    let rt = runtime(client.snippet_concurrency())?;

    Ok((rt, client, loki))
}

fn log_panics() {
    let default = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        default(info);

        let payload = info.payload();
        let msg = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("Box<dyn Any>");

        error!(
            thread = std::thread::current().name(),
            location = ?info.location(),
            msg,
            "Thread panicked!"
        );
    }));
}

#[inline]
pub fn main() {
    // Until the real subscriber is installed, boot errors go to a plain one
    let booted = tracing::subscriber::with_default(
        tracing_subscriber::registry().with(tracing_subscriber::fmt::layer()),
        || boot().map_err(|e| error!("{e:?}")),
    );

    let Ok((rt, client, loki)) = booted else {
        std::process::exit(1);
    };

    log_panics();

    if let Some(task) = loki {
        rt.spawn(task);
    }

    std::process::exit(match rt.block_on(run(client)) {
        Ok(()) => 0,
        Err(e) => {
            error!("{e:?}");
            1
        },
    });
}

#[cfg(unix)]
async fn shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).context("Error hooking SIGTERM")?;
    let mut hup = signal(SignalKind::hangup()).context("Error hooking SIGHUP")?;

    Ok(tokio::select! {
        r = tokio::signal::ctrl_c() => {
            r.context("Error hooking SIGINT")?;
            "SIGINT"
        },
        _ = term.recv() => "SIGTERM",
        _ = hup.recv() => "SIGHUP",
    })
}

#[cfg(not(unix))]
async fn shutdown_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .context("Error hooking Ctrl-C")?;
    Ok("Ctrl-C")
}

#[instrument(level = "error", skip(opts))]
async fn run(opts: ClientOpts) -> Result {
    let mut client = crate::client::build(opts).await?;
    let shards = Arc::clone(&client.shard_manager);

    tokio::select! {
        res = client.start() => {
            res.context("Fatal client error occurred")?;
            Err(anyhow!("Client hung up unexpectedly"))
        },
        sig = shutdown_signal() => {
            let sig = sig?;
            warn!(signal = sig, "Shutting down");
            shards.shutdown_all().await;
            Ok(())
        },
    }
}
