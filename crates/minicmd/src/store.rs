//! Namespaced key-value persistence backends

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use redis::{aio::MultiplexedConnection, AsyncCommands};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use crate::prelude::*;

/// A namespaced key-value store
///
/// Values are opaque strings, overwritten wholesale on every save.
#[async_trait]
pub trait Store: fmt::Debug + Send + Sync {
    /// The partition this store reads and writes
    fn namespace(&self) -> &str;

    /// Read the value stored under `key`, if any
    async fn load(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`
    async fn save(&self, key: &str, value: String) -> Result;
}

/// An in-process store
///
/// Clones share the same backing map, so a clone outlives any plugin built on
/// it and can be used to simulate a restart.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    namespace: Arc<str>,
    map: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    /// Construct an empty store for the given namespace
    #[must_use]
    pub fn new(namespace: impl Into<Arc<str>>) -> Self {
        Self {
            namespace: namespace.into(),
            map: Arc::default(),
        }
    }

    fn full_key(&self, key: &str) -> String { format!("{}:{key}", self.namespace) }
}

#[async_trait]
impl Store for MemoryStore {
    fn namespace(&self) -> &str { &self.namespace }

    async fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.map.read().await.get(&self.full_key(key)).cloned())
    }

    async fn save(&self, key: &str, value: String) -> Result {
        self.map.write().await.insert(self.full_key(key), value);
        Ok(())
    }
}

/// A store keeping one JSON document per key on disk
///
/// Values live at `<root>/<namespace>/<key>.json`.
#[derive(Debug)]
pub struct FileStore {
    namespace: String,
    dir: PathBuf,
}

impl FileStore {
    /// Construct a store rooted at `root`
    ///
    /// The namespace directory is created lazily on first save.
    #[must_use]
    pub fn new(root: impl AsRef<Path>, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let dir = root.as_ref().join(&namespace);

        Self { namespace, dir }
    }

    fn path(&self, key: &str) -> PathBuf { self.dir.join(format!("{key}.json")) }
}

#[async_trait]
impl Store for FileStore {
    fn namespace(&self) -> &str { &self.namespace }

    #[instrument(level = "debug", skip(self), fields(dir = %self.dir.display()))]
    async fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key);

        match tokio::fs::read_to_string(&path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("Error reading {path:?}")),
        }
    }

    #[instrument(level = "debug", skip(self, value), fields(dir = %self.dir.display()))]
    async fn save(&self, key: &str, value: String) -> Result {
        let path = self.path(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Error creating {:?}", self.dir))?;

        // The data must be on disk before the rename makes it visible
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("Error creating {tmp:?}"))?;
        file.write_all(value.as_bytes())
            .await
            .with_context(|| format!("Error writing {tmp:?}"))?;
        file.sync_all()
            .await
            .with_context(|| format!("Error syncing {tmp:?}"))?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Error moving {tmp:?} to {path:?}"))?;

        #[cfg(unix)]
        sync_dir(&self.dir).await?;

        Ok(())
    }
}

/// Flush a directory so a rename inside it survives a crash
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result {
    tokio::fs::File::open(dir)
        .await
        .with_context(|| format!("Error opening {dir:?}"))?
        .sync_all()
        .await
        .with_context(|| format!("Error syncing {dir:?}"))
}

/// A store backed by a Redis server
///
/// Values live under the Redis key `<namespace>:<key>`.
pub struct RedisStore {
    namespace: String,
    conn: MultiplexedConnection,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to the server at `url`
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the connection fails.
    pub async fn connect(url: &str, namespace: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .context("Error connecting to Redis")?;

        Ok(Self {
            namespace: namespace.into(),
            conn,
        })
    }

    fn full_key(&self, key: &str) -> String { format!("{}:{key}", self.namespace) }
}

#[async_trait]
impl Store for RedisStore {
    fn namespace(&self) -> &str { &self.namespace }

    async fn load(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let key = self.full_key(key);

        conn.get(&key)
            .await
            .with_context(|| format!("Error reading Redis key {key:?}"))
    }

    async fn save(&self, key: &str, value: String) -> Result {
        let mut conn = self.conn.clone();
        let key = self.full_key(key);

        conn.set::<_, _, ()>(&key, value)
            .await
            .with_context(|| format!("Error writing Redis key {key:?}"))
    }
}
