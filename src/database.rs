//! Database management.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use sled::{Config as SledConfig, Db, IVec};

use crate::error::{ShutdownError, ShutdownResult, ERR_DB_FLUSH};

pub type Tree = sled::Tree;

/// The default path under which streaming engines keep their local state.
pub const DEFAULT_STATE_DIR: &str = "/usr/local/chainer/state";
/// The default path to use for the local broker's topic logs.
pub const DEFAULT_BROKER_DATA_PATH: &str = "/usr/local/chainer/broker";
/// The DB tree prefix used for broker topics.
const TREE_TOPIC_PREFIX: &str = "topics";
/// The DB tree used for a streaming engine's local state.
const TREE_ENGINE_STATE: &str = "engine_state";

/// The default path for streaming engine state.
pub fn default_state_dir() -> String {
    DEFAULT_STATE_DIR.to_string()
}

/// The default path for broker data.
pub fn default_broker_data_path() -> String {
    DEFAULT_BROKER_DATA_PATH.to_string()
}

/// An abstraction over a sled database rooted at a single directory.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    /// The directory holding the database files.
    path: PathBuf,
    /// The underlying DB handle.
    db: Db,
}

impl Database {
    /// Open the database at the given path, creating the directory as needed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let dbpath = path.into();
        tokio::fs::create_dir_all(&dbpath)
            .await
            .with_context(|| format!("error creating dir {:?} for database", &dbpath))?;

        Self::spawn_blocking(move || -> Result<Self> {
            let db = SledConfig::new()
                .path(&dbpath)
                .mode(sled::Mode::HighThroughput)
                .open()
                .with_context(|| format!("error opening database at {:?}", &dbpath))?;
            let inner = Arc::new(DatabaseInner { path: dbpath, db });
            Ok(Self { inner })
        })
        .await?
    }

    /// Spawn a blocking database-related function, returning a ShutdownError if anything goes
    /// wrong related to spawning & joining.
    #[tracing::instrument(level = "trace", skip(f), err)]
    pub async fn spawn_blocking<F, R>(f: F) -> ShutdownResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
            .await
            .map_err(|err| ShutdownError::from(anyhow::Error::from(err)))
    }

    /// The directory of this database.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Get a handle to the DB tree of a broker topic.
    pub async fn get_topic_tree(&self, topic: &str) -> ShutdownResult<Tree> {
        let name = format!("{}/{}", TREE_TOPIC_PREFIX, topic);
        self.open_tree(name).await
    }

    /// Get a handle to the DB tree holding a streaming engine's state.
    pub async fn get_engine_state_tree(&self) -> ShutdownResult<Tree> {
        self.open_tree(TREE_ENGINE_STATE.to_string()).await
    }

    /// Flush all dirty data to disk.
    pub async fn flush(&self) -> ShutdownResult<()> {
        self.inner.db.flush_async().await.context(ERR_DB_FLUSH)?;
        Ok(())
    }

    async fn open_tree(&self, name: String) -> ShutdownResult<Tree> {
        let (db, ivname) = (self.inner.db.clone(), IVec::from(name.as_str()));
        let tree = Self::spawn_blocking(move || -> Result<Tree> { Ok(db.open_tree(ivname)?) })
            .await
            .and_then(|res| res.map_err(|err| ShutdownError(anyhow!("could not open DB tree {} {}", &name, err))))?;
        Ok(tree)
    }
}

/// Remove the database directory at the given path along with all of its contents.
///
/// A path which does not exist is treated as already purged.
pub async fn purge(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(anyhow::Error::from(err).context(format!("error purging state directory {:?}", path))),
    }
}
