use std::path::Path;

use async_trait::async_trait;

use crate::config::GitConfig;
use crate::error::StoreResult;
use crate::session::BatchSession;

/// Opens object store sessions for repository roots.
///
/// The hash engines open one session per traversal root: the top-level
/// repository and every submodule they descend into.
#[async_trait]
pub trait ObjectSource: Send + Sync {
    /// Open a session reading the repository at `root`.
    async fn open(&self, root: &Path) -> StoreResult<BatchSession>;
}

/// Sessions backed by `git cat-file --batch` subprocesses.
#[derive(Clone, Debug, Default)]
pub struct GitObjectSource {
    config: GitConfig,
}

impl GitObjectSource {
    pub fn new(config: GitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GitConfig {
        &self.config
    }
}

#[async_trait]
impl ObjectSource for GitObjectSource {
    async fn open(&self, root: &Path) -> StoreResult<BatchSession> {
        BatchSession::spawn(&self.config, root)
    }
}

#[async_trait]
impl<T: ObjectSource + ?Sized> ObjectSource for std::sync::Arc<T> {
    async fn open(&self, root: &Path) -> StoreResult<BatchSession> {
        (**self).open(root).await
    }
}
