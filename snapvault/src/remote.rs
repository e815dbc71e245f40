//! Remote sink interface.
//!
//! Transport for shipping finished archives off-host (S3, GCS, an rsync
//! target) is somebody else's problem; the orchestrator only needs an
//! opaque upload capability. Upload failures never roll back the local
//! snapshot.

use std::path::{Path, PathBuf};

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::utils::errors::Result;

/// Opaque destination for finished archives.
pub trait RemoteSink: Send + Sync {
    /// Ship `archive` to `key` at the remote. Implementations own their
    /// retry policy; the orchestrator treats any error as final for the
    /// current run.
    fn upload<'a>(&'a self, archive: &'a Path, key: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Reference sink that mirrors archives into a local directory tree.
/// Stands in for cloud transports in tests and single-host setups.
pub struct LocalDirSink {
    root: PathBuf,
}

impl LocalDirSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl RemoteSink for LocalDirSink {
    fn upload<'a>(&'a self, archive: &'a Path, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let target = self.root.join(key);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(archive, &target).await?;
            debug!(key = %key, "archive mirrored to local sink");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_sink_mirrors_under_the_key() {
        let src = TempDir::new().unwrap();
        let sink_root = TempDir::new().unwrap();
        let archive = src.path().join("p_20260101_000000.tar.zst");
        std::fs::write(&archive, b"bytes").unwrap();

        let sink = LocalDirSink::new(sink_root.path());
        sink.upload(&archive, "p/p_20260101_000000.tar.zst")
            .await
            .unwrap();

        let mirrored = sink_root.path().join("p/p_20260101_000000.tar.zst");
        assert_eq!(std::fs::read(mirrored).unwrap(), b"bytes");
    }
}
