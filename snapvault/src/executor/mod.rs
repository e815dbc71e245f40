//! Backup orchestration.
//!
//! Sequences one backup run: validate the configuration, take the
//! per-project build lock, build the snapshot, prune old snapshots, and
//! release the lock on every exit path. A failed build skips pruning, so
//! prior good snapshots are never deleted on the strength of a failure.

use std::fs;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::BackupConfig;
use crate::lock::LockManager;
use crate::pattern::PatternSet;
use crate::prune;
use crate::remote::RemoteSink;
use crate::snapshot::{Snapshot, SnapshotBuilder};
use crate::utils::errors::{Result, VaultError};

/// Public entry point for backup runs.
pub struct BackupExecutor {
    locks: LockManager,
    remote: Option<Arc<dyn RemoteSink>>,
}

impl Default for BackupExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupExecutor {
    /// Executor using the process-wide lock holder identity.
    pub fn new() -> Self {
        Self {
            locks: LockManager::new(),
            remote: None,
        }
    }

    /// Executor with an explicit lock manager (distinct holder identity).
    pub fn with_locks(locks: LockManager) -> Self {
        Self {
            locks,
            remote: None,
        }
    }

    /// Also ship each finished archive to a remote sink. Sink failures are
    /// logged and never roll back the local snapshot.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteSink>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Run one backup for `config`'s project.
    ///
    /// Lock contention surfaces as [`VaultError::BuildInProgress`]; callers
    /// own any retry policy.
    pub async fn run(&self, config: &BackupConfig) -> Result<Snapshot> {
        config.validate()?;
        let patterns = config.pattern_set()?;
        fs::create_dir_all(&config.destination_dir)?;

        let resource = config.destination_dir.join(&config.project_name);
        let record = match self
            .locks
            .acquire(&resource, config.lock_timeout(), config.staleness_threshold())
            .await
        {
            Ok(record) => record,
            Err(VaultError::LockTimeout { .. }) => {
                return Err(VaultError::BuildInProgress(config.project_name.clone()));
            }
            Err(e) => return Err(e),
        };

        let outcome = self.build_and_prune(config, &patterns).await;

        // Released on every exit path. A release problem is reported but
        // never masks the build outcome.
        if let Err(e) = self.locks.release(&record) {
            warn!(project = %config.project_name, error = %e, "failed to release build lock");
        }

        let snapshot = outcome?;

        if let Some(remote) = &self.remote {
            upload(remote.as_ref(), &snapshot).await;
        }

        Ok(snapshot)
    }

    async fn build_and_prune(
        &self,
        config: &BackupConfig,
        patterns: &PatternSet,
    ) -> Result<Snapshot> {
        let builder =
            SnapshotBuilder::new(config.compression_level).with_walk_options(config.walk_options());
        let snapshot = builder
            .build(
                &config.source_root,
                patterns,
                &config.destination_dir,
                &config.project_name,
            )
            .await?;

        // Pruning only ever runs after a new complete snapshot exists, and
        // a prune problem does not fail the run.
        match prune::prune(&config.project_name, &config.destination_dir, config.keep) {
            Ok(deleted) if !deleted.is_empty() => {
                info!(
                    project = %config.project_name,
                    count = deleted.len(),
                    "pruned old snapshots"
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(project = %config.project_name, error = %e, "prune pass failed");
            }
        }

        Ok(snapshot)
    }
}

async fn upload(remote: &dyn RemoteSink, snapshot: &Snapshot) {
    let name = snapshot
        .archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let key = format!("{}/{}", snapshot.project, name);

    match remote.upload(&snapshot.archive_path, &key).await {
        Ok(()) => info!(key = %key, "archive uploaded to remote sink"),
        Err(e) => {
            warn!(key = %key, error = %e, "remote upload failed; local snapshot is unaffected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{marker_path, HolderId};
    use crate::remote::LocalDirSink;
    use crate::snapshot::list_snapshots;
    use futures_util::future::BoxFuture;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(source: &Path, dest: &Path) -> BackupConfig {
        let mut config = BackupConfig::new("proj", source, dest);
        config.keep = 2;
        config.lock_timeout_secs = 1;
        config
    }

    fn write_source(source: &Path) {
        fs::create_dir_all(source.join("src")).unwrap();
        fs::write(source.join("src/lib.rs"), b"pub fn f() {}\n").unwrap();
        fs::write(source.join("README.md"), b"readme").unwrap();
    }

    fn executor() -> BackupExecutor {
        BackupExecutor::with_locks(LockManager::with_holder(HolderId::fresh()))
    }

    #[tokio::test]
    async fn run_builds_a_snapshot_and_releases_the_lock() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        write_source(source.path());
        let config = test_config(source.path(), dest.path());

        let snapshot = executor().run(&config).await.unwrap();
        assert!(snapshot.archive_path.exists());
        assert_eq!(snapshot.file_count, 2);

        let resource = dest.path().join("proj");
        assert!(!marker_path(&resource).exists());
    }

    #[tokio::test]
    async fn retention_holds_across_repeated_runs() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        write_source(source.path());
        let config = test_config(source.path(), dest.path());
        let executor = executor();

        for _ in 0..3 {
            executor.run(&config).await.unwrap();
            // Archive stamps have second resolution.
            tokio::time::sleep(Duration::from_millis(1050)).await;
        }

        let entries = list_snapshots("proj", dest.path()).unwrap();
        assert_eq!(entries.len(), 2);
        // Newest first, and strictly newer than what was pruned.
        assert!(entries[0].created_at >= entries[1].created_at);
    }

    #[tokio::test]
    async fn contended_lock_surfaces_as_build_in_progress() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        write_source(source.path());
        let config = test_config(source.path(), dest.path());

        // Another process holds the build lock.
        let foreign = LockManager::with_holder(HolderId::fresh());
        let resource = dest.path().join("proj");
        let held = foreign
            .try_acquire(&resource, Duration::from_secs(3600))
            .unwrap()
            .unwrap();

        let err = executor().run(&config).await.unwrap_err();
        assert!(matches!(err, VaultError::BuildInProgress(_)));
        // No snapshot was produced and the foreign lock survived.
        assert!(list_snapshots("proj", dest.path()).unwrap().is_empty());
        assert!(marker_path(&resource).exists());

        foreign.release(&held).unwrap();
    }

    #[tokio::test]
    async fn invalid_config_fails_before_any_mutation() {
        let dest = TempDir::new().unwrap();
        let missing = dest.path().join("gone");
        let config = test_config(&missing, dest.path());

        let err = executor().run(&config).await.unwrap_err();
        assert!(matches!(err, VaultError::InvalidConfiguration(_)));
        assert!(!marker_path(&dest.path().join("proj")).exists());
    }

    #[tokio::test]
    async fn snapshots_are_mirrored_to_the_remote_sink() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let mirror = TempDir::new().unwrap();
        write_source(source.path());
        let config = test_config(source.path(), dest.path());

        let snapshot = executor()
            .with_remote(Arc::new(LocalDirSink::new(mirror.path())))
            .run(&config)
            .await
            .unwrap();

        let name = snapshot.archive_path.file_name().unwrap();
        assert!(mirror.path().join("proj").join(name).exists());
    }

    struct FailingSink;

    impl RemoteSink for FailingSink {
        fn upload<'a>(&'a self, _archive: &'a Path, _key: &'a str) -> BoxFuture<'a, Result<()>> {
            Box::pin(async {
                Err(VaultError::BuildFailed("sink unavailable".to_string()))
            })
        }
    }

    #[tokio::test]
    async fn remote_failure_never_rolls_back_the_local_snapshot() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        write_source(source.path());
        let config = test_config(source.path(), dest.path());

        let snapshot = executor()
            .with_remote(Arc::new(FailingSink))
            .run(&config)
            .await
            .unwrap();

        assert!(snapshot.archive_path.exists());
        assert_eq!(list_snapshots("proj", dest.path()).unwrap().len(), 1);
    }
}
