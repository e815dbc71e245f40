//! Snapshot restoration.
//!
//! Restoring is a plain extraction of one archive into a destination
//! directory. The one rule worth enforcing here: an archive without a
//! valid manifest never completed, so it is refused rather than extracted.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::snapshot::manifest::Manifest;
use crate::utils::errors::{Result, VaultError};

/// Extract `archive` into `destination`, creating it if needed.
/// Returns the snapshot's manifest.
pub async fn restore_archive(archive: &Path, destination: &Path) -> Result<Manifest> {
    let manifest = Manifest::load(&Manifest::path_for(archive))?;

    let archive_owned = archive.to_path_buf();
    let destination_owned = destination.to_path_buf();
    tokio::task::spawn_blocking(move || unpack(&archive_owned, &destination_owned))
        .await
        .map_err(|e| VaultError::BuildFailed(format!("restore task panicked: {e}")))??;

    info!(
        archive = %archive.display(),
        destination = %destination.display(),
        files = manifest.file_count,
        "snapshot restored"
    );
    Ok(manifest)
}

fn unpack(archive: &Path, destination: &Path) -> Result<()> {
    fs::create_dir_all(destination)?;
    let file = fs::File::open(archive)?;
    let decoder = zstd::stream::read::Decoder::new(file)?;
    let mut tar = tar::Archive::new(decoder);
    tar.unpack(destination)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PatternSet;
    use crate::snapshot::SnapshotBuilder;
    use tempfile::TempDir;

    #[tokio::test]
    async fn build_then_restore_round_trips_the_matched_tree() {
        let source = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();

        fs::create_dir_all(source.path().join("docs")).unwrap();
        fs::create_dir_all(source.path().join("empty")).unwrap();
        fs::create_dir_all(source.path().join(".git")).unwrap();
        fs::write(source.path().join("docs/a.md"), b"alpha").unwrap();
        fs::write(source.path().join("b.txt"), b"beta").unwrap();
        fs::write(source.path().join(".git/HEAD"), b"ref").unwrap();

        let patterns = PatternSet::new(&[], &[".git".to_string()]).unwrap();
        let snapshot = SnapshotBuilder::new(3)
            .build(source.path(), &patterns, dest.path(), "docs")
            .await
            .unwrap();

        let manifest = restore_archive(&snapshot.archive_path, out.path())
            .await
            .unwrap();
        assert_eq!(manifest.file_count, 2);

        assert_eq!(fs::read(out.path().join("docs/a.md")).unwrap(), b"alpha");
        assert_eq!(fs::read(out.path().join("b.txt")).unwrap(), b"beta");
        // The matching empty directory came back; the excluded tree did not.
        assert!(out.path().join("empty").is_dir());
        assert!(!out.path().join(".git").exists());
    }

    #[tokio::test]
    async fn archive_without_manifest_is_refused() {
        let dest = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let archive = dest.path().join("p_20260101_000000.tar.zst");
        fs::write(&archive, b"torn").unwrap();

        let err = restore_archive(&archive, out.path()).await.unwrap_err();
        assert!(matches!(err, VaultError::IncompleteSnapshot(_)));
        // Nothing was extracted.
        assert!(fs::read_dir(out.path()).unwrap().next().is_none());
    }
}
