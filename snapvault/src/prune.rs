//! Retention pruning.
//!
//! Keeps the `keep` newest complete snapshots of a project and deletes the
//! rest, archive and manifest together. Archives without a manifest are
//! invisible here: they may be builds still in flight, and deleting them
//! is never this module's call.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::snapshot::{list_snapshots, manifest::Manifest};
use crate::utils::errors::{Result, VaultError};

/// Delete all but the `keep` newest complete snapshots for `project`.
///
/// Returns the stems of the snapshots that were deleted, newest first.
/// A snapshot whose archive cannot be deleted is left whole; a stuck
/// manifest after a deleted archive is logged and the pass continues, so
/// one discrepancy never blocks the rest of the prune.
pub fn prune(project: &str, destination_dir: &Path, keep: usize) -> Result<Vec<String>> {
    if keep == 0 {
        return Err(VaultError::InvalidConfiguration(
            "retention keep must be at least 1; refusing to delete every snapshot".to_string(),
        ));
    }

    let snapshots = list_snapshots(project, destination_dir)
        .map_err(|e| VaultError::PruneFailure(format!("listing snapshots for '{project}': {e}")))?;

    let mut deleted = Vec::new();
    for entry in snapshots.into_iter().skip(keep) {
        let manifest_path = Manifest::path_for(&entry.archive_path);

        if let Err(e) = fs::remove_file(&entry.archive_path) {
            warn!(
                archive = %entry.archive_path.display(),
                error = %e,
                "failed to delete archive; leaving its manifest in place"
            );
            continue;
        }

        if let Err(e) = fs::remove_file(&manifest_path) {
            warn!(
                manifest = %manifest_path.display(),
                error = %e,
                "archive deleted but manifest removal failed"
            );
        }

        info!(stem = %entry.stem, "pruned snapshot");
        deleted.push(entry.stem);
    }

    Ok(deleted)
}
