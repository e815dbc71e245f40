//! Snapshot building and listing.
//!
//! A build stages every matching entry under a hidden staging directory,
//! packs the stage into a single `{project}_{stamp}.tar.zst` archive, and
//! only then writes the manifest sidecar. The manifest is the last step, so
//! readers and the pruner can treat its presence as the authoritative
//! "snapshot complete" signal and never observe a half-written snapshot.

pub mod manifest;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::{debug, info, warn};

use crate::fs::walker::{collect_entries, EntryKind, WalkOptions};
use crate::pattern::PatternSet;
use crate::utils::errors::{Result, VaultError};
use manifest::{Manifest, ARCHIVE_SUFFIX};

/// Hidden directory under the destination where builds stage their files.
pub const STAGING_DIR: &str = ".staging";

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// One completed point-in-time backup. Immutable after creation; only the
/// pruner ever deletes one.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub project: String,
    pub created_at: DateTime<Utc>,
    pub source_root: PathBuf,
    pub archive_path: PathBuf,
    pub file_count: usize,
    pub total_bytes: u64,
}

/// A complete snapshot found on disk.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub stem: String,
    pub archive_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub manifest: Manifest,
}

/// Builds snapshot archives.
#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    compression_level: i32,
    walk: WalkOptions,
}

impl SnapshotBuilder {
    pub fn new(compression_level: i32) -> Self {
        Self {
            compression_level,
            walk: WalkOptions::default(),
        }
    }

    pub fn with_walk_options(mut self, walk: WalkOptions) -> Self {
        self.walk = walk;
        self
    }

    /// Build one snapshot of `source_root` into `destination_dir`.
    ///
    /// The timestamp is taken at start time with second resolution. The
    /// per-project build lock keeps concurrent builds out; a second
    /// sequential build landing in the same second fails here rather than
    /// producing an ambiguous archive name.
    pub async fn build(
        &self,
        source_root: &Path,
        patterns: &PatternSet,
        destination_dir: &Path,
        project: &str,
    ) -> Result<Snapshot> {
        let created_at = truncate_to_second(Utc::now());
        let stem = format!("{project}_{}", created_at.format(STAMP_FORMAT));
        let archive_path = destination_dir.join(format!("{stem}{ARCHIVE_SUFFIX}"));

        if archive_path.exists() {
            return Err(VaultError::BuildFailed(format!(
                "archive {} already exists; refusing a second build in the same second",
                archive_path.display()
            )));
        }

        let stage_dir = destination_dir.join(STAGING_DIR).join(&stem);
        info!(
            project,
            source = %source_root.display(),
            archive = %archive_path.display(),
            "building snapshot"
        );

        let totals = {
            let source_root = source_root.to_path_buf();
            let patterns = patterns.clone();
            let stage_dir = stage_dir.clone();
            let archive_path = archive_path.clone();
            let walk = self.walk.clone();
            let level = self.compression_level;

            tokio::task::spawn_blocking(move || {
                stage_and_pack(&source_root, &patterns, &stage_dir, &archive_path, &walk, level)
            })
            .await
            .map_err(|e| VaultError::BuildFailed(format!("build task panicked: {e}")))?
        };

        let (file_count, total_bytes) = match totals {
            Ok(totals) => totals,
            Err(e) => {
                cleanup_failed_build(&stage_dir, &archive_path);
                return Err(e);
            }
        };

        // Manifest last: this is the commit point.
        let manifest = Manifest::new(project, created_at, source_root, file_count, total_bytes);
        if let Err(e) = manifest.store(&Manifest::path_for(&archive_path)) {
            cleanup_failed_build(&stage_dir, &archive_path);
            return Err(VaultError::BuildFailed(format!(
                "writing manifest for {stem}: {e}"
            )));
        }

        info!(project, files = file_count, bytes = total_bytes, "snapshot complete");
        Ok(Snapshot {
            project: project.to_string(),
            created_at,
            source_root: source_root.to_path_buf(),
            archive_path,
            file_count,
            total_bytes,
        })
    }
}

/// Stage matching entries and pack the stage into the archive. Returns
/// `(file_count, total_bytes)` gathered during staging. The staging
/// directory is removed on success; failure cleanup is the caller's.
fn stage_and_pack(
    source_root: &Path,
    patterns: &PatternSet,
    stage_dir: &Path,
    archive_path: &Path,
    walk: &WalkOptions,
    level: i32,
) -> Result<(usize, u64)> {
    let entries = collect_entries(source_root, patterns, walk)
        .map_err(|e| VaultError::BuildFailed(format!("walking {}: {e}", source_root.display())))?;

    fs::create_dir_all(stage_dir)
        .map_err(|e| VaultError::BuildFailed(format!("creating staging directory: {e}")))?;

    let mut file_count = 0usize;
    let mut total_bytes = 0u64;
    for entry in &entries {
        let target = stage_dir.join(&entry.rel);
        match entry.kind {
            EntryKind::Dir => {
                fs::create_dir_all(&target)
                    .map_err(|e| stage_error(&entry.rel, e))?;
            }
            EntryKind::File { size } => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| stage_error(&entry.rel, e))?;
                }
                fs::copy(&entry.abs, &target).map_err(|e| stage_error(&entry.rel, e))?;
                file_count += 1;
                total_bytes += size;
            }
        }
    }
    debug!(files = file_count, bytes = total_bytes, "staging complete");

    pack_stage(stage_dir, archive_path, level)?;

    fs::remove_dir_all(stage_dir)
        .map_err(|e| VaultError::BuildFailed(format!("removing staging directory: {e}")))?;

    Ok((file_count, total_bytes))
}

fn stage_error(rel: &Path, e: std::io::Error) -> VaultError {
    VaultError::BuildFailed(format!("staging {}: {e}", rel.display()))
}

/// Compress the staged tree into a single tar.zst archive.
fn pack_stage(stage_dir: &Path, archive_path: &Path, level: i32) -> Result<()> {
    let pack = || -> std::io::Result<()> {
        let file = fs::File::create(archive_path)?;
        let encoder = zstd::stream::write::Encoder::new(file, level)?;
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(".", stage_dir)?;
        let encoder = builder.into_inner()?;
        encoder.finish()?;
        Ok(())
    };
    pack().map_err(|e| {
        VaultError::BuildFailed(format!("packing {}: {e}", archive_path.display()))
    })
}

/// A failed build leaves nothing behind: no staging tree, no partial
/// archive. Cleanup problems are logged, the original error still wins.
fn cleanup_failed_build(stage_dir: &Path, archive_path: &Path) {
    if stage_dir.exists() {
        if let Err(e) = fs::remove_dir_all(stage_dir) {
            warn!(stage = %stage_dir.display(), error = %e, "failed to remove staging directory");
        }
    }
    if archive_path.exists() {
        if let Err(e) = fs::remove_file(archive_path) {
            warn!(archive = %archive_path.display(), error = %e, "failed to remove partial archive");
        }
    }
}

/// Complete snapshots for a project, newest first. Archives without a
/// loadable manifest are skipped entirely: they may be in-progress builds.
pub fn list_snapshots(project: &str, destination_dir: &Path) -> Result<Vec<SnapshotEntry>> {
    if !destination_dir.exists() {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(destination_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stem) = name.strip_suffix(ARCHIVE_SUFFIX) else {
            continue;
        };
        let Some(created_at) = parse_stamp(project, stem) else {
            continue;
        };

        let archive_path = entry.path();
        let manifest = match Manifest::load(&Manifest::path_for(&archive_path)) {
            Ok(manifest) => manifest,
            Err(_) => {
                debug!(archive = %archive_path.display(), "skipping archive without a valid manifest");
                continue;
            }
        };

        found.push(SnapshotEntry {
            stem: stem.to_string(),
            archive_path,
            created_at,
            manifest,
        });
    }

    // Newest first; the stem embeds the stamp, so name order breaks
    // same-second ties deterministically.
    found.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.stem.cmp(&a.stem))
    });
    Ok(found)
}

/// Parse the stamp out of an archive stem like `notes_20260102_030405`.
/// The whole remainder after `{project}_` must be a stamp, so a project
/// named `notes` never claims `notes_daily_...` archives.
fn parse_stamp(project: &str, stem: &str) -> Option<DateTime<Utc>> {
    let rest = stem.strip_prefix(project)?.strip_prefix('_')?;
    let naive = NaiveDateTime::parse_from_str(rest, STAMP_FORMAT).ok()?;
    Some(Utc.from_utc_datetime(&naive))
}

fn truncate_to_second(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(at.timestamp(), 0).single().unwrap_or(at)
}

#[cfg(test)]
pub(crate) use tests::fake_complete_snapshot;
