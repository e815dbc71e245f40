//! Snapshot manifests.
//!
//! The manifest is the sidecar record written after an archive is fully on
//! disk. Its presence is the "snapshot complete" signal: an archive without
//! a loadable manifest is incomplete and is neither counted, pruned, nor
//! restored.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::errors::{Result, VaultError};

/// Container suffix for snapshot archives.
pub const ARCHIVE_SUFFIX: &str = ".tar.zst";

/// Sidecar suffix, sharing the archive's stem.
pub const MANIFEST_SUFFIX: &str = ".manifest.json";

const MANIFEST_VERSION: u32 = 1;

/// Metadata committed alongside an archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    pub project: String,
    pub created_at: DateTime<Utc>,
    pub source_root: PathBuf,
    pub file_count: usize,
    pub total_bytes: u64,
}

impl Manifest {
    pub fn new(
        project: &str,
        created_at: DateTime<Utc>,
        source_root: &Path,
        file_count: usize,
        total_bytes: u64,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            project: project.to_string(),
            created_at,
            source_root: source_root.to_path_buf(),
            file_count,
            total_bytes,
        }
    }

    /// Manifest path for an archive: same stem, manifest suffix.
    pub fn path_for(archive: &Path) -> PathBuf {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(&name);
        archive.with_file_name(format!("{stem}{MANIFEST_SUFFIX}"))
    }

    /// Write the manifest via a temp file and rename, so it appears
    /// atomically next to its archive.
    pub fn store(&self, manifest_path: &Path) -> Result<()> {
        let mut tmp_os = manifest_path.as_os_str().to_os_string();
        tmp_os.push(".tmp");
        let tmp = PathBuf::from(tmp_os);

        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, manifest_path)?;
        Ok(())
    }

    /// Load a manifest. Any read or parse failure means the snapshot never
    /// completed.
    pub fn load(manifest_path: &Path) -> Result<Self> {
        let incomplete = || VaultError::IncompleteSnapshot(manifest_path.display().to_string());
        let contents = fs::read_to_string(manifest_path).map_err(|_| incomplete())?;
        serde_json::from_str(&contents).map_err(|_| incomplete())
    }
}
