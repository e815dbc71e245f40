//! Backup configuration.
//!
//! Loaded from a TOML file or assembled in code; validated in full before
//! any filesystem mutation happens.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fs::walker::WalkOptions;
use crate::pattern::PatternSet;
use crate::utils::errors::{Result, VaultError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Project name; becomes the archive name prefix and the lock resource.
    pub project_name: String,

    /// Tree to snapshot.
    pub source_root: PathBuf,

    /// Directory receiving archives and manifests.
    pub destination_dir: PathBuf,

    /// Include glob rules; empty means include everything.
    #[serde(default)]
    pub include: Vec<String>,

    /// Exclude glob rules; an exclude match always wins.
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,

    /// How many complete snapshots to retain.
    #[serde(default = "default_keep")]
    pub keep: usize,

    /// How long to wait for the per-project build lock.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Age past which an unreleased lock may be reclaimed.
    #[serde(default = "default_staleness_secs")]
    pub staleness_secs: u64,

    /// Compression level (1-22 for zstd)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,

    /// Follow symbolic links while walking the source tree.
    #[serde(default)]
    pub follow_links: bool,
}

// Default values
fn default_exclude() -> Vec<String> {
    [".git", "__pycache__", ".venv", "node_modules"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_keep() -> usize {
    5
}

fn default_lock_timeout_secs() -> u64 {
    // Builds are slow; waiting out a finishing build is the common case.
    300
}

fn default_staleness_secs() -> u64 {
    3600
}

fn default_compression_level() -> i32 {
    3
}

impl BackupConfig {
    /// Minimal config with defaults for everything optional.
    pub fn new(
        project_name: impl Into<String>,
        source_root: impl Into<PathBuf>,
        destination_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project_name: project_name.into(),
            source_root: source_root.into(),
            destination_dir: destination_dir.into(),
            include: Vec::new(),
            exclude: default_exclude(),
            keep: default_keep(),
            lock_timeout_secs: default_lock_timeout_secs(),
            staleness_secs: default_staleness_secs(),
            compression_level: default_compression_level(),
            follow_links: false,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            VaultError::InvalidConfiguration(format!("reading config {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            VaultError::InvalidConfiguration(format!("parsing config {}: {e}", path.display()))
        })
    }

    /// Check everything that can be checked before touching the
    /// filesystem. Runs before any build, so a bad config never mutates
    /// the destination.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(VaultError::InvalidConfiguration(msg));

        if self.project_name.is_empty() {
            return invalid("project_name must not be empty".to_string());
        }
        if !self
            .project_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return invalid(format!(
                "project_name '{}' may only contain alphanumerics, '-', '_' and '.'",
                self.project_name
            ));
        }
        if self.keep == 0 {
            return invalid("keep must be at least 1".to_string());
        }
        if self.staleness_secs == 0 {
            return invalid("staleness_secs must be at least 1".to_string());
        }
        if !(1..=22).contains(&self.compression_level) {
            return invalid(format!(
                "compression_level {} is outside 1-22",
                self.compression_level
            ));
        }
        if !self.source_root.is_dir() {
            return invalid(format!(
                "source root {} is not a directory",
                self.source_root.display()
            ));
        }
        std::fs::read_dir(&self.source_root).map_err(|e| {
            VaultError::InvalidConfiguration(format!(
                "source root {} is not readable: {e}",
                self.source_root.display()
            ))
        })?;

        // Compiling the rules surfaces bad globs here, not at match time.
        self.pattern_set()?;
        Ok(())
    }

    pub fn pattern_set(&self) -> Result<PatternSet> {
        PatternSet::new(&self.include, &self.exclude)
    }

    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            follow_links: self.follow_links,
            max_depth: None,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn staleness_threshold(&self) -> Duration {
        Duration::from_secs(self.staleness_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn valid_config(source: &Path, dest: &Path) -> BackupConfig {
        BackupConfig::new("proj", source, dest)
    }

    #[test]
    fn defaults_are_sensible() {
        let dir = TempDir::new().unwrap();
        let config = valid_config(dir.path(), dir.path());
        assert_eq!(config.keep, 5);
        assert_eq!(config.compression_level, 3);
        assert!(config.exclude.contains(&".git".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_file_applies_serde_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.toml");
        std::fs::write(
            &path,
            format!(
                "project_name = \"proj\"\nsource_root = \"{}\"\ndestination_dir = \"{}\"\n",
                dir.path().display(),
                dir.path().display()
            ),
        )
        .unwrap();

        let config = BackupConfig::from_file(&path).unwrap();
        assert_eq!(config.keep, 5);
        assert_eq!(config.lock_timeout_secs, 300);
        assert!(config.include.is_empty());
    }

    #[test]
    fn unparseable_file_is_invalid_configuration() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backup.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let err = BackupConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, VaultError::InvalidConfiguration(_)));
    }

    #[test]
    fn keep_zero_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(dir.path(), dir.path());
        config.keep = 0;
        assert!(matches!(
            config.validate(),
            Err(VaultError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn missing_source_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = valid_config(&dir.path().join("gone"), dir.path());
        assert!(matches!(
            config.validate(),
            Err(VaultError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn project_name_with_separators_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(dir.path(), dir.path());
        config.project_name = "a/b".to_string();
        assert!(matches!(
            config.validate(),
            Err(VaultError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn bad_glob_is_rejected_at_validation() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(dir.path(), dir.path());
        config.exclude.push("[".to_string());
        assert!(matches!(
            config.validate(),
            Err(VaultError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn out_of_range_compression_level_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(dir.path(), dir.path());
        config.compression_level = 0;
        assert!(matches!(
            config.validate(),
            Err(VaultError::InvalidConfiguration(_))
        ));
    }
}
