//! snapvault library
//!
//! Pattern-filtered snapshot backups with bounded retention, plus
//! cooperative marker-file locking for anything that must serialize access
//! to a shared file.

pub mod config;
pub mod executor;
pub mod fs;
pub mod lock;
pub mod pattern;
pub mod prune;
pub mod remote;
pub mod restore;
pub mod snapshot;
pub mod utils;

// Re-export commonly used types
pub use config::BackupConfig;
pub use executor::BackupExecutor;
pub use lock::{HolderId, LockManager, LockRecord};
pub use pattern::PatternSet;
pub use snapshot::{Snapshot, SnapshotBuilder};
pub use utils::errors::VaultError;
pub type Result<T> = std::result::Result<T, VaultError>;
