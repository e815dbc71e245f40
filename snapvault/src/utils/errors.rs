//! Custom error types for snapvault.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Timed out acquiring lock on '{resource}' after {waited_ms} ms")]
    LockTimeout { resource: String, waited_ms: u64 },

    #[error("Lock on '{0}' is not held by this holder")]
    NotOwner(String),

    #[error("A backup for project '{0}' is already in progress")]
    BuildInProgress(String),

    #[error("Backup build failed: {0}")]
    BuildFailed(String),

    #[error("Prune pass failed: {0}")]
    PruneFailure(String),

    #[error("Snapshot is incomplete (missing or invalid manifest): {0}")]
    IncompleteSnapshot(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VaultError>;
