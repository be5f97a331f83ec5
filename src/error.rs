use thiserror::Error;

/// Failures surfaced to callers as values. Item-level filesystem problems
/// during a scan or clean pass are reported inside the results instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Unknown cleanup category: {0}")]
    CategoryNotFound(String),

    #[error("No backup available to restore")]
    NoBackupAvailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backup manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
