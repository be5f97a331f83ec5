//! Disk-space analysis and reclamation.
//!
//! A scanner inventories reclaimable files on a host by category, and a
//! cleaner deletes selected categories with a backup/rollback safety net.
//! Persistence, HTTP endpoints, and background scheduling belong to the
//! calling layer; this crate only produces and consumes the structured
//! results they record.

pub mod categories;
pub mod cleaner;
pub mod error;
pub mod policy;
pub mod scanner;
pub mod utils;

// Re-export commonly used types
pub use categories::{CategoryRegistry, CleanupCategory, PathDiscovery, RiskLevel, ScanStrategy};
pub use cleaner::{restore_backup, BackupEntry, CleanupResult, DiskCleaner, RollbackResult};
pub use error::{Error, Result};
pub use scanner::{CategoryScanResult, DiskScanner, DiskSpace, FileEntry, ScanReport};
