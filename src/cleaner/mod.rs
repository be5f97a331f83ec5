use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::categories::CategoryRegistry;
use crate::error::{Error, Result};
use crate::policy::is_path_protected;
use crate::scanner::FileEntry;
use crate::utils::{format_size, system_time_to_datetime};

const BACKUP_MANIFEST_FILENAME: &str = "backup_manifest.jsonl";

/// Environment override for the backup root location.
pub const BACKUP_DIR_ENV: &str = "DISK_RECLAIM_BACKUP_DIR";

/// One backed-up item: the mapping that makes rollback restorative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub category: String,
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

/// Output of a cleanup run. `files_deleted` and `size_freed` only count
/// items whose deletion actually succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResult {
    pub files_deleted: usize,
    pub size_freed: u64,
    pub backup_path: Option<PathBuf>,
    pub errors: Vec<String>,
}

/// Output of a rollback run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResult {
    pub files_restored: usize,
    pub errors: Vec<String>,
}

/// Deletes selected categories with an optional backup safety net.
///
/// Backup is best-effort, deletion is authoritative: a failed backup never
/// blocks a delete, and a failed delete never corrupts the counters.
pub struct DiskCleaner {
    host_id: i64,
    scan_id: i64,
    registry: CategoryRegistry,
    backup_root: PathBuf,
    backup_path: Option<PathBuf>,
}

impl DiskCleaner {
    pub fn new(host_id: i64, scan_id: i64) -> Result<Self> {
        Self::with_backup_root(host_id, scan_id, default_backup_root())
    }

    pub fn with_backup_root(host_id: i64, scan_id: i64, backup_root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&backup_root)?;
        Ok(Self {
            host_id,
            scan_id,
            registry: CategoryRegistry::builtin(),
            backup_root,
            backup_path: None,
        })
    }

    /// Backup directory of the current run, if one was created.
    pub fn backup_path(&self) -> Option<&Path> {
        self.backup_path.as_deref()
    }

    /// Clean the given categories, in request order.
    ///
    /// All names are validated against the registry before anything is
    /// touched; an unknown name aborts the whole request. Per-item failures
    /// are collected into the result's `errors` and never abort the batch.
    pub fn cleanup_categories(
        &mut self,
        names: &[String],
        files_by_category: &HashMap<String, Vec<FileEntry>>,
        create_backup: bool,
    ) -> Result<CleanupResult> {
        for name in names {
            self.registry.get(name)?;
        }

        info!(
            host_id = self.host_id,
            scan_id = self.scan_id,
            categories = ?names,
            create_backup,
            "starting cleanup"
        );

        self.backup_path = if create_backup {
            let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
            let dir = self
                .backup_root
                .join(format!("scan_{}_{}", self.scan_id, timestamp));
            fs::create_dir_all(&dir)?;
            info!(backup = %dir.display(), "backup directory created");
            Some(dir)
        } else {
            None
        };

        let mut result = CleanupResult {
            files_deleted: 0,
            size_freed: 0,
            backup_path: self.backup_path.clone(),
            errors: Vec::new(),
        };

        for name in names {
            let category = self.registry.get(name)?;
            let Some(files) = files_by_category.get(name) else {
                warn!(category = %name, "category not present in scan results, skipping");
                continue;
            };

            info!(
                category = category.display_name,
                items = files.len(),
                "cleaning category"
            );
            self.clean_category(name, files, &mut result);
        }

        info!(
            files_deleted = result.files_deleted,
            freed = %format_size(result.size_freed),
            errors = result.errors.len(),
            "cleanup completed"
        );

        Ok(result)
    }

    fn clean_category(&self, name: &str, files: &[FileEntry], result: &mut CleanupResult) {
        for entry in files {
            let path = &entry.path;

            if is_path_protected(path) {
                warn!(path = %path.display(), "skipping protected path");
                continue;
            }

            // Scan and cleanup are temporally decoupled; a vanished path is
            // expected, not an error.
            if !path.exists() {
                debug!(path = %path.display(), "path no longer exists");
                continue;
            }

            if let Some(backup_dir) = &self.backup_path {
                if let Err(err) = self.backup_item(backup_dir, name, entry) {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "backup failed, deleting anyway"
                    );
                }
            }

            let deleted = if path.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };

            match deleted {
                Ok(()) => {
                    result.files_deleted += 1;
                    // Size recorded at scan time; the item is gone now.
                    result.size_freed += entry.size;
                    debug!(path = %path.display(), "deleted");
                }
                Err(err) => {
                    let msg = format!("Failed to delete {}: {}", path.display(), err);
                    warn!("{msg}");
                    result.errors.push(msg);
                }
            }
        }
    }

    /// Copy an item into the per-category backup subdirectory and record it
    /// in the manifest. Failures here are logged by the caller and never
    /// prevent deletion.
    fn backup_item(
        &self,
        backup_dir: &Path,
        category: &str,
        entry: &FileEntry,
    ) -> anyhow::Result<()> {
        let category_dir = backup_dir.join(category);
        fs::create_dir_all(&category_dir).with_context(|| {
            format!(
                "Failed to create backup category directory: {}",
                category_dir.display()
            )
        })?;

        let item_name = entry
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "item".into());
        let dest = unique_backup_dest(&category_dir, &item_name);

        if entry.path.is_dir() {
            copy_dir_all(&entry.path, &dest)?;
        } else {
            fs::copy(&entry.path, &dest).with_context(|| {
                format!(
                    "Failed to back up {} -> {}",
                    entry.path.display(),
                    dest.display()
                )
            })?;
        }
        debug!(from = %entry.path.display(), to = %dest.display(), "backed up");

        append_manifest(
            backup_dir,
            &BackupEntry {
                category: category.to_string(),
                original_path: entry.path.clone(),
                backup_path: dest,
                size: entry.size,
                created_at: Utc::now(),
            },
        )
    }

    /// Restore a prior cleanup from its backup.
    ///
    /// Requires that this cleaner created a backup that still exists on
    /// disk; fails with `NoBackupAvailable` otherwise.
    pub fn rollback(&self, cleanup_operation_id: i64) -> Result<RollbackResult> {
        info!(cleanup_operation_id, "starting rollback");

        let backup = self
            .backup_path
            .as_deref()
            .filter(|p| p.exists())
            .ok_or(Error::NoBackupAvailable)?;

        restore_backup(backup)
    }

    /// Remove backup run directories older than the retention window.
    ///
    /// A failure enumerating the backup root aborts only this housekeeping
    /// pass; per-directory removal failures are logged and skipped.
    pub fn cleanup_old_backups(&self, days_to_keep: i64) -> Result<()> {
        info!(days_to_keep, "cleaning up old backups");
        let cutoff = Utc::now() - Duration::days(days_to_keep);

        for entry in fs::read_dir(&self.backup_root)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let modified = match entry.metadata().and_then(|m| m.modified()) {
                Ok(m) => system_time_to_datetime(m),
                Err(_) => continue,
            };

            if modified < cutoff {
                info!(backup = %path.display(), "removing old backup");
                if let Err(err) = fs::remove_dir_all(&path) {
                    warn!(backup = %path.display(), error = %err, "failed to remove old backup");
                }
            }
        }

        Ok(())
    }
}

/// Restore every item recorded in a backup directory's manifest.
///
/// Items are copied (not moved) back to their original absolute paths, so
/// a backup can be replayed and survives cross-device moves. An item whose
/// original path already exists is skipped and reported, never overwritten.
pub fn restore_backup(backup_path: &Path) -> Result<RollbackResult> {
    if !backup_path.exists() {
        return Err(Error::NoBackupAvailable);
    }

    let entries = load_manifest(backup_path)?;
    let mut result = RollbackResult {
        files_restored: 0,
        errors: Vec::new(),
    };

    if entries.is_empty() {
        result
            .errors
            .push(format!("No backup manifest in {}", backup_path.display()));
        return Ok(result);
    }

    for entry in entries {
        if !entry.backup_path.exists() {
            result.errors.push(format!(
                "Backup copy missing: {}",
                entry.backup_path.display()
            ));
            continue;
        }

        if entry.original_path.exists() {
            result.errors.push(format!(
                "Restore target already exists: {}",
                entry.original_path.display()
            ));
            continue;
        }

        match restore_item(&entry) {
            Ok(()) => {
                result.files_restored += 1;
                debug!(path = %entry.original_path.display(), "restored");
            }
            Err(err) => {
                result.errors.push(format!(
                    "Failed to restore {}: {}",
                    entry.original_path.display(),
                    err
                ));
            }
        }
    }

    info!(
        files_restored = result.files_restored,
        errors = result.errors.len(),
        "rollback completed"
    );

    Ok(result)
}

fn restore_item(entry: &BackupEntry) -> anyhow::Result<()> {
    if let Some(parent) = entry.original_path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "Failed to create restore parent directory: {}",
                parent.display()
            )
        })?;
    }

    if entry.backup_path.is_dir() {
        copy_dir_all(&entry.backup_path, &entry.original_path)?;
    } else {
        fs::copy(&entry.backup_path, &entry.original_path).with_context(|| {
            format!(
                "Failed to copy {} -> {}",
                entry.backup_path.display(),
                entry.original_path.display()
            )
        })?;
    }

    Ok(())
}

fn default_backup_root() -> PathBuf {
    if let Ok(custom) = std::env::var(BACKUP_DIR_ENV) {
        if !custom.is_empty() {
            return PathBuf::from(custom);
        }
    }

    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("disk-reclaim")
        .join("cleanup_backup")
}

/// Resolve a collision-free destination inside the backup category
/// directory by appending `_1`, `_2`, … before the extension.
fn unique_backup_dest(dir: &Path, file_name: &OsStr) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let base = Path::new(file_name);
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "item".to_string());
    let ext = base
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut counter = 1;
    loop {
        let candidate = dir.join(format!("{stem}_{counter}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

fn copy_dir_all(src: &Path, dest: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;

    for entry in fs::read_dir(src)
        .with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let to = dest.join(entry.file_name());

        if file_type.is_dir() {
            copy_dir_all(&entry.path(), &to)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &to).with_context(|| {
                format!("Failed to copy {} -> {}", entry.path().display(), to.display())
            })?;
        }
    }

    Ok(())
}

fn append_manifest(backup_dir: &Path, entry: &BackupEntry) -> anyhow::Result<()> {
    let manifest_path = backup_dir.join(BACKUP_MANIFEST_FILENAME);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&manifest_path)
        .with_context(|| format!("Failed to open manifest: {}", manifest_path.display()))?;

    serde_json::to_writer(&mut file, entry)?;
    writeln!(&mut file)?;
    Ok(())
}

fn load_manifest(backup_dir: &Path) -> Result<Vec<BackupEntry>> {
    let manifest_path = backup_dir.join(BACKUP_MANIFEST_FILENAME);
    let content = match fs::read_to_string(&manifest_path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut entries = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // A torn line from an interrupted run is skipped, not fatal.
        if let Ok(entry) = serde_json::from_str::<BackupEntry>(line) {
            entries.push(entry);
        }
    }

    Ok(entries)
}
