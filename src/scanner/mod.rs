use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::categories::{CategoryRegistry, CleanupCategory, RiskLevel, ScanStrategy};
use crate::policy::{is_file_old_enough, is_path_protected, DEV_CACHE_DIR_NAMES, INSTALLER_EXTENSIONS};
use crate::utils::{dir_size, format_size, system_time_to_datetime};

/// Per-category file listings are capped at this many entries for payload
/// size; `file_count` and `total_size` always reflect the full population.
const MAX_FILES_PER_CATEGORY: usize = 100;

/// One discoverable file or directory. Created by the scanner, consumed by
/// the cleaner; never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
    pub last_accessed: DateTime<Utc>,
    pub is_safe: bool,
    pub risk_level: RiskLevel,
}

impl FileEntry {
    /// Build an entry from file metadata; `None` when the file cannot be
    /// stat-ed (item-level failures are skipped, not surfaced).
    fn from_path(path: &Path, is_safe: bool, risk_level: RiskLevel) -> Option<Self> {
        let meta = path.metadata().ok()?;
        let last_accessed = meta
            .accessed()
            .map(system_time_to_datetime)
            .unwrap_or_else(|_| Utc::now());

        Some(Self {
            path: path.to_path_buf(),
            size: meta.len(),
            last_accessed,
            is_safe,
            risk_level,
        })
    }
}

/// Scan output for one category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryScanResult {
    pub files: Vec<FileEntry>,
    pub total_size: u64,
    pub file_count: usize,
    pub display_name: String,
    pub description: String,
    pub risk_level: RiskLevel,
    pub is_safe_auto: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CategoryScanResult {
    fn from_files(category: &CleanupCategory, mut files: Vec<FileEntry>) -> Self {
        let total_size = files.iter().map(|f| f.size).sum();
        let file_count = files.len();
        // Truncation affects only the returned listing, never the totals.
        files.truncate(MAX_FILES_PER_CATEGORY);

        Self {
            files,
            total_size,
            file_count,
            display_name: category.display_name.to_string(),
            description: category.description.to_string(),
            risk_level: category.risk_level,
            is_safe_auto: category.is_safe_auto,
            error: None,
        }
    }

}

/// Disk-space snapshot of the primary volume.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DiskSpace {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub used_percent: f64,
}

/// Full output of one scan. Produced once per invocation, immutable
/// thereafter; the caller owns persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub categories: BTreeMap<String, CategoryScanResult>,
    pub total_size: u64,
    pub total_files: usize,
    pub disk_info: DiskSpace,
    pub scanned_at: DateTime<Utc>,
}

/// Walks the filesystem per category and inventories reclaimable files.
pub struct DiskScanner {
    host_id: i64,
    registry: CategoryRegistry,
}

impl DiskScanner {
    pub fn new(host_id: i64) -> Self {
        Self::with_registry(host_id, CategoryRegistry::builtin())
    }

    pub fn with_registry(host_id: i64, registry: CategoryRegistry) -> Self {
        Self { host_id, registry }
    }

    /// Scan every registered category and aggregate totals.
    ///
    /// A failure scanning one category is recorded as that category's error
    /// and never aborts the others.
    pub fn scan_all_categories(&self) -> ScanReport {
        info!(host_id = self.host_id, "starting disk scan");

        let mut categories = BTreeMap::new();
        for category in self.registry.iter() {
            debug!(category = category.name, "scanning category");
            categories.insert(category.name.to_string(), self.scan_category(category));
        }

        let total_size = categories.values().map(|c| c.total_size).sum();
        let total_files = categories.values().map(|c| c.file_count).sum();
        let disk_info = disk_space_snapshot();

        info!(
            host_id = self.host_id,
            total_files,
            total = %format_size(total_size),
            "scan completed"
        );

        ScanReport {
            categories,
            total_size,
            total_files,
            disk_info,
            scanned_at: Utc::now(),
        }
    }

    /// Scan one category across all of its resolved roots.
    ///
    /// A root that cannot be read is recorded in the result's `error` and
    /// never discards the findings of the roots already scanned.
    pub fn scan_category(&self, category: &CleanupCategory) -> CategoryScanResult {
        let mut files = Vec::new();
        let mut errors = Vec::new();

        for root in category.discovery.resolve() {
            let scanned = match category.strategy {
                ScanStrategy::AgedWalk {
                    max_depth,
                    min_age_days,
                } => scan_walk(&root, max_depth, Some(min_age_days)),
                ScanStrategy::CacheWalk { max_depth } => scan_walk(&root, max_depth, None),
                ScanStrategy::Aggregate => Ok(scan_aggregate(&root)),
                ScanStrategy::InstallerListing { min_age_days } => {
                    scan_installers(&root, min_age_days)
                }
                ScanStrategy::ThumbnailWalk { max_depth } => scan_thumbnails(&root, max_depth),
                ScanStrategy::DevCacheWalk { max_depth } => scan_dev_cache(&root, max_depth),
            };
            match scanned {
                Ok(mut found) => files.append(&mut found),
                Err(err) => {
                    warn!(
                        category = category.name,
                        root = %root.display(),
                        error = %err,
                        "category root scan failed"
                    );
                    errors.push(err.to_string());
                }
            }
        }

        // Protected paths never appear in a result set, whatever the strategy.
        files.retain(|f| !is_path_protected(&f.path));

        let mut result = CategoryScanResult::from_files(category, files);
        if !errors.is_empty() {
            result.error = Some(errors.join("; "));
        }
        result
    }
}

/// Ensure the category root is readable; an inaccessible root is the one
/// failure that surfaces as a category-level error.
fn check_root_readable(root: &Path) -> anyhow::Result<()> {
    fs::read_dir(root)
        .map(|_| ())
        .with_context(|| format!("Cannot read category root {}", root.display()))
}

/// Recursive walk collecting plain files, optionally filtered by age.
/// Protected subtrees are skipped entirely, not descended into.
fn scan_walk(root: &Path, max_depth: usize, min_age_days: Option<i64>) -> anyhow::Result<Vec<FileEntry>> {
    check_root_readable(root)?;

    let mut files = Vec::new();
    let mut it = WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter();

    while let Some(entry) = it.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(error = %err, "skipping unreadable entry");
                continue;
            }
        };

        if entry.file_type().is_dir() {
            if entry.depth() > 0 && is_path_protected(entry.path()) {
                it.skip_current_dir();
            }
            continue;
        }

        if !entry.file_type().is_file() {
            continue;
        }

        if let Some(days) = min_age_days {
            if !is_file_old_enough(entry.path(), days) {
                continue;
            }
        }

        if let Some(found) = FileEntry::from_path(entry.path(), true, RiskLevel::Low) {
            files.push(found);
        }
    }

    Ok(files)
}

/// Trash roots are not walked per-file: one aggregate entry per root whose
/// size is the recursive total and whose timestamp is the root's own.
fn scan_aggregate(root: &Path) -> Vec<FileEntry> {
    let last_accessed = root
        .metadata()
        .and_then(|meta| meta.accessed())
        .map(system_time_to_datetime)
        .unwrap_or_else(|_| Utc::now());

    vec![FileEntry {
        path: root.to_path_buf(),
        size: dir_size(root),
        last_accessed,
        is_safe: true,
        risk_level: RiskLevel::Low,
    }]
}

/// Non-recursive listing filtered to installer-like extensions and age.
/// These require explicit review before deletion.
fn scan_installers(root: &Path, min_age_days: i64) -> anyhow::Result<Vec<FileEntry>> {
    let entries = fs::read_dir(root)
        .with_context(|| format!("Cannot read category root {}", root.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let path = entry.path();

        if !path.is_file() || !has_installer_extension(&path) {
            continue;
        }

        if !is_file_old_enough(&path, min_age_days) {
            continue;
        }

        if let Some(found) = FileEntry::from_path(&path, false, RiskLevel::Medium) {
            files.push(found);
        }
    }

    Ok(files)
}

fn has_installer_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| INSTALLER_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Recursive walk collecting thumbnail cache files by name.
fn scan_thumbnails(root: &Path, max_depth: usize) -> anyhow::Result<Vec<FileEntry>> {
    check_root_readable(root)?;

    let mut files = Vec::new();
    let mut it = WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter();

    while let Some(entry) = it.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };

        if entry.file_type().is_dir() {
            if entry.depth() > 0 && is_path_protected(entry.path()) {
                it.skip_current_dir();
            }
            continue;
        }

        if !entry.file_type().is_file() || !is_thumbnail_name(&entry.file_name().to_string_lossy())
        {
            continue;
        }

        if let Some(found) = FileEntry::from_path(entry.path(), true, RiskLevel::Low) {
            files.push(found);
        }
    }

    Ok(files)
}

fn is_thumbnail_name(name: &str) -> bool {
    name.starts_with("thumbcache") || name.ends_with(".db")
}

/// Recursive walk that records a whole build/cache directory as one entry
/// (its total recursive size) and prunes further descent into it.
fn scan_dev_cache(root: &Path, max_depth: usize) -> anyhow::Result<Vec<FileEntry>> {
    check_root_readable(root)?;

    let mut files = Vec::new();
    let mut it = WalkDir::new(root)
        .max_depth(max_depth)
        .follow_links(false)
        .into_iter();

    while let Some(entry) = it.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };

        if !entry.file_type().is_dir() || entry.depth() == 0 {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if DEV_CACHE_DIR_NAMES.contains(&name.as_ref()) {
            files.push(FileEntry {
                path: entry.path().to_path_buf(),
                size: dir_size(entry.path()),
                last_accessed: Utc::now(),
                is_safe: false,
                risk_level: RiskLevel::High,
            });
            it.skip_current_dir();
        }
    }

    Ok(files)
}

#[cfg(windows)]
const PRIMARY_VOLUME: &str = "C:\\";
#[cfg(not(windows))]
const PRIMARY_VOLUME: &str = "/";

/// Queried once per full scan; failure yields an all-zero snapshot rather
/// than failing the scan.
fn disk_space_snapshot() -> DiskSpace {
    let total = fs2::total_space(PRIMARY_VOLUME);
    let free = fs2::available_space(PRIMARY_VOLUME);

    match (total, free) {
        (Ok(total), Ok(free)) if total > 0 => {
            let used = total.saturating_sub(free);
            let used_percent = (used as f64 / total as f64 * 10_000.0).round() / 100.0;
            DiskSpace {
                total,
                used,
                free,
                used_percent,
            }
        }
        (total, free) => {
            warn!(
                total_err = total.is_err(),
                free_err = free.is_err(),
                "could not read disk space, reporting zeros"
            );
            DiskSpace::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::PathDiscovery;
    use std::fs;
    use tempfile::TempDir;

    fn category(
        name: &'static str,
        roots: Vec<PathBuf>,
        strategy: ScanStrategy,
    ) -> CleanupCategory {
        CleanupCategory {
            name,
            display_name: name,
            description: "test category",
            risk_level: RiskLevel::Low,
            is_safe_auto: true,
            discovery: PathDiscovery::Fixed(roots),
            strategy,
        }
    }

    #[test]
    fn listing_is_truncated_but_totals_are_not() {
        let temp = TempDir::new().unwrap();
        for i in 0..120 {
            fs::write(temp.path().join(format!("f{i}")), vec![0u8; 10]).unwrap();
        }

        let cat = category(
            "browser_cache",
            vec![temp.path().to_path_buf()],
            ScanStrategy::CacheWalk { max_depth: 2 },
        );
        let scanner = DiskScanner::with_registry(1, CategoryRegistry::new(vec![cat.clone()]));
        let result = scanner.scan_category(&cat);

        assert_eq!(result.files.len(), 100);
        assert_eq!(result.file_count, 120);
        assert_eq!(result.total_size, 1200);

        let report = scanner.scan_all_categories();
        assert_eq!(report.total_files, 120);
        assert_eq!(report.total_size, 1200);
    }

    #[test]
    fn aged_walk_excludes_fresh_files() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("fresh.tmp"), "x").unwrap();

        let cat = category(
            "temp_files",
            vec![temp.path().to_path_buf()],
            ScanStrategy::AgedWalk {
                max_depth: 3,
                min_age_days: 7,
            },
        );
        let scanner = DiskScanner::with_registry(1, CategoryRegistry::new(vec![cat.clone()]));
        let result = scanner.scan_category(&cat);
        assert_eq!(result.file_count, 0);

        // A zero-day threshold includes anything stat-able.
        let cat = category(
            "temp_files",
            vec![temp.path().to_path_buf()],
            ScanStrategy::AgedWalk {
                max_depth: 3,
                min_age_days: 0,
            },
        );
        let result = scanner.scan_category(&cat);
        assert_eq!(result.file_count, 1);
    }

    #[test]
    fn walk_respects_depth_cap() {
        let temp = TempDir::new().unwrap();
        let shallow = temp.path().join("a");
        let deep = temp.path().join("a/b/c");
        fs::create_dir_all(&deep).unwrap();
        fs::write(shallow.join("close"), "x").unwrap();
        fs::write(deep.join("far"), "x").unwrap();

        let cat = category(
            "browser_cache",
            vec![temp.path().to_path_buf()],
            ScanStrategy::CacheWalk { max_depth: 2 },
        );
        let scanner = DiskScanner::with_registry(1, CategoryRegistry::new(vec![cat.clone()]));
        let result = scanner.scan_category(&cat);

        assert_eq!(result.file_count, 1);
        assert!(result.files[0].path.ends_with("close"));
    }

    #[test]
    fn aggregate_reports_single_entry_with_recursive_size() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("deleted-stuff");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp.path().join("one"), vec![0u8; 5]).unwrap();
        fs::write(nested.join("two"), vec![0u8; 7]).unwrap();

        let cat = category(
            "trash",
            vec![temp.path().to_path_buf()],
            ScanStrategy::Aggregate,
        );
        let scanner = DiskScanner::with_registry(1, CategoryRegistry::new(vec![cat.clone()]));
        let result = scanner.scan_category(&cat);

        assert_eq!(result.file_count, 1);
        assert_eq!(result.total_size, 12);
        assert_eq!(result.files[0].path, temp.path());

        // The entry carries the root's own access time, not the scan time.
        let expected =
            system_time_to_datetime(temp.path().metadata().unwrap().accessed().unwrap());
        let delta = result.files[0].last_accessed - expected;
        assert!(delta.num_seconds().abs() <= 2);
    }

    #[test]
    fn installer_listing_filters_extension_and_flags_risk() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("setup.deb"), vec![0u8; 4]).unwrap();
        fs::write(temp.path().join("notes.txt"), "x").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();
        fs::write(temp.path().join("sub/nested.deb"), "x").unwrap();

        let cat = category(
            "installers",
            vec![temp.path().to_path_buf()],
            ScanStrategy::InstallerListing { min_age_days: 0 },
        );
        let scanner = DiskScanner::with_registry(1, CategoryRegistry::new(vec![cat.clone()]));
        let result = scanner.scan_category(&cat);

        // Non-recursive: the nested installer is not listed.
        assert_eq!(result.file_count, 1);
        let entry = &result.files[0];
        assert!(entry.path.ends_with("setup.deb"));
        assert!(!entry.is_safe);
        assert_eq!(entry.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn dev_cache_records_whole_directory_and_prunes() {
        let temp = TempDir::new().unwrap();
        let node_modules = temp.path().join("proj/node_modules");
        fs::create_dir_all(node_modules.join("leftpad")).unwrap();
        fs::write(node_modules.join("leftpad/index.js"), vec![0u8; 30]).unwrap();
        fs::write(node_modules.join("pkg.json"), vec![0u8; 12]).unwrap();
        fs::write(temp.path().join("proj/main.js"), "x").unwrap();

        let cat = category(
            "dev_cache",
            vec![temp.path().to_path_buf()],
            ScanStrategy::DevCacheWalk { max_depth: 4 },
        );
        let scanner = DiskScanner::with_registry(1, CategoryRegistry::new(vec![cat.clone()]));
        let result = scanner.scan_category(&cat);

        assert_eq!(result.file_count, 1);
        let entry = &result.files[0];
        assert!(entry.path.ends_with("node_modules"));
        assert_eq!(entry.size, 42);
        assert!(!entry.is_safe);
        assert_eq!(entry.risk_level, RiskLevel::High);
    }

    #[test]
    fn thumbnail_walk_filters_by_name() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("thumbcache_32.db"), "x").unwrap();
        fs::write(temp.path().join("index.db"), "x").unwrap();
        fs::write(temp.path().join("photo.jpg"), "x").unwrap();

        let cat = category(
            "thumbnails",
            vec![temp.path().to_path_buf()],
            ScanStrategy::ThumbnailWalk { max_depth: 3 },
        );
        let scanner = DiskScanner::with_registry(1, CategoryRegistry::new(vec![cat.clone()]));
        let result = scanner.scan_category(&cat);

        assert_eq!(result.file_count, 2);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_root_is_isolated_as_category_error() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let locked = temp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Running as root makes the directory readable anyway; nothing to test.
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let open = temp.path().join("open");
        fs::create_dir(&open).unwrap();
        fs::write(open.join("f"), vec![0u8; 3]).unwrap();

        let registry = CategoryRegistry::new(vec![
            category(
                "locked_cache",
                vec![locked.clone()],
                ScanStrategy::CacheWalk { max_depth: 2 },
            ),
            category(
                "open_cache",
                vec![open],
                ScanStrategy::CacheWalk { max_depth: 2 },
            ),
        ]);
        let scanner = DiskScanner::with_registry(1, registry);
        let report = scanner.scan_all_categories();

        let failed = &report.categories["locked_cache"];
        assert!(failed.error.is_some());
        assert_eq!(failed.file_count, 0);

        let ok = &report.categories["open_cache"];
        assert!(ok.error.is_none());
        assert_eq!(ok.file_count, 1);
        assert_eq!(report.total_files, 1);

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn failing_root_keeps_findings_from_other_roots() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let open = temp.path().join("open");
        fs::create_dir(&open).unwrap();
        fs::write(open.join("f"), vec![0u8; 3]).unwrap();

        let locked = temp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Running as root makes the directory readable anyway; nothing to test.
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let cat = category(
            "browser_cache",
            vec![open, locked.clone()],
            ScanStrategy::CacheWalk { max_depth: 2 },
        );
        let scanner = DiskScanner::with_registry(1, CategoryRegistry::new(vec![cat.clone()]));
        let result = scanner.scan_category(&cat);

        assert_eq!(result.file_count, 1);
        assert_eq!(result.total_size, 3);
        assert!(result.error.is_some());

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn report_serializes_expected_shape() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("blob"), vec![0u8; 9]).unwrap();

        let cat = category(
            "browser_cache",
            vec![temp.path().to_path_buf()],
            ScanStrategy::CacheWalk { max_depth: 2 },
        );
        let scanner = DiskScanner::with_registry(7, CategoryRegistry::new(vec![cat]));
        let report = scanner.scan_all_categories();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["total_files"], 1);
        assert_eq!(json["total_size"], 9);
        let cat_json = &json["categories"]["browser_cache"];
        assert_eq!(cat_json["file_count"], 1);
        assert_eq!(cat_json["risk_level"], "low");
        assert!(cat_json["files"][0]["path"].is_string());
        assert!(json["disk_info"]["total"].is_u64());
    }
}
