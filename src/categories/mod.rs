use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Qualitative hazard tag guiding whether auto-cleanup is permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// How a category's root directories are discovered on the host.
///
/// One variant per category rather than a trait object: the set of
/// discovery behaviors is closed and known at compile time. `Fixed` exists
/// for custom registries and tests.
#[derive(Debug, Clone)]
pub enum PathDiscovery {
    TempDirs,
    BrowserCaches,
    TrashDirs,
    UpdateCaches,
    Downloads,
    ThumbnailCaches,
    DevRoots,
    Fixed(Vec<PathBuf>),
}

impl PathDiscovery {
    /// Resolve root directories from the host environment.
    ///
    /// Only directories that currently exist are returned. Never fails: a
    /// category whose locations cannot be resolved contributes zero paths.
    pub fn resolve(&self) -> Vec<PathBuf> {
        let candidates = match self {
            Self::TempDirs => temp_dir_candidates(),
            Self::BrowserCaches => browser_cache_candidates(),
            Self::TrashDirs => trash_candidates(),
            Self::UpdateCaches => update_cache_candidates(),
            Self::Downloads => download_candidates(),
            Self::ThumbnailCaches => thumbnail_cache_candidates(),
            Self::DevRoots => dev_root_candidates(),
            Self::Fixed(paths) => paths.clone(),
        };

        let mut existing = Vec::new();
        for path in candidates {
            if path.is_dir() && !existing.contains(&path) {
                existing.push(path);
            }
        }
        existing
    }
}

fn temp_dir_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![std::env::temp_dir()];
    for var in ["TMPDIR", "TEMP", "TMP"] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                candidates.push(PathBuf::from(value));
            }
        }
    }
    candidates
}

fn browser_cache_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(cache) = dirs::cache_dir() {
        for rel in [
            "google-chrome",
            "chromium",
            "mozilla/firefox",
            "Google/Chrome/User Data/Default/Cache",
            "Microsoft/Edge/User Data/Default/Cache",
        ] {
            candidates.push(cache.join(rel));
        }
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join("Library/Caches/Google/Chrome"));
        candidates.push(home.join("Library/Caches/Firefox"));
    }
    candidates
}

fn trash_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(data) = dirs::data_dir() {
        candidates.push(data.join("Trash"));
    }
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".Trash"));
    }
    #[cfg(windows)]
    candidates.push(PathBuf::from(r"C:\$Recycle.Bin"));
    candidates
}

fn update_cache_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    #[cfg(windows)]
    candidates.push(PathBuf::from(r"C:\Windows\SoftwareDistribution\Download"));
    #[cfg(target_os = "macos")]
    candidates.push(PathBuf::from("/Library/Updates"));
    #[cfg(all(unix, not(target_os = "macos")))]
    {
        candidates.push(PathBuf::from("/var/cache/apt/archives"));
        candidates.push(PathBuf::from("/var/cache/dnf"));
        candidates.push(PathBuf::from("/var/cache/pacman/pkg"));
    }
    candidates
}

fn download_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(downloads) = dirs::download_dir() {
        candidates.push(downloads);
    } else if let Some(home) = dirs::home_dir() {
        candidates.push(home.join("Downloads"));
    }
    candidates
}

fn thumbnail_cache_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(cache) = dirs::cache_dir() {
        candidates.push(cache.join("thumbnails"));
        candidates.push(cache.join("Microsoft/Windows/Explorer"));
    }
    candidates
}

fn dev_root_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join("Projects"));
        candidates.push(home.join("src"));
    }
    for dir in [dirs::document_dir(), dirs::desktop_dir()]
        .into_iter()
        .flatten()
    {
        candidates.push(dir);
    }
    candidates
}

/// Category-specific scanning logic, selected by the scanner.
#[derive(Debug, Clone, Copy)]
pub enum ScanStrategy {
    /// Recursive walk; include files at least `min_age_days` old.
    AgedWalk { max_depth: usize, min_age_days: i64 },
    /// Recursive walk; presence alone qualifies.
    CacheWalk { max_depth: usize },
    /// No per-file listing: one entry per root with its recursive size.
    Aggregate,
    /// Non-recursive listing filtered to installer extensions and age.
    InstallerListing { min_age_days: i64 },
    /// Recursive walk; thumbnail-named files only.
    ThumbnailWalk { max_depth: usize },
    /// Recursive walk; a matching directory name becomes one entry and is
    /// not descended into.
    DevCacheWalk { max_depth: usize },
}

/// A named class of reclaimable filesystem content.
#[derive(Debug, Clone)]
pub struct CleanupCategory {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub risk_level: RiskLevel,
    pub is_safe_auto: bool,
    pub discovery: PathDiscovery,
    pub strategy: ScanStrategy,
}

/// Ordered, immutable catalog of cleanup categories.
///
/// Built once at startup; lookups are read-only afterwards.
#[derive(Debug, Clone)]
pub struct CategoryRegistry {
    categories: Vec<CleanupCategory>,
}

impl CategoryRegistry {
    pub fn new(categories: Vec<CleanupCategory>) -> Self {
        Self { categories }
    }

    /// The categories shipped with the system.
    pub fn builtin() -> Self {
        Self::new(vec![
            CleanupCategory {
                name: "temp_files",
                display_name: "Temporary Files",
                description: "Temporary files and folders older than a week",
                risk_level: RiskLevel::Low,
                is_safe_auto: true,
                discovery: PathDiscovery::TempDirs,
                strategy: ScanStrategy::AgedWalk {
                    max_depth: 3,
                    min_age_days: 7,
                },
            },
            CleanupCategory {
                name: "browser_cache",
                display_name: "Browser Cache",
                description: "Cached files from web browsers (Chrome, Edge, Firefox)",
                risk_level: RiskLevel::Low,
                is_safe_auto: true,
                discovery: PathDiscovery::BrowserCaches,
                strategy: ScanStrategy::CacheWalk { max_depth: 2 },
            },
            CleanupCategory {
                name: "trash",
                display_name: "Trash",
                description: "Files sitting in the trash / recycle bin",
                risk_level: RiskLevel::Low,
                is_safe_auto: false,
                discovery: PathDiscovery::TrashDirs,
                strategy: ScanStrategy::Aggregate,
            },
            CleanupCategory {
                name: "update_cache",
                display_name: "OS Update Cache",
                description: "Downloaded system update packages older than 30 days",
                risk_level: RiskLevel::Low,
                is_safe_auto: true,
                discovery: PathDiscovery::UpdateCaches,
                strategy: ScanStrategy::AgedWalk {
                    max_depth: 4,
                    min_age_days: 30,
                },
            },
            CleanupCategory {
                name: "installers",
                display_name: "Old Installers",
                description: "Installer files in the downloads folder older than 30 days",
                risk_level: RiskLevel::Medium,
                is_safe_auto: false,
                discovery: PathDiscovery::Downloads,
                strategy: ScanStrategy::InstallerListing { min_age_days: 30 },
            },
            CleanupCategory {
                name: "thumbnails",
                display_name: "Thumbnail Cache",
                description: "Thumbnail cache files",
                risk_level: RiskLevel::Low,
                is_safe_auto: true,
                discovery: PathDiscovery::ThumbnailCaches,
                strategy: ScanStrategy::ThumbnailWalk { max_depth: 3 },
            },
            CleanupCategory {
                name: "dev_cache",
                display_name: "Development Cache",
                description: "node_modules, __pycache__, build and cache folders from projects",
                risk_level: RiskLevel::High,
                is_safe_auto: false,
                discovery: PathDiscovery::DevRoots,
                strategy: ScanStrategy::DevCacheWalk { max_depth: 4 },
            },
        ])
    }

    /// Look up a category by name.
    pub fn get(&self, name: &str) -> Result<&CleanupCategory> {
        self.categories
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::CategoryNotFound(name.to_string()))
    }

    /// Iterate categories in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &CleanupCategory> {
        self.categories.iter()
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }
}

impl Default for CategoryRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
