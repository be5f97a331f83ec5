use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::utils::system_time_to_datetime;

/// File extensions treated as installers in the downloads listing.
pub const INSTALLER_EXTENSIONS: &[&str] = &["msi", "exe", "dmg", "pkg", "deb", "rpm"];

/// Directory names recorded as single development-cache entries.
pub const DEV_CACHE_DIR_NAMES: &[&str] = &[
    "node_modules",
    "__pycache__",
    ".cache",
    ".next",
    "dist",
    "build",
    "target",
];

#[cfg(windows)]
const SYSTEM_PROTECTED_DIRS: &[&str] = &[
    r"C:\Windows\System32",
    r"C:\Windows\SysWOW64",
    r"C:\Program Files",
    r"C:\Program Files (x86)",
    r"C:\ProgramData",
];

#[cfg(target_os = "macos")]
const SYSTEM_PROTECTED_DIRS: &[&str] = &["/System", "/Library", "/Applications", "/usr", "/bin", "/sbin", "/etc"];

#[cfg(all(unix, not(target_os = "macos")))]
const SYSTEM_PROTECTED_DIRS: &[&str] = &[
    "/bin", "/sbin", "/usr", "/lib", "/lib64", "/etc", "/boot", "/opt",
];

/// Directories that must never be scanned into or deleted: system binary and
/// program-install locations plus the user's personal content folders.
fn protected_roots() -> &'static [PathBuf] {
    static ROOTS: OnceLock<Vec<PathBuf>> = OnceLock::new();
    ROOTS.get_or_init(|| {
        let mut roots: Vec<PathBuf> = SYSTEM_PROTECTED_DIRS.iter().map(PathBuf::from).collect();

        for dir in [
            dirs::document_dir(),
            dirs::picture_dir(),
            dirs::video_dir(),
            dirs::audio_dir(),
            dirs::desktop_dir(),
        ]
        .into_iter()
        .flatten()
        {
            roots.push(dir);
        }

        roots
    })
}

/// Check whether a path falls under a protected root.
///
/// Any path containing a temp/cache segment is exempt, even inside a
/// protected root. The exemption is a plain substring match on the whole
/// path, which is deliberately loose: cache directories live at arbitrary
/// depths inside otherwise protected trees.
pub fn is_path_protected(path: &Path) -> bool {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    is_path_protected_under(&absolute, protected_roots())
}

fn is_path_protected_under(path: &Path, roots: &[PathBuf]) -> bool {
    let lowered = path.to_string_lossy().to_lowercase();
    let exempt = lowered.contains("temp") || lowered.contains("tmp") || lowered.contains("cache");
    if exempt {
        return false;
    }

    roots.iter().any(|root| path.starts_with(root))
}

/// Check whether a file's last-access time is at least `days` days ago.
///
/// Returns false on any metadata error (vanished file, permission denied)
/// rather than propagating it: a file we cannot stat is never old enough.
pub fn is_file_old_enough(path: &Path, days: i64) -> bool {
    let accessed = match path.metadata().and_then(|m| m.accessed()) {
        Ok(t) => t,
        Err(_) => return false,
    };

    is_old_enough_at(system_time_to_datetime(accessed), Utc::now(), days)
}

/// A file exactly `days` old counts as old enough.
fn is_old_enough_at(accessed: DateTime<Utc>, now: DateTime<Utc>, days: i64) -> bool {
    accessed <= now - Duration::days(days)
}
