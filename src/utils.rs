use chrono::{DateTime, Utc};
use std::path::Path;
use std::time::SystemTime;

/// Format bytes into a human-readable size.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Total size of a directory, recursively. Unreadable entries are skipped.
pub fn dir_size(dir: &Path) -> u64 {
    let mut total = 0u64;

    for entry in walkdir::WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() {
            if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
    }

    total
}

/// Convert SystemTime to DateTime<Utc>.
pub fn system_time_to_datetime(time: SystemTime) -> DateTime<Utc> {
    let duration = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    DateTime::from_timestamp(duration.as_secs() as i64, 0).unwrap_or_else(Utc::now)
}
