//! Human-readable rendering of sizes, timestamps and paths.

use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Format a byte count using binary units with two decimals.
///
/// Values below 1024 are printed as whole bytes (`"512 B"`); anything past
/// the terabyte range stays in TB.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{size:.2} {}", UNITS[unit])
}

/// Render a filesystem timestamp in the local zone, e.g. `3/7/2024, 9:05:01 PM`.
pub fn format_timestamp(time: SystemTime) -> String {
    let local: DateTime<Local> = time.into();
    local.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}

pub fn format_elapsed(elapsed: Duration) -> String {
    format!("{} ms", elapsed.as_millis())
}

/// Join path components with `/` regardless of platform separator.
pub fn rel_path_to_string(path: &Path) -> String {
    if path.as_os_str().is_empty() || path == Path::new(".") {
        String::new()
    } else {
        path.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}
