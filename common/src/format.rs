const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human-scaled byte count, each unit step dividing by 1024
pub fn format_bytes(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}
