//! Small formatting helpers shared by the catalog and the chat layer.

/// Formats a byte count for a format button, e.g. `12.50 MB`.
///
/// Units stop at GB; anything larger is still shown in GB.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut size = bytes as f64;
    let mut unit = UNITS[0];
    for (i, candidate) in UNITS.iter().enumerate() {
        unit = candidate;
        if size < 1024.0 || i == UNITS.len() - 1 {
            break;
        }
        size /= 1024.0;
    }
    format!("{:.2} {}", size, unit)
}

/// Cuts a diagnostic string down to its last `max_chars` characters.
///
/// Used for subprocess stderr, where the useful part is at the end.
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    match text.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
