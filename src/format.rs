use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

pub const MIB: u64 = 1024 * 1024;

pub fn truncate_unicode(s: &str, max_width: usize) -> String {
    if s.width() <= max_width {
        return s.to_string();
    }
    let mut result = String::new();
    let mut width = 0;
    for ch in s.chars() {
        let ch_width = ch.width().unwrap_or(0);
        if width + ch_width > max_width.saturating_sub(1) {
            result.push('\u{2026}');
            break;
        }
        result.push(ch);
        width += ch_width;
    }
    result
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const GB: u64 = 1024 * 1024 * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KB {
        format!("{:.0} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / MIB as f64
}

/// Difference `before - after` in MB, clamped so noise never reads as a
/// negative saving.
pub fn freed_mb(before: u64, after: u64) -> f64 {
    bytes_to_mb(before.saturating_sub(after))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_with_ellipsis() {
        assert_eq!(truncate_unicode("firefox", 10), "firefox");
        assert_eq!(truncate_unicode("gnome-software", 6), "gnome\u{2026}");
    }

    #[test]
    fn byte_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(3 * MIB / 2), "1.5 MB");
        assert_eq!(format_bytes(2 * 1024 * MIB), "2.0 GB");
    }

    #[test]
    fn freed_never_negative() {
        assert_eq!(freed_mb(MIB, 2 * MIB), 0.0);
        assert!((freed_mb(3 * MIB, MIB) - 2.0).abs() < f64::EPSILON);
    }
}
