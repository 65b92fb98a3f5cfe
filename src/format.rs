//! Compact human-readable durations for countdown display.

/// Format a duration given in milliseconds.
///
/// Examples: `45s`, `5m`, `1h 05m 00s`, `2d`, `1d 3h 00m 10s`.
/// Minutes are rounded up once the duration reaches a minute.
pub fn format_duration(ms: u64) -> String {
    let s = ms / 1000;
    if s < 60 {
        return format!("{}s", s);
    }

    let minutes_ceil = s.div_ceil(60);
    if minutes_ceil < 60 {
        return format!("{}m", minutes_ceil);
    }

    let total_hours = minutes_ceil / 60;
    let rem_minutes = minutes_ceil % 60;
    let rem_seconds = s % 60;

    if total_hours < 24 {
        return format!("{}h {:02}m {:02}s", total_hours, rem_minutes, rem_seconds);
    }

    let days = total_hours / 24;
    let rem_hours = total_hours % 24;
    if rem_hours == 0 {
        return format!("{}d", days);
    }
    format!("{}d {}h {:02}m {:02}s", days, rem_hours, rem_minutes, rem_seconds)
}

/// Format a duration given in seconds: `45s`, `5m`, `1h 05m`, `2d 3h`.
pub fn format_duration_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{}s", seconds);
    }

    let minutes_ceil = seconds.div_ceil(60);
    if minutes_ceil < 60 {
        return format!("{}m", minutes_ceil);
    }

    let total_hours = minutes_ceil / 60;
    let rem_minutes = minutes_ceil % 60;
    if total_hours < 24 {
        return format!("{}h {:02}m", total_hours, rem_minutes);
    }

    let days = total_hours / 24;
    let rem_hours = total_hours % 24;
    if rem_hours == 0 {
        return format!("{}d", days);
    }
    format!("{}d {}h", days, rem_hours)
}

/// Hours and minutes only, minutes rounded up: `0m`, `3m`, `2h 05m`.
pub fn format_seconds_to_time(seconds: u64) -> String {
    let mins = seconds / 60;
    let secs = seconds % 60;
    let total_minutes = mins + u64::from(secs > 0);

    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours > 0 {
        return format!("{}h {:02}m", hours, minutes);
    }
    format!("{}m", minutes)
}
