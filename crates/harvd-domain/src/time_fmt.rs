//! Shared human-readable duration formatting and progress arithmetic.

/// Format seconds as a two-unit human-readable duration: `"42s"`,
/// `"3m 12s"`, `"2h 5m"`, `"1d 3h"`.
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Estimated seconds remaining, by linear extrapolation from the work
/// done so far. `None` when nothing has been processed yet or the
/// total is unknown.
pub fn estimate_remaining_secs(current: u64, max: u64, elapsed_millis: u64) -> Option<u64> {
    if current == 0 || max <= current {
        return None;
    }
    let per_item = elapsed_millis as f64 / current as f64;
    let remaining = per_item * (max - current) as f64;
    Some((remaining / 1000.0).round() as u64)
}

/// Integer percentage of `current` out of `max`, clamped to 100.
pub fn percentage(current: u64, max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    (current * 100 / max).min(100)
}
