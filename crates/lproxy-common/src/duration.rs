//! Human-readable duration rendering for status tables.

use chrono::{DateTime, TimeDelta, Utc};

/// Renders the distance between `timestamp` and now as a compact
/// duration such as `2d`, `5h` or `90m`. Works for timestamps on either
/// side of now.
pub fn human_duration(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = if now > timestamp {
        now - timestamp
    } else {
        timestamp - now
    };
    format_delta(delta)
}

fn format_delta(d: TimeDelta) -> String {
    let secs = d.num_seconds();
    if secs < 60 {
        return format!("{secs}s");
    }
    let mins = d.num_minutes();
    if mins < 60 {
        let rem = secs - mins * 60;
        if rem == 0 {
            return format!("{mins}m");
        }
        return format!("{mins}m{rem}s");
    }
    let hours = d.num_hours();
    if hours < 48 {
        let rem = mins - hours * 60;
        if rem == 0 {
            return format!("{hours}h");
        }
        return format!("{hours}h{rem}m");
    }
    let days = d.num_days();
    if days < 365 {
        return format!("{days}d");
    }
    let years = days / 365;
    let rem_days = days - years * 365;
    if rem_days == 0 {
        return format!("{years}y");
    }
    format!("{years}y{rem_days}d")
}
