use std::fmt;

const MINUTE_MS: i64 = 60_000;
const MINUTES_PER_HOUR: i64 = 60;
const MINUTES_PER_DAY: i64 = 60 * 24;
// Calendar-naive on purpose.
const DAYS_PER_YEAR: i64 = 365;
const DAYS_PER_MONTH: i64 = 30;

pub const STALENESS_CEILING_MS: i64 = 14 * 24 * 60 * 60 * 1000;
pub const STALE_MARKER: &str = "—";
pub const LIVE_MARKER: &str = "live";
pub const ZERO_DURATION: &str = "0 min";

/// Largest-unit-first breakdown, e.g. `1 y 2 mo 3 d 4 h 5 min`.
pub fn format_duration(ms: Option<i64>) -> String {
    let ms = match ms {
        Some(value) if value > 0 => value,
        _ => return ZERO_DURATION.to_string(),
    };

    let total_minutes = ms / MINUTE_MS;
    let years = total_minutes / (MINUTES_PER_DAY * DAYS_PER_YEAR);
    let days_total = total_minutes / MINUTES_PER_DAY - years * DAYS_PER_YEAR;
    let months = days_total / DAYS_PER_MONTH;
    let days = days_total % DAYS_PER_MONTH;
    let hours = (total_minutes % MINUTES_PER_DAY) / MINUTES_PER_HOUR;
    let minutes = total_minutes % MINUTES_PER_HOUR;

    let mut parts = Vec::new();
    for (value, unit) in [(years, "y"), (months, "mo"), (days, "d"), (hours, "h")] {
        if value != 0 {
            parts.push(format!("{value} {unit}"));
        }
    }
    if minutes != 0 || parts.is_empty() {
        parts.push(format!("{minutes} min"));
    }
    parts.join(" ")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// No timestamp, or older than the staleness ceiling.
    Unknown,
    Live,
    SecondsAgo(i64),
    MinutesAgo(i64),
    HoursAgo(i64),
}

impl Staleness {
    pub fn is_live(&self) -> bool {
        matches!(self, Staleness::Live)
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Staleness::Unknown => f.write_str(STALE_MARKER),
            Staleness::Live => f.write_str(LIVE_MARKER),
            Staleness::SecondsAgo(s) => write!(f, "{s} s ago"),
            Staleness::MinutesAgo(m) => write!(f, "{m} min ago"),
            Staleness::HoursAgo(h) => write!(f, "{h} h ago"),
        }
    }
}

pub fn staleness(timestamp_ms: Option<i64>, now: i64) -> Staleness {
    let ts = match timestamp_ms {
        Some(value) if value != 0 => value,
        _ => return Staleness::Unknown,
    };
    if ts < now - STALENESS_CEILING_MS {
        return Staleness::Unknown;
    }

    let seconds = ((now - ts) / 1000).max(0);
    if seconds < 5 {
        return Staleness::Live;
    }
    if seconds < 60 {
        return Staleness::SecondsAgo(seconds);
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return Staleness::MinutesAgo(minutes);
    }
    Staleness::HoursAgo(minutes / 60)
}

pub fn format_staleness(timestamp_ms: Option<i64>, now: i64) -> String {
    staleness(timestamp_ms, now).to_string()
}
