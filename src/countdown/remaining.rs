use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const MS_PER_SECOND: i64 = 1_000;
pub const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Breakdown of the time left until a target instant. `expired` is the only
/// meaningful field once the target has passed; the unit fields are zeroed.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct TimeRemaining {
    pub expired: bool,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl TimeRemaining {
    pub const EXPIRED: TimeRemaining = TimeRemaining {
        expired: true,
        days: 0,
        hours: 0,
        minutes: 0,
        seconds: 0,
    };

    /// Display form shared by the GUI, the API, and `--check` output.
    /// Zero-valued units are skipped; seconds always print.
    pub fn display(&self) -> String {
        if self.expired {
            return "Time's up!".to_string();
        }
        let mut text = String::new();
        if self.days > 0 {
            let _ = write!(text, "{}d ", self.days);
        }
        if self.hours > 0 {
            let _ = write!(text, "{}h ", self.hours);
        }
        if self.minutes > 0 {
            let _ = write!(text, "{}m ", self.minutes);
        }
        let _ = write!(text, "{}s", self.seconds);
        text
    }
}

/// Pure remaining-time computation. A target at or before `now` counts as
/// expired; a positive difference decomposes with truncating division, each
/// unit taking the remainder left by the larger one.
pub fn compute(target: DateTime<Utc>, now: DateTime<Utc>) -> TimeRemaining {
    let delta_ms = target.signed_duration_since(now).num_milliseconds();
    if delta_ms <= 0 {
        return TimeRemaining::EXPIRED;
    }
    TimeRemaining {
        expired: false,
        days: delta_ms / MS_PER_DAY,
        hours: (delta_ms % MS_PER_DAY) / MS_PER_HOUR,
        minutes: (delta_ms % MS_PER_HOUR) / MS_PER_MINUTE,
        seconds: (delta_ms % MS_PER_MINUTE) / MS_PER_SECOND,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::*;

    fn anchor() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).single().expect("anchor")
    }

    #[test]
    fn one_day_one_hour_one_minute_one_second_breakdown() {
        let now = anchor();
        let target = now + Duration::milliseconds(90_061_001);
        let remaining = compute(target, now);
        assert!(!remaining.expired);
        assert_eq!(remaining.days, 1);
        assert_eq!(remaining.hours, 1);
        assert_eq!(remaining.minutes, 1);
        assert_eq!(remaining.seconds, 1);
    }

    #[test]
    fn past_target_is_expired() {
        let now = anchor();
        let remaining = compute(now - Duration::milliseconds(5), now);
        assert!(remaining.expired);
        assert_eq!(remaining.days, 0);
        assert_eq!(remaining.seconds, 0);
    }

    #[test]
    fn zero_delta_counts_as_expired() {
        let now = anchor();
        assert!(compute(now, now).expired);
    }

    #[test]
    fn decomposition_is_lossless_up_to_subsecond_remainder() {
        let now = anchor();
        for delta_ms in [1_i64, 999, 1_000, 59_999, 3_600_000, 90_061_001, 777_123_456] {
            let remaining = compute(now + Duration::milliseconds(delta_ms), now);
            let rebuilt = remaining.days * MS_PER_DAY
                + remaining.hours * MS_PER_HOUR
                + remaining.minutes * MS_PER_MINUTE
                + remaining.seconds * MS_PER_SECOND;
            let subsecond = delta_ms - rebuilt;
            assert!(
                (0..MS_PER_SECOND).contains(&subsecond),
                "delta {delta_ms} lost more than the sub-second remainder"
            );
        }
    }

    #[test]
    fn compute_is_referentially_transparent() {
        let now = anchor();
        let target = now + Duration::milliseconds(12_345_678);
        assert_eq!(compute(target, now), compute(target, now));
    }

    #[test]
    fn display_skips_zero_units_but_always_shows_seconds() {
        let now = anchor();
        let day_and_change = compute(now + Duration::milliseconds(90_061_001), now);
        assert_eq!(day_and_change.display(), "1d 1h 1m 1s");

        let minutes_only = compute(now + Duration::seconds(125), now);
        assert_eq!(minutes_only.display(), "2m 5s");

        let seconds_only = compute(now + Duration::seconds(9), now);
        assert_eq!(seconds_only.display(), "9s");

        let day_no_hours = compute(now + Duration::days(1) + Duration::seconds(30), now);
        assert_eq!(day_no_hours.display(), "1d 30s");
    }

    #[test]
    fn display_reports_expired_state() {
        let now = anchor();
        assert_eq!(compute(now, now).display(), "Time's up!");
    }
}
