// ── Humanized ages ──
//
// `human_diff` renders an age as "<n> <unit>" with the largest unit
// reached, floored. `next_change_delay` is the time until that
// rendering changes.

use std::time::Duration;

use chrono::{DateTime, Utc};

const SECOND: i64 = 1_000;
const MINUTE: i64 = 60 * SECOND;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Render `now - then`, or `"now"` when `then` is in the future.
pub fn human_diff(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    if then > now {
        return "now".to_owned();
    }
    let ms = (now - then).num_milliseconds();
    let (value, unit) = if ms < SECOND {
        (ms, "ms")
    } else if ms < MINUTE {
        (ms / SECOND, "s")
    } else if ms < HOUR {
        (ms / MINUTE, "m")
    } else if ms < DAY {
        (ms / HOUR, "h")
    } else {
        (ms / DAY, "d")
    };
    format!("{value} {unit}")
}

/// Time until `human_diff(now, then)` next changes.
///
/// For a future `then` this is the time until it stops being "now".
pub fn next_change_delay(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    let ms = if then > now {
        (then - now).num_milliseconds()
    } else {
        let age = (now - then).num_milliseconds();
        let unit = if age < MINUTE {
            SECOND
        } else if age < HOUR {
            MINUTE
        } else if age < DAY {
            HOUR
        } else {
            DAY
        };
        (age / unit + 1) * unit - age
    };
    Duration::from_millis(u64::try_from(ms).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn ago(now: DateTime<Utc>, ms: i64) -> DateTime<Utc> {
        now - TimeDelta::milliseconds(ms)
    }

    #[test]
    fn renders_largest_reached_unit() {
        let now = Utc::now();
        assert_eq!(human_diff(now, ago(now, 450)), "450 ms");
        assert_eq!(human_diff(now, ago(now, 45_999)), "45 s");
        assert_eq!(human_diff(now, ago(now, 60_000)), "1 m");
        assert_eq!(human_diff(now, ago(now, 3 * HOUR + 59 * MINUTE)), "3 h");
        assert_eq!(human_diff(now, ago(now, 2 * DAY + 5)), "2 d");
    }

    #[test]
    fn future_is_now() {
        let now = Utc::now();
        assert_eq!(human_diff(now, now + TimeDelta::seconds(5)), "now");
        assert_eq!(
            next_change_delay(now, now + TimeDelta::seconds(5)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn delay_reaches_next_boundary() {
        let now = Utc::now();
        assert_eq!(next_change_delay(now, ago(now, 200)), Duration::from_millis(800));
        assert_eq!(next_change_delay(now, ago(now, 45_300)), Duration::from_millis(700));
        assert_eq!(
            next_change_delay(now, ago(now, 90 * SECOND)),
            Duration::from_secs(30)
        );
        assert_eq!(
            next_change_delay(now, ago(now, 2 * HOUR + 10 * MINUTE)),
            Duration::from_secs(50 * 60)
        );
        assert_eq!(
            next_change_delay(now, ago(now, 3 * DAY)),
            Duration::from_secs(24 * 3600)
        );
    }
}
