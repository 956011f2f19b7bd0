use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Age of `timestamp` relative to `clock`, formatted like `5m` or `3d`.
pub fn human_age(clock: &dyn Clock, timestamp: Option<&Time>) -> String {
    let Some(timestamp) = timestamp else {
        return "<unknown>".to_string();
    };

    let elapsed_seconds = (clock.now().timestamp() - timestamp.0.as_second()).max(0);
    format_elapsed_seconds(elapsed_seconds)
}

fn format_elapsed_seconds(seconds: i64) -> String {
    if seconds >= 365 * 86_400 {
        return format!("{}y", seconds / (365 * 86_400));
    }

    if seconds >= 86_400 {
        return format!("{}d", seconds / 86_400);
    }

    if seconds >= 3_600 {
        return format!("{}h", seconds / 3_600);
    }

    if seconds >= 60 {
        return format!("{}m", seconds / 60);
    }

    format!("{seconds}s")
}

#[cfg(test)]
pub mod testing {
    use super::Clock;
    use chrono::{DateTime, Utc};

    #[derive(Debug, Clone, Copy)]
    pub struct FixedClock(pub DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FixedClock;
    use super::*;
    use chrono::TimeZone;
    use k8s_openapi::jiff::Timestamp;

    fn time_at(second: i64) -> Time {
        Time(Timestamp::from_second(second).expect("valid timestamp"))
    }

    #[test]
    fn age_uses_the_injected_clock() {
        let clock = FixedClock(Utc.timestamp_opt(1_000_000, 0).unwrap());

        assert_eq!(human_age(&clock, Some(&time_at(1_000_000))), "0s");
        assert_eq!(human_age(&clock, Some(&time_at(1_000_000 - 59))), "59s");
        assert_eq!(human_age(&clock, Some(&time_at(1_000_000 - 300))), "5m");
        assert_eq!(human_age(&clock, Some(&time_at(1_000_000 - 7_200))), "2h");
        assert_eq!(human_age(&clock, Some(&time_at(1_000_000 - 3 * 86_400))), "3d");
    }

    #[test]
    fn future_timestamps_clamp_to_zero() {
        let clock = FixedClock(Utc.timestamp_opt(1_000, 0).unwrap());
        assert_eq!(human_age(&clock, Some(&time_at(5_000))), "0s");
        assert_eq!(human_age(&clock, None), "<unknown>");
    }
}
