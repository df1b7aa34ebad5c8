use ::time::OffsetDateTime;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Display};
use std::ops::{Deref, Neg};
use std::str::FromStr;
use std::time::Duration;

const SECONDS_IN_MINUTE: i64 = 60;
const SECONDS_IN_HOUR: i64 = 3600;
const SECONDS_IN_DAY: i64 = 86400;

pub fn parse_duration(s: &str) -> Result<Duration, String> {
    cyborgtime::parse_duration(s).map_err(|e| format!("Invalid duration: {e}"))
}

/// A duration as written in the configuration file (`90s`, `10m`, `1h`, ...)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ParsedDuration {
    inner: Duration,
}

impl ParsedDuration {
    /// The shortest form `cyborgtime` reads back to the same duration
    fn to_config_string(self) -> String {
        let secs = self.inner.as_secs();
        let millis = self.inner.subsec_millis();
        if millis != 0 {
            format!("{}ms", self.inner.as_millis())
        } else if secs != 0 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs != 0 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{secs}s")
        }
    }
}

impl From<Duration> for ParsedDuration {
    fn from(inner: Duration) -> Self {
        ParsedDuration { inner }
    }
}

impl From<u64> for ParsedDuration {
    fn from(seconds: u64) -> Self {
        Duration::from_secs(seconds).into()
    }
}

impl Deref for ParsedDuration {
    type Target = Duration;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl FromStr for ParsedDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(ParsedDuration::from)
    }
}

impl Display for ParsedDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match humanize_duration_core(**self) {
            Ok(duration) => write!(f, "{duration}"),
            Err(_) => write!(f, "Time too long to display"),
        }
    }
}

impl Debug for ParsedDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_config_string())
    }
}

impl Serialize for ParsedDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_config_string())
    }
}

impl<'de> Deserialize<'de> for ParsedDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

#[allow(clippy::missing_panics_doc)]
pub fn current_time_truncated() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now.replace_nanosecond(0).unwrap(/* unreachable */)
}

/// Whole days from `now` until `expires_at`, rounded down.
///
/// A certificate that expired an hour ago is at day -1, one that expires in 23 hours at day 0.
pub fn days_until(expires_at: OffsetDateTime, now: OffsetDateTime) -> i64 {
    (expires_at - now).whole_seconds().div_euclid(SECONDS_IN_DAY)
}

pub fn humanize_duration_core(
    duration: core::time::Duration,
) -> Result<String, time::error::ConversionRange> {
    Ok(humanize_duration(duration.try_into()?))
}

pub fn humanize_duration(mut duration: time::Duration) -> String {
    const SECONDS_IN_MONTH: i64 = 2_630_016; // Approximation (30.44 days)
    const SECONDS_IN_YEAR: i64 = 31_557_600; // Approximation (365.25 days)

    if duration.is_negative() {
        duration = duration.neg();
    }

    let mut remaining_seconds = duration.whole_seconds();

    let years = remaining_seconds / SECONDS_IN_YEAR;
    remaining_seconds %= SECONDS_IN_YEAR;
    let months = remaining_seconds / SECONDS_IN_MONTH;
    remaining_seconds %= SECONDS_IN_MONTH;
    let days = remaining_seconds / SECONDS_IN_DAY;
    remaining_seconds %= SECONDS_IN_DAY;
    let hours = remaining_seconds / SECONDS_IN_HOUR;
    remaining_seconds %= SECONDS_IN_HOUR;
    let minutes = remaining_seconds / SECONDS_IN_MINUTE;
    remaining_seconds %= SECONDS_IN_MINUTE;
    let seconds = remaining_seconds;

    let mut components = Vec::new();
    for (amount, unit) in [
        (years, "year"),
        (months, "month"),
        (days, "day"),
        (hours, "hour"),
        (minutes, "minute"),
    ] {
        if amount > 0 {
            components.push(format!(
                "{amount} {unit}{}",
                if amount > 1 { "s" } else { "" }
            ));
        }
    }
    if seconds > 0 || components.is_empty() {
        components.push(format!(
            "{} second{}",
            seconds,
            if seconds == 1 { "" } else { "s" }
        ));
    }

    components.join(", ")
}

#[cfg(test)]
mod tests {
    use crate::time::{ParsedDuration, days_until, humanize_duration};
    use rstest::rstest;
    use std::time::Duration;
    use time::macros::datetime;

    #[rstest]
    #[case(time::Duration::ZERO, "0 seconds")]
    #[case(std::time::Duration::from_secs(60).try_into().unwrap(), "1 minute")]
    #[case(std::time::Duration::from_secs(61).try_into().unwrap(), "1 minute, 1 second")]
    #[case(std::time::Duration::from_secs(60 * 60).try_into().unwrap(), "1 hour")]
    #[case(std::time::Duration::from_secs(60 * 60 * 24).try_into().unwrap(), "1 day")]
    #[case(std::time::Duration::from_secs_f64(60f64 * 60f64 * 24f64 * 30.44).try_into().unwrap(), "1 month")]
    #[case(std::time::Duration::from_secs_f64(60f64 * 60f64 * 24f64 * 365.25).try_into().unwrap(), "1 year")]
    #[case(std::time::Duration::from_nanos(1).try_into().unwrap(), "0 seconds")]
    #[case(std::time::Duration::from_secs_f64(62.321).try_into().unwrap(), "1 minute, 2 seconds")]
    #[case(std::time::Duration::from_secs_f64(60f64 * 60f64 * 24f64 * 90f64 * 1.1111).try_into().unwrap(), "3 months, 8 days, 16 hours, 17 minutes, 45 seconds")]
    fn test_humanize_duration(#[case] test_value: time::Duration, #[case] expected: &str) {
        let humanized = humanize_duration(test_value);
        assert_eq!(humanized, expected);
    }

    #[rstest]
    #[case(datetime!(2026-01-11 00:00 UTC), 10)]
    #[case(datetime!(2026-01-01 23:00 UTC), 0)]
    #[case(datetime!(2026-01-01 00:00 UTC), 0)]
    #[case(datetime!(2025-12-31 23:00 UTC), -1)]
    #[case(datetime!(2025-12-20 00:00 UTC), -12)]
    fn test_days_until(#[case] expires_at: time::OffsetDateTime, #[case] expected: i64) {
        let now = datetime!(2026-01-01 00:00 UTC);

        assert_eq!(days_until(expires_at, now), expected);
    }

    #[rstest]
    #[case(Duration::from_secs(90), "90s")]
    #[case(Duration::from_secs(120), "2m")]
    #[case(Duration::from_secs(3600), "1h")]
    #[case(Duration::from_millis(1500), "1500ms")]
    #[case(Duration::ZERO, "0s")]
    fn test_config_string_parses_back(#[case] duration: Duration, #[case] expected: &str) {
        let parsed = ParsedDuration::from(duration);

        assert_eq!(format!("{parsed:?}"), expected);
        assert_eq!(expected.parse::<ParsedDuration>().unwrap(), parsed);
    }
}
