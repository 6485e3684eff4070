//! Bar timeframe: a fixed span in whole seconds.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeFrameError {
    #[error("empty timeframe")]
    Empty,

    #[error("invalid timeframe '{0}': expected <n><s|m|h|d|w>, e.g. 5m or 1h")]
    Invalid(String),

    #[error("timeframe must be positive")]
    NonPositive,

    #[error("timeframe '{0}' is too large")]
    TooLarge(String),
}

/// Fixed bar span, e.g. `5m`, `1h`, `1d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeFrame {
    secs: i64,
}

impl TimeFrame {
    pub const MINUTE: TimeFrame = TimeFrame { secs: 60 };
    pub const HOUR: TimeFrame = TimeFrame { secs: 3_600 };
    pub const DAY: TimeFrame = TimeFrame { secs: 86_400 };

    /// Longest span representable as a `chrono::Duration`.
    const MAX_SECS: i64 = i64::MAX / 1_000;

    pub fn from_secs(secs: i64) -> Result<Self, TimeFrameError> {
        if secs <= 0 {
            return Err(TimeFrameError::NonPositive);
        }
        if secs > Self::MAX_SECS {
            return Err(TimeFrameError::TooLarge(format!("{secs}s")));
        }
        Ok(Self { secs })
    }

    pub fn minutes(n: i64) -> Result<Self, TimeFrameError> {
        Self::scaled(n, 60, "m")
    }

    pub fn hours(n: i64) -> Result<Self, TimeFrameError> {
        Self::scaled(n, 3_600, "h")
    }

    fn scaled(n: i64, scale: i64, unit: &str) -> Result<Self, TimeFrameError> {
        let secs = n
            .checked_mul(scale)
            .ok_or_else(|| TimeFrameError::TooLarge(format!("{n}{unit}")))?;
        Self::from_secs(secs)
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn span(&self) -> Duration {
        Duration::seconds(self.secs)
    }

    /// Latest bar boundary at or before `t` (boundaries are multiples of the span since the epoch).
    pub fn align_floor(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        let rem = t.timestamp().rem_euclid(self.secs);
        t - Duration::seconds(rem) - Duration::nanoseconds(i64::from(t.timestamp_subsec_nanos()))
    }

    pub fn is_aligned(&self, t: DateTime<Utc>) -> bool {
        t.timestamp_subsec_nanos() == 0 && t.timestamp().rem_euclid(self.secs) == 0
    }

    /// True when `other` is a whole multiple of `self` (including equal).
    pub fn divides(&self, other: &TimeFrame) -> bool {
        other.secs % self.secs == 0
    }

    /// Number of whole bars between `from` and `to`, `None` if the distance
    /// is not a whole multiple of the span.
    pub fn bars_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Option<i64> {
        let delta = to - from;
        let whole = delta.num_seconds();
        if delta != Duration::seconds(whole) || whole % self.secs != 0 {
            return None;
        }
        Some(whole / self.secs)
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: [(i64, &str); 4] = [(604_800, "w"), (86_400, "d"), (3_600, "h"), (60, "m")];
        for (size, suffix) in UNITS {
            if self.secs % size == 0 {
                return write!(f, "{}{}", self.secs / size, suffix);
            }
        }
        write!(f, "{}s", self.secs)
    }
}

impl FromStr for TimeFrame {
    type Err = TimeFrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TimeFrameError::Empty);
        }
        let split = s.char_indices().last().map_or(0, |(i, _)| i);
        let (digits, unit) = s.split_at(split);
        let n: i64 = digits
            .parse()
            .map_err(|_| TimeFrameError::Invalid(s.to_string()))?;
        let scale = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            "w" => 604_800,
            _ => return Err(TimeFrameError::Invalid(s.to_string())),
        };
        Self::scaled(n, scale, unit)
    }
}

impl TryFrom<String> for TimeFrame {
    type Error = TimeFrameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeFrame> for String {
    fn from(tf: TimeFrame) -> Self {
        tf.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_and_display() {
        let tf: TimeFrame = "5m".parse().unwrap();
        assert_eq!(tf.secs(), 300);
        assert_eq!(tf.to_string(), "5m");
        assert_eq!("90m".parse::<TimeFrame>().unwrap().to_string(), "90m");
        assert_eq!("120m".parse::<TimeFrame>().unwrap().to_string(), "2h");
        assert_eq!("1d".parse::<TimeFrame>().unwrap(), TimeFrame::DAY);
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!("".parse::<TimeFrame>(), Err(TimeFrameError::Empty));
        assert!(matches!("5x".parse::<TimeFrame>(), Err(TimeFrameError::Invalid(_))));
        assert_eq!("0m".parse::<TimeFrame>(), Err(TimeFrameError::NonPositive));
    }

    #[test]
    fn oversized_spans_are_errors() {
        assert_eq!(
            "9999999999999999d".parse::<TimeFrame>(),
            Err(TimeFrameError::TooLarge("9999999999999999d".into()))
        );
        assert!(matches!(TimeFrame::hours(i64::MAX), Err(TimeFrameError::TooLarge(_))));
        assert!(matches!(TimeFrame::from_secs(i64::MAX), Err(TimeFrameError::TooLarge(_))));
        let max = TimeFrame::from_secs(i64::MAX / 1_000).unwrap();
        assert_eq!(max.span().num_seconds(), i64::MAX / 1_000);
    }

    #[test]
    fn align_floor_and_is_aligned() {
        let tf = TimeFrame::HOUR;
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 10, 37, 12).unwrap();
        let floor = tf.align_floor(t);
        assert_eq!(floor, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
        assert!(tf.is_aligned(floor));
        assert!(!tf.is_aligned(t));
    }

    #[test]
    fn bars_between_counts_whole_spans() {
        let tf = TimeFrame::minutes(15).unwrap();
        let a = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(tf.bars_between(a, b), Some(4));
        assert_eq!(tf.bars_between(a, b + Duration::minutes(1)), None);
    }

    #[test]
    fn divides_checks_multiples() {
        let m5 = TimeFrame::minutes(5).unwrap();
        assert!(m5.divides(&TimeFrame::HOUR));
        assert!(!TimeFrame::HOUR.divides(&m5));
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&TimeFrame::HOUR).unwrap();
        assert_eq!(json, "\"1h\"");
        let back: TimeFrame = serde_json::from_str("\"4h\"").unwrap();
        assert_eq!(back.secs(), 14_400);
    }
}
