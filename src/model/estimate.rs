use std::fmt;
use std::iter::Sum;
use std::ops::Add;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

static ESTIMATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+:\d{2}$").expect("estimate pattern is valid"));

/// Maximum serialized length of an `originalEstimate` value.
pub const MAX_ESTIMATE_LEN: usize = 45;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EstimateParseError {
    #[error("'{0}' is not an HH:mm duration")]
    Pattern(String),
    #[error("'{0}' has minutes outside 00-59")]
    Minutes(String),
}

/// A duration in whole minutes, exchanged on the wire as zero-padded `HH:mm`.
/// Hours are not capped at 24, and whatever `Display` writes parses back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Estimate {
    minutes: u32,
}

impl Estimate {
    pub const fn from_minutes(minutes: u32) -> Self {
        Self { minutes }
    }

    pub const fn from_hours(hours: u32) -> Self {
        Self {
            minutes: hours * 60,
        }
    }

    pub const fn minutes(self) -> u32 {
        self.minutes
    }

    pub fn hours(self) -> f64 {
        f64::from(self.minutes) / 60.0
    }

    pub fn parse(raw: &str) -> Result<Self, EstimateParseError> {
        if raw.len() > MAX_ESTIMATE_LEN || !ESTIMATE_PATTERN.is_match(raw) {
            return Err(EstimateParseError::Pattern(raw.to_string()));
        }
        let (hours, minutes) = raw
            .split_once(':')
            .ok_or_else(|| EstimateParseError::Pattern(raw.to_string()))?;
        let hours: u32 = hours
            .parse()
            .map_err(|_| EstimateParseError::Pattern(raw.to_string()))?;
        let minutes: u32 = minutes
            .parse()
            .map_err(|_| EstimateParseError::Pattern(raw.to_string()))?;
        if minutes >= 60 {
            return Err(EstimateParseError::Minutes(raw.to_string()));
        }
        hours
            .checked_mul(60)
            .and_then(|m| m.checked_add(minutes))
            .map(Self::from_minutes)
            .ok_or_else(|| EstimateParseError::Pattern(raw.to_string()))
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.minutes / 60, self.minutes % 60)
    }
}

impl FromStr for Estimate {
    type Err = EstimateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Add for Estimate {
    type Output = Estimate;

    fn add(self, rhs: Estimate) -> Estimate {
        Estimate::from_minutes(self.minutes.saturating_add(rhs.minutes))
    }
}

impl Sum for Estimate {
    fn sum<I: Iterator<Item = Estimate>>(iter: I) -> Self {
        iter.fold(Estimate::default(), |acc, e| acc + e)
    }
}

impl Serialize for Estimate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Estimate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Estimate::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hours_and_minutes() {
        assert_eq!(Estimate::parse("01:30").unwrap().minutes(), 90);
        assert_eq!(Estimate::parse("8:00").unwrap().minutes(), 480);
        assert_eq!(Estimate::parse("120:15").unwrap().minutes(), 7215);
    }

    #[test]
    fn rejects_malformed_values() {
        assert!(matches!(
            Estimate::parse("1h"),
            Err(EstimateParseError::Pattern(_))
        ));
        assert!(matches!(
            Estimate::parse("99999999999:00"),
            Err(EstimateParseError::Pattern(_))
        ));
        assert!(matches!(
            Estimate::parse("01:75"),
            Err(EstimateParseError::Minutes(_))
        ));
    }

    #[test]
    fn display_is_zero_padded_and_exceeds_a_day() {
        assert_eq!(Estimate::from_minutes(65).to_string(), "01:05");
        assert_eq!(Estimate::from_hours(40).to_string(), "40:00");
        assert_eq!(Estimate::from_hours(130).to_string(), "130:00");
    }

    #[test]
    fn large_sums_parse_back() {
        let total: Estimate = std::iter::repeat(Estimate::from_hours(40)).take(30).sum();
        assert_eq!(total.to_string(), "1200:00");
        assert_eq!(Estimate::parse(&total.to_string()), Ok(total));
    }

    #[test]
    fn sums_in_minutes() {
        let total: Estimate = ["01:45", "02:30", "00:15"]
            .iter()
            .map(|s| Estimate::parse(s).unwrap())
            .sum();
        assert_eq!(total.to_string(), "04:30");
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_string(&Estimate::from_hours(13)).unwrap();
        assert_eq!(json, "\"13:00\"");
        let back: Estimate = serde_json::from_str("\"03:00\"").unwrap();
        assert_eq!(back, Estimate::from_hours(3));
        assert!(serde_json::from_str::<Estimate>("\"3 hours\"").is_err());
    }
}
