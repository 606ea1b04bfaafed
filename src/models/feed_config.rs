use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Months,
}

impl TimeUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
            TimeUnit::Months => "months",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "second" | "seconds" => Ok(TimeUnit::Seconds),
            "minute" | "minutes" => Ok(TimeUnit::Minutes),
            "hour" | "hours" => Ok(TimeUnit::Hours),
            "day" | "days" => Ok(TimeUnit::Days),
            "month" | "months" => Ok(TimeUnit::Months),
            other => Err(AppError::InvalidCadence(format!("unknown unit '{}'", other))),
        }
    }
}

/// A unit plus a positive count, used both as a fetch cadence and as a retention window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub unit: TimeUnit,
    pub value: u32,
}

impl Period {
    pub fn new(unit: TimeUnit, value: u32) -> Result<Self> {
        let period = Self { unit, value };
        period.validate()?;
        Ok(period)
    }

    pub const fn seconds(value: u32) -> Self {
        Self { unit: TimeUnit::Seconds, value }
    }

    pub const fn minutes(value: u32) -> Self {
        Self { unit: TimeUnit::Minutes, value }
    }

    pub const fn hours(value: u32) -> Self {
        Self { unit: TimeUnit::Hours, value }
    }

    pub const fn days(value: u32) -> Self {
        Self { unit: TimeUnit::Days, value }
    }

    pub const fn months(value: u32) -> Self {
        Self { unit: TimeUnit::Months, value }
    }

    /// Build a period from loosely-typed input such as request parameters.
    pub fn parse(unit: &str, value: Option<&str>) -> Result<Self> {
        let unit = unit.parse::<TimeUnit>()?;
        let raw = value.ok_or_else(|| AppError::InvalidCadence("missing value".to_string()))?;
        let value = raw
            .trim()
            .parse::<u32>()
            .map_err(|_| AppError::InvalidCadence(format!("'{}' is not a positive integer", raw)))?;
        Self::new(unit, value)
    }

    pub fn validate(&self) -> Result<()> {
        if self.value == 0 {
            return Err(AppError::InvalidCadence(format!(
                "value must be positive, got 0 {}",
                self.unit
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub id: String,
    pub category_id: String,
    pub name: String,
    pub url: String,
    pub cadence: Period,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_loose_cadence() {
        assert_eq!(Period::parse("Minutes", Some(" 15 ")).unwrap(), Period::minutes(15));
        assert_eq!(Period::parse("month", Some("1")).unwrap(), Period::months(1));
    }

    #[test]
    fn rejects_malformed_cadence() {
        assert!(matches!(
            Period::parse("weeks", Some("1")),
            Err(AppError::InvalidCadence(_))
        ));
        assert!(matches!(
            Period::parse("days", None),
            Err(AppError::InvalidCadence(_))
        ));
        assert!(matches!(
            Period::parse("days", Some("-3")),
            Err(AppError::InvalidCadence(_))
        ));
        assert!(Period::days(0).validate().is_err());
    }

    #[test]
    fn config_defaults_to_enabled() {
        let json = r#"{
            "id": "f1",
            "category_id": "root",
            "name": "Example",
            "url": "https://example.com/feed.xml",
            "cadence": { "unit": "hours", "value": 2 }
        }"#;
        let config: FeedConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert_eq!(config.cadence, Period::hours(2));
        assert_eq!(config.icon_url, None);
    }
}
