use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Look-back window for the historical price chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum HistoryRange {
    #[serde(rename = "24h")]
    Day,
    #[default]
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
}

/// Selector sent by display clients; `1d` is accepted for `24h`
impl FromStr for HistoryRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "24h" | "1d" => Ok(HistoryRange::Day),
            "7d" => Ok(HistoryRange::Week),
            "30d" => Ok(HistoryRange::Month),
            _ => Err(format!("Invalid history range: {}", s)),
        }
    }
}

impl TryFrom<String> for HistoryRange {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl HistoryRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryRange::Day => "24h",
            HistoryRange::Week => "7d",
            HistoryRange::Month => "30d",
        }
    }

    pub fn days(&self) -> i64 {
        match self {
            HistoryRange::Day => 1,
            HistoryRange::Week => 7,
            HistoryRange::Month => 30,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::seconds(self.days() * 86_400)
    }

    /// Oldest timestamp still inside the window (inclusive)
    pub fn since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.duration()
    }
}
