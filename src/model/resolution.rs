use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Bar resolution of a feed item or tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Resolution {
    Minute,
    FiveMinute,
    FifteenMinute,
    ThirtyMinute,
    Hour,
}

impl Resolution {
    /// The resolution the streaming feed emits bars at. Longer resolutions are
    /// folded from bars of this size.
    pub const NATIVE: Resolution = Resolution::FiveMinute;

    pub const ALL: [Resolution; 5] = [
        Resolution::Minute,
        Resolution::FiveMinute,
        Resolution::FifteenMinute,
        Resolution::ThirtyMinute,
        Resolution::Hour,
    ];

    pub fn minutes(self) -> u32 {
        match self {
            Self::Minute => 1,
            Self::FiveMinute => 5,
            Self::FifteenMinute => 15,
            Self::ThirtyMinute => 30,
            Self::Hour => 60,
        }
    }

    pub fn duration(self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.minutes()))
    }

    /// Code used in streaming subscription keys, e.g. `15MINUTE`.
    pub fn feed_code(self) -> &'static str {
        match self {
            Self::Minute => "1MINUTE",
            Self::FiveMinute => "5MINUTE",
            Self::FifteenMinute => "15MINUTE",
            Self::ThirtyMinute => "30MINUTE",
            Self::Hour => "HOUR",
        }
    }

    /// Short code used by historical parameter tables, e.g. `15Min`.
    pub fn historical_code(self) -> &'static str {
        match self {
            Self::Minute => "1Min",
            Self::FiveMinute => "5Min",
            Self::FifteenMinute => "15Min",
            Self::ThirtyMinute => "30Min",
            Self::Hour => "1H",
        }
    }

    /// Path segment of the REST price history endpoint (API version 2).
    pub fn rest_code(self) -> &'static str {
        match self {
            Self::Minute => "MINUTE",
            Self::FiveMinute => "MINUTE_5",
            Self::FifteenMinute => "MINUTE_15",
            Self::ThirtyMinute => "MINUTE_30",
            Self::Hour => "HOUR",
        }
    }

    /// True when bars of this resolution are built from native feed bars.
    pub fn is_composite(self) -> bool {
        self.minutes() > Self::NATIVE.minutes()
    }

    /// Number of native bars that make up one bar of this resolution.
    pub fn composite_ratio(self) -> Result<u32, AppError> {
        let native = Self::NATIVE.minutes();
        if !self.is_composite() || self.minutes() % native != 0 {
            return Err(AppError::Configuration(format!(
                "resolution {} cannot be built from {} bars",
                self,
                Self::NATIVE
            )));
        }
        Ok(self.minutes() / native)
    }

    /// Resolution of the feed item a tracker at this resolution consumes.
    pub fn subscription_resolution(self) -> Resolution {
        if self.is_composite() {
            Self::NATIVE
        } else {
            self
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.feed_code())
    }
}

impl FromStr for Resolution {
    type Err = AppError;

    /// Accepts feed codes (`5MINUTE`) and historical codes (`5Min`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|r| {
                trimmed.eq_ignore_ascii_case(r.feed_code())
                    || trimmed.eq_ignore_ascii_case(r.historical_code())
            })
            .ok_or_else(|| AppError::Configuration(format!("unknown resolution '{}'", s)))
    }
}

impl TryFrom<String> for Resolution {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.feed_code().to_string()
    }
}
