use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::bar::{BarValues, FIELD_COMPLETE};
use crate::model::resolution::Resolution;

const CHART_PREFIX: &str = "CHART";

/// One bar-update event from the streaming feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarUpdate {
    /// Subscription key of the feed item, e.g. `CHART:CS.D.CFDGOLD.CFDGC.IP:5MINUTE`.
    pub name: String,
    pub values: BarValues,
}

impl BarUpdate {
    /// True when the feed marked the bar as finalized (`CONS_END == "1"`).
    pub fn is_complete(&self) -> bool {
        self.values
            .get(FIELD_COMPLETE)
            .is_some_and(|v| v.trim() == "1")
    }

    pub fn subscription_key(&self) -> Result<SubscriptionKey, AppError> {
        self.name.parse()
    }
}

/// Feed item identifier: `CHART:{epic}:{resolution}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub epic: String,
    pub resolution: Resolution,
}

impl SubscriptionKey {
    pub fn new(epic: impl Into<String>, resolution: Resolution) -> Self {
        Self {
            epic: epic.into(),
            resolution,
        }
    }

    /// Key of the feed item a tracker at `resolution` consumes.
    pub fn for_tracker(epic: &str, resolution: Resolution) -> Self {
        Self::new(epic, resolution.subscription_resolution())
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", CHART_PREFIX, self.epic, self.resolution)
    }
}

impl FromStr for SubscriptionKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AppError::Configuration(format!("invalid subscription key '{}'", s));
        let mut parts = s.trim().split(':');
        let (Some(prefix), Some(epic), Some(resolution), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if prefix != CHART_PREFIX || epic.is_empty() {
            return Err(invalid());
        }
        Ok(Self::new(epic, resolution.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_key_round_trip() {
        let key: SubscriptionKey = "CHART:CS.D.CFDGOLD.CFDGC.IP:15MINUTE".parse().unwrap();
        assert_eq!(key.epic, "CS.D.CFDGOLD.CFDGC.IP");
        assert_eq!(key.resolution, Resolution::FifteenMinute);
        assert_eq!(key.to_string(), "CHART:CS.D.CFDGOLD.CFDGC.IP:15MINUTE");
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!("MARKET:X:5MINUTE".parse::<SubscriptionKey>().is_err());
        assert!("CHART:X".parse::<SubscriptionKey>().is_err());
        assert!("CHART:X:5MINUTE:extra".parse::<SubscriptionKey>().is_err());
        assert!("CHART::5MINUTE".parse::<SubscriptionKey>().is_err());
    }

    #[test]
    fn tracker_key_uses_native_feed_for_composites() {
        assert_eq!(
            SubscriptionKey::for_tracker("GOLD", Resolution::Hour).to_string(),
            "CHART:GOLD:5MINUTE"
        );
    }

    #[test]
    fn completion_flag() {
        let mut update: BarUpdate =
            serde_json::from_str(r#"{"name":"CHART:GOLD:5MINUTE","values":{"CONS_END":"0"}}"#)
                .unwrap();
        assert!(!update.is_complete());
        update.values.insert("CONS_END".to_string(), "1".to_string());
        assert!(update.is_complete());
    }
}
