use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::feed::types::SubscriptionKey;
use crate::history::ig_rest::IgCredentials;
use crate::history::synthetic::SyntheticParams;
use crate::model::resolution::Resolution;
use crate::tracker::{TrackerSettings, DEFAULT_WINDOW};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ig: IgConfig,
    pub feed: FeedConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub markets: Vec<MarketConfig>,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IgConfig {
    pub rest_base_url: String,
    #[serde(skip)]
    pub api_key: Option<String>,
    #[serde(skip)]
    pub cst: Option<String>,
    #[serde(skip)]
    pub security_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub ws_url: String,
    /// Bound of each tracker worker's update queue.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_true")]
    pub precalculate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketConfig {
    pub name: String,
    pub epic: String,
    pub resolution: Resolution,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub synthetic: Vec<SyntheticParams>,
    /// Fixed RNG seed for synthetic history; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub log: bool,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(skip)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// JSON log file; plain text to stderr when absent.
    #[serde(default)]
    pub file: Option<String>,
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    256
}

fn default_channel_capacity() -> usize {
    1024
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            precalculate: true,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            log: true,
            queue_capacity: default_queue_capacity(),
            webhook_url: None,
        }
    }
}

impl From<TrackerConfig> for TrackerSettings {
    fn from(cfg: TrackerConfig) -> Self {
        Self {
            window: cfg.window,
            precalculate: cfg.precalculate,
        }
    }
}

/// Parse a resolution string. Accepts feed codes ("5MINUTE", "HOUR") and
/// historical codes ("5Min", "1H").
pub fn parse_resolution(s: &str) -> Result<Resolution> {
    s.parse::<Resolution>()
        .with_context(|| format!("invalid resolution '{}'", s))
}

impl MarketConfig {
    pub fn subscription_key(&self) -> SubscriptionKey {
        SubscriptionKey::for_tracker(&self.epic, self.resolution)
    }
}

impl IgConfig {
    /// Session credentials for the REST price history. Only required when
    /// bootstrapping from the broker.
    pub fn credentials(&self) -> Result<IgCredentials> {
        let api_key = self
            .api_key
            .clone()
            .context("IG_API_KEY not set in .env or environment")?;
        let cst = self
            .cst
            .clone()
            .context("IG_CST not set in .env or environment")?;
        let security_token = self
            .security_token
            .clone()
            .context("IG_SECURITY_TOKEN not set in .env or environment")?;
        Ok(IgCredentials {
            api_key,
            cst,
            security_token,
        })
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config_path = path.as_ref();
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;

        let mut config = Self::from_toml_str(&config_str)
            .with_context(|| format!("failed to load {}", config_path.display()))?;

        config.ig.api_key = env_secret("IG_API_KEY");
        config.ig.cst = env_secret("IG_CST");
        config.ig.security_token = env_secret("IG_SECURITY_TOKEN");
        config.notifications.webhook_url = env_secret("VPA_WEBHOOK_URL");

        Ok(config)
    }

    /// Parse and validate without touching the environment.
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tracker.window == 0 {
            bail!("tracker.window must be > 0");
        }
        if self.notifications.queue_capacity == 0 {
            bail!("notifications.queue_capacity must be > 0");
        }
        if self.feed.channel_capacity == 0 {
            bail!("feed.channel_capacity must be > 0");
        }
        if self.markets.is_empty() {
            bail!("no [[markets]] configured");
        }

        let mut names = HashSet::new();
        for market in &self.markets {
            if market.name.trim().is_empty() {
                bail!("market name must not be empty (epic '{}')", market.epic);
            }
            if market.epic.trim().is_empty() || market.epic.contains(':') {
                bail!(
                    "market '{}' has invalid epic '{}'",
                    market.name,
                    market.epic
                );
            }
            if !names.insert(market.name.as_str()) {
                bail!("duplicate market name '{}'", market.name);
            }
        }

        for params in &self.history.synthetic {
            if !(params.volume.std >= 0.0 && params.spread.std >= 0.0) {
                bail!(
                    "synthetic history for {} {} has a negative std",
                    params.epic,
                    params.resolution
                );
            }
        }
        Ok(())
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        self.tracker.into()
    }

    /// Distinct feed items to subscribe to, in configuration order.
    pub fn subscription_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<SubscriptionKey> = Vec::new();
        for market in &self.markets {
            let key = market.subscription_key();
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
