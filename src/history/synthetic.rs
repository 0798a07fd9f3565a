use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

use super::{format_row_time, HistoricalDataSource, HistoricalRow};
use crate::error::AppError;
use crate::model::resolution::Resolution;

/// Price level synthetic bars are anchored at. Only the open-close distance
/// carries information.
const SYNTHETIC_BASE_PRICE: f64 = 1_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SeriesParams {
    pub mean: f64,
    pub std: f64,
}

/// Distribution parameters for one (epic, resolution) pair.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SyntheticParams {
    pub epic: String,
    pub resolution: Resolution,
    pub volume: SeriesParams,
    pub spread: SeriesParams,
}

/// Generates bootstrap history from configured normal distributions instead
/// of querying the broker.
pub struct SyntheticHistory {
    params: HashMap<(String, Resolution), SyntheticParams>,
    rows: usize,
    rng: Mutex<StdRng>,
}

impl SyntheticHistory {
    pub fn new(params: Vec<SyntheticParams>, rows: usize, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            params: params
                .into_iter()
                .map(|p| ((p.epic.clone(), p.resolution), p))
                .collect(),
            rows,
            rng: Mutex::new(rng),
        }
    }

    fn lookup(&self, epic: &str, resolution: Resolution) -> Result<&SyntheticParams, AppError> {
        self.params
            .get(&(epic.to_string(), resolution))
            .ok_or_else(|| {
                AppError::Configuration(format!(
                    "no synthetic history parameters for {} {}",
                    epic, resolution
                ))
            })
    }
}

fn normal(params: SeriesParams, series: &str) -> Result<Normal<f64>, AppError> {
    Normal::new(params.mean, params.std).map_err(|e| {
        AppError::Configuration(format!("invalid {} distribution: {}", series, e))
    })
}

#[async_trait]
impl HistoricalDataSource for SyntheticHistory {
    async fn fetch(
        &self,
        epic: &str,
        resolution: Resolution,
        start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalRow>, AppError> {
        let params = self.lookup(epic, resolution)?;
        let volume_dist = normal(params.volume, "volume")?;
        let spread_dist = normal(params.spread, "spread")?;

        let mut rng = self
            .rng
            .lock()
            .map_err(|_| AppError::InvalidState("synthetic history rng lock poisoned".to_string()))?;

        let rows = (0..self.rows)
            .map(|i| {
                let volume = volume_dist.sample(&mut *rng).max(0.0);
                let spread = spread_dist.sample(&mut *rng).abs();
                let open = SYNTHETIC_BASE_PRICE;
                let close = SYNTHETIC_BASE_PRICE + spread;
                HistoricalRow {
                    timestamp: format_row_time(start + resolution.duration() * i as i32),
                    open,
                    close,
                    high: close,
                    low: open,
                    volume,
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(epic, resolution = %resolution, count = rows.len(), "Generated synthetic history");
        Ok(rows)
    }
}
