use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use super::types::BarUpdate;

/// Feeds recorded bar updates (one JSON [`BarUpdate`] per line) into the
/// same channel the live feed uses.
#[derive(Debug, Clone)]
pub struct ReplayFeed {
    path: PathBuf,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub sent: usize,
    pub skipped: usize,
}

impl ReplayFeed {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Send every line of the file in order. Blank lines are ignored and
    /// lines that do not parse are counted as skipped.
    pub async fn run(&self, update_tx: mpsc::Sender<BarUpdate>) -> Result<ReplayStats> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .with_context(|| format!("failed to open replay file {}", self.path.display()))?;
        let mut lines = BufReader::new(file).lines();
        let mut stats = ReplayStats::default();
        let mut line_no = 0usize;

        while let Some(line) = lines
            .next_line()
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?
        {
            line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<BarUpdate>(line) {
                Ok(update) => {
                    if update_tx.send(update).await.is_err() {
                        tracing::info!(line = line_no, "Update channel closed, stopping replay");
                        break;
                    }
                    stats.sent += 1;
                }
                Err(e) => {
                    tracing::warn!(line = line_no, error = %e, "Skipping unparseable replay line");
                    stats.skipped += 1;
                }
            }
        }

        tracing::info!(
            file = %self.path.display(),
            sent = stats.sent,
            skipped = stats.skipped,
            "Replay finished"
        );
        Ok(stats)
    }
}
