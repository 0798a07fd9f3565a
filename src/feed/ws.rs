use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;

use super::types::{BarUpdate, SubscriptionKey};
use crate::error::AppError;

/// Exponential backoff for reconnection.
struct ExponentialBackoff {
    current: Duration,
    initial: Duration,
    max: Duration,
    factor: f64,
}

impl ExponentialBackoff {
    fn new(initial: Duration, max: Duration, factor: f64) -> Self {
        Self {
            current: initial,
            initial,
            max,
            factor,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::from_secs_f64(
            (self.current.as_secs_f64() * self.factor).min(self.max.as_secs_f64()),
        );
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Streams bar updates from a WebSocket relay. On connect the client sends
/// `{"subscribe": [keys...]}` and then expects one JSON [`BarUpdate`] per
/// text frame.
#[derive(Debug, Clone)]
pub struct WsFeedClient {
    url: url::Url,
    keys: Vec<SubscriptionKey>,
}

impl WsFeedClient {
    pub fn new(ws_url: &str, keys: Vec<SubscriptionKey>) -> Result<Self> {
        let url = url::Url::parse(ws_url).with_context(|| format!("invalid feed url '{}'", ws_url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            anyhow::bail!("feed url '{}' must use ws:// or wss://", ws_url);
        }
        Ok(Self { url, keys })
    }

    fn subscribe_message(&self) -> String {
        let keys: Vec<String> = self.keys.iter().map(ToString::to_string).collect();
        serde_json::json!({ "subscribe": keys }).to_string()
    }

    /// Connect and run the read loop with automatic reconnection until
    /// `shutdown` flips.
    pub async fn connect_and_run(
        &self,
        update_tx: mpsc::Sender<BarUpdate>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut backoff = ExponentialBackoff::new(
            Duration::from_secs(1),
            Duration::from_secs(60),
            2.0,
        );
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.connect_once(&update_tx, &mut shutdown, &mut backoff).await {
                Ok(()) => {
                    tracing::info!(url = %self.url, "Feed disconnected");
                    break;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        url = %self.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Feed error, reconnecting"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = shutdown.changed() => {
                            tracing::info!("Shutdown during reconnect");
                            break;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn connect_once(
        &self,
        update_tx: &mpsc::Sender<BarUpdate>,
        shutdown: &mut watch::Receiver<bool>,
        backoff: &mut ExponentialBackoff,
    ) -> Result<()> {
        tracing::info!(url = %self.url, "Connecting to feed");
        let (ws_stream, _resp) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .context("WebSocket connect failed")?;
        backoff.reset();

        let (mut write, mut read) = ws_stream.split();
        write
            .send(tungstenite::Message::Text(self.subscribe_message()))
            .await
            .context("failed to send subscription")?;
        tracing::info!(items = self.keys.len(), "Feed connected and subscribed");

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(tungstenite::Message::Text(text))) => {
                            match serde_json::from_str::<BarUpdate>(&text) {
                                Ok(update) => {
                                    if update_tx.send(update).await.is_err() {
                                        tracing::info!("Update channel closed, stopping feed");
                                        return Ok(());
                                    }
                                }
                                Err(e) => {
                                    tracing::debug!(error = %e, "Failed to parse feed message");
                                }
                            }
                        }
                        Some(Ok(tungstenite::Message::Close(_))) => {
                            return Err(AppError::WebSocket("feed closed by server".to_string()).into());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            return Err(AppError::WebSocket(e.to_string()).into());
                        }
                        None => {
                            return Err(anyhow::anyhow!("WebSocket stream ended"));
                        }
                    }
                }
                _ = shutdown.changed() => {
                    let _ = write.send(tungstenite::Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
}
