pub mod dispatcher;
pub mod webhook;

use serde::Serialize;

use crate::error::AppError;

pub use dispatcher::{DeliveryChannel, DispatchSink, NotificationDispatcher};
pub use webhook::WebhookChannel;

/// Receives anomaly notifications from a tracker. Implementations must return
/// quickly; slow delivery belongs behind a [`NotificationDispatcher`].
pub trait NotificationSink: Send + Sync {
    fn notify(&self, summary: &str, detail: &str) -> Result<(), AppError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub subject: String,
    pub summary: String,
    pub detail: String,
}

impl Notification {
    pub fn new(summary: &str, detail: &str) -> Self {
        Self {
            subject: format!("VPA Anomaly Detected: {}", summary),
            summary: summary.to_string(),
            detail: detail.to_string(),
        }
    }
}

/// Writes anomalies to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, summary: &str, detail: &str) -> Result<(), AppError> {
        tracing::warn!(summary, detail, "Anomaly detected");
        Ok(())
    }
}
