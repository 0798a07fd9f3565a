use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Notification, NotificationSink};
use crate::error::AppError;

/// Slow, possibly failing delivery of a notification (HTTP, mail relay, ...).
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, notification: &Notification) -> Result<(), AppError>;
}

/// Sink handed to trackers: it only enqueues, delivery happens on the
/// dispatcher task.
#[derive(Debug, Clone)]
pub struct DispatchSink {
    tx: mpsc::Sender<Notification>,
}

impl NotificationSink for DispatchSink {
    fn notify(&self, summary: &str, detail: &str) -> Result<(), AppError> {
        self.tx
            .try_send(Notification::new(summary, detail))
            .map_err(|e| AppError::Notification(format!("queue rejected notification: {}", e)))?;
        tracing::info!(summary, "Added notification to queue");
        Ok(())
    }
}

pub struct NotificationDispatcher;

impl NotificationDispatcher {
    /// Spawn the delivery task. It runs until every [`DispatchSink`] clone is
    /// dropped and the queue is drained.
    pub fn spawn(
        channels: Vec<Box<dyn DeliveryChannel>>,
        capacity: usize,
    ) -> (DispatchSink, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Notification>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                for channel in &channels {
                    match channel.deliver(&notification).await {
                        Ok(()) => {
                            tracing::info!(
                                channel = channel.name(),
                                subject = %notification.subject,
                                "Notification delivered"
                            );
                        }
                        Err(e) => {
                            tracing::error!(
                                channel = channel.name(),
                                error = %e,
                                "Failed to deliver notification"
                            );
                        }
                    }
                }
            }
            tracing::info!("Notification queue closed, dispatcher exiting");
        });
        (DispatchSink { tx }, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        seen: Arc<Mutex<Vec<Notification>>>,
        fail: bool,
    }

    #[async_trait]
    impl DeliveryChannel for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn deliver(&self, notification: &Notification) -> Result<(), AppError> {
            if self.fail {
                return Err(AppError::Notification("down".to_string()));
            }
            self.seen
                .lock()
                .map_err(|_| AppError::Notification("poisoned".to_string()))?
                .push(notification.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_to_every_channel_despite_failures() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let channels: Vec<Box<dyn DeliveryChannel>> = vec![
            Box::new(Recorder {
                seen: seen.clone(),
                fail: true,
            }),
            Box::new(Recorder {
                seen: seen.clone(),
                fail: false,
            }),
        ];
        let (sink, handle) = NotificationDispatcher::spawn(channels, 4);
        sink.notify("gold hammer", "{}").unwrap();
        drop(sink);
        handle.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].subject, "VPA Anomaly Detected: gold hammer");
    }

    #[tokio::test]
    async fn full_queue_is_reported_to_caller() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = DispatchSink { tx };
        sink.notify("first", "").unwrap();
        let err = sink.notify("second", "").unwrap_err();
        assert!(matches!(err, AppError::Notification(_)));
    }
}
