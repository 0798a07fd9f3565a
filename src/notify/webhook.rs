use async_trait::async_trait;

use super::dispatcher::DeliveryChannel;
use super::Notification;
use crate::error::AppError;

/// Posts each notification as JSON to a webhook endpoint.
pub struct WebhookChannel {
    http: reqwest::Client,
    url: url::Url,
}

impl WebhookChannel {
    pub fn new(url: &str) -> Result<Self, AppError> {
        let url = url::Url::parse(url)
            .map_err(|e| AppError::Configuration(format!("invalid webhook url '{}': {}", url, e)))?;
        Ok(Self {
            http: reqwest::Client::new(),
            url,
        })
    }

    pub fn url(&self) -> &url::Url {
        &self.url
    }
}

#[async_trait]
impl DeliveryChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), AppError> {
        let resp = self
            .http
            .post(self.url.clone())
            .json(notification)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Notification(format!(
                "webhook returned {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}
