//! Webhook notifications.
//!
//! Sends one Slack-style message per call. There are no retries here: the
//! caller decides whether a failed send is attempted again later.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::NotifyConfig;

/// Outcome of a notification that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The webhook accepted the message.
    Sent,
    /// No webhook is configured; nothing was sent.
    Disabled,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("webhook answered with status {0}")]
    Status(u16),
}

impl From<NotifyError> for sleuth_proto::Error {
    fn from(err: NotifyError) -> Self {
        sleuth_proto::Error::Notify(err.to_string())
    }
}

/// Delivers alerts for jobs.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, job_id: &str) -> Result<Delivery, NotifyError>;
}

/// Builds the webhook body: a section block with the message and a context
/// block carrying the job id.
pub fn build_payload(message: &str, job_id: &str) -> Value {
    json!({
        "text": message,
        "blocks": [
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": message }
            },
            {
                "type": "context",
                "elements": [
                    { "type": "mrkdwn", "text": format!("Job ID: `{job_id}`") }
                ]
            }
        ]
    })
}

/// Posts to a Slack incoming webhook.
pub struct SlackNotifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
}

impl SlackNotifier {
    pub fn new(webhook_url: Option<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url,
        })
    }

    pub fn from_config(config: &NotifyConfig) -> Result<Self, NotifyError> {
        Self::new(
            config.webhook_url.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, message: &str, job_id: &str) -> Result<Delivery, NotifyError> {
        let Some(url) = &self.webhook_url else {
            warn!(job_id, "Webhook URL not configured, skipping notification");
            return Ok(Delivery::Disabled);
        };

        let response = self
            .client
            .post(url)
            .json(&build_payload(message, job_id))
            .send()
            .await
            .inspect_err(|e| error!(job_id, error = %e, "Error sending notification"))?;

        let status = response.status();
        if status.is_success() {
            info!(job_id, "Notification sent");
            Ok(Delivery::Sent)
        } else {
            error!(job_id, status = status.as_u16(), "Webhook rejected notification");
            Err(NotifyError::Status(status.as_u16()))
        }
    }
}
