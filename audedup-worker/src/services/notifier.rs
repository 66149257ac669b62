//! Best-effort webhook notifier
//!
//! POSTs each classification event as JSON to every configured target.
//! Each target gets one attempt with a short timeout; failures are logged
//! and never reach the engine, whose records are committed before the event
//! is emitted.

use audedup_common::events::ClassificationEvent;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const USER_AGENT: &str = concat!("audedup/", env!("CARGO_PKG_VERSION"));

/// Delivery errors for a single target
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Target responded with status {0}")]
    StatusError(u16),

    #[error("Failed to build HTTP client: {0}")]
    ClientError(String),
}

/// Webhook notifier
pub struct Notifier {
    http_client: reqwest::Client,
    targets: Vec<String>,
}

impl Notifier {
    pub fn new(targets: Vec<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::ClientError(e.to_string()))?;

        Ok(Self {
            http_client,
            targets,
        })
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Deliver to every target; returns how many accepted the event
    pub async fn notify(&self, event: &ClassificationEvent) -> usize {
        let mut delivered = 0;
        for url in &self.targets {
            match self.send_to(url, event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(url = %url, path = %event.path, error = %e, "Failed to send webhook");
                }
            }
        }
        delivered
    }

    /// Single delivery attempt to one target
    pub async fn send_to(&self, url: &str, event: &ClassificationEvent) -> Result<(), NotifyError> {
        let response = self
            .http_client
            .post(url)
            .json(event)
            .send()
            .await
            .map_err(|e| NotifyError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::StatusError(status.as_u16()));
        }

        tracing::debug!(url, path = %event.path, "Webhook delivered");
        Ok(())
    }
}

/// Forward every bus event to the notifier until the bus closes
pub fn spawn_listener(
    notifier: Arc<Notifier>,
    mut rx: broadcast::Receiver<ClassificationEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    notifier.notify(&event).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Notifier lagged behind, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("Notifier listener stopped");
    })
}
