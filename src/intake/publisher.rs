use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::QueueSettings;
use crate::transport::credential::CredentialProvider;
use crate::transport::{QueueSender, sender_for};
use crate::utils::error::PublishError;

/// Outcome of a single publish. The caller decides whether a failure is
/// surfaced to its own caller.
pub type PublishOutcome = Result<(), PublishError>;

/// Hands order payloads to the transport selected at startup.
#[derive(Clone)]
pub struct OrderPublisher {
    queue_name: String,
    sender: Option<Arc<dyn QueueSender>>,
}

impl OrderPublisher {
    /// `sender` is `None` when no transport is configured; every publish then
    /// fails with `ConfigurationMissing` without touching the network.
    pub fn new(queue_name: impl Into<String>, sender: Option<Arc<dyn QueueSender>>) -> Self {
        Self {
            queue_name: queue_name.into(),
            sender,
        }
    }

    pub fn from_settings(settings: &QueueSettings, credentials: Arc<dyn CredentialProvider>) -> Self {
        let sender = sender_for(settings, credentials);
        match &sender {
            Some(sender) => info!(
                queue = %settings.name,
                destination = %sender.destination(),
                "publisher ready"
            ),
            None => warn!(queue = %settings.name, "no credentials set for message queue"),
        }
        Self::new(settings.name.clone(), sender)
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn is_configured(&self) -> bool {
        self.sender.is_some()
    }

    pub async fn publish(&self, payload: &[u8]) -> PublishOutcome {
        let Some(sender) = &self.sender else {
            warn!("no credentials set for message queue");
            return Err(PublishError::ConfigurationMissing);
        };

        info!(
            "sending message {} to {} on {}",
            String::from_utf8_lossy(payload),
            self.queue_name,
            sender.destination()
        );

        sender
            .send(&self.queue_name, payload)
            .await
            .map_err(|e| {
                error!(queue = %self.queue_name, error = %e, "failed to publish order");
                PublishError::from(e)
            })
    }
}

impl std::fmt::Debug for OrderPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderPublisher")
            .field("queue_name", &self.queue_name)
            .field(
                "destination",
                &self.sender.as_ref().map(|sender| sender.destination()),
            )
            .finish()
    }
}
