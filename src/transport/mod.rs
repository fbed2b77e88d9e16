//! The `transport` module is responsible for moving order payloads between
//! the intake endpoint, the queue and the consumer.
//!
//! It defines the sender/receiver seams both sides are written against, and
//! the two concrete transports selectable at startup:
//!
//! - `amqp`: a direct broker connection with static credentials.
//! - `service_bus`: a managed-identity connection to a cloud messaging
//!   namespace, authenticated through a `credential::CredentialProvider`.
//!
//! The in-process `broker::InMemoryBroker` implements the same traits.

pub mod amqp;
pub mod credential;
pub mod service_bus;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{QueueSettings, TransportConfig};
use crate::utils::error::TransportError;

use self::amqp::{AmqpReceiver, AmqpSender};
use self::credential::{CredentialProvider, WorkloadIdentityCredential};
use self::service_bus::{ServiceBusReceiver, ServiceBusSender};

/// Acknowledgment handle assigned by the transport for one delivery.
pub type DeliveryTag = u64;

/// A message handed to the consumer. The tag is only meaningful to the
/// receiver that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub tag: DeliveryTag,
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

/// How the consumer attaches to its queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    /// Maximum unacknowledged deliveries outstanding at once.
    pub prefetch: u16,
}

/// Sending half: delivers a single opaque payload to a named queue.
#[async_trait]
pub trait QueueSender: Send + Sync {
    /// Human readable destination for diagnostics, never containing secrets.
    fn destination(&self) -> String;

    async fn send(&self, queue: &str, payload: &[u8]) -> Result<(), TransportError>;
}

/// Receiving half: a subscription with explicit settlement.
#[async_trait]
pub trait QueueReceiver: Send {
    /// Declare the queue (idempotent) and start consuming from it.
    async fn subscribe(&mut self, spec: &QueueSpec) -> Result<(), TransportError>;

    /// Wait for the next delivery. `None` means the subscription ended.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, TransportError>;

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), TransportError>;

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError>;

    /// Release the subscription.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Build the sender for the configured transport. `None` when unconfigured.
pub fn sender_for(
    settings: &QueueSettings,
    credentials: Arc<dyn CredentialProvider>,
) -> Option<Arc<dyn QueueSender>> {
    match &settings.transport {
        TransportConfig::Broker(conn) => Some(Arc::new(AmqpSender::new(conn.clone()))),
        TransportConfig::ManagedIdentity(conn) => {
            Some(Arc::new(ServiceBusSender::new(conn.clone(), credentials)))
        }
        TransportConfig::Unconfigured => None,
    }
}

/// Build the receiver for the configured transport. `None` when unconfigured.
pub fn receiver_for(
    settings: &QueueSettings,
    credentials: Arc<dyn CredentialProvider>,
) -> Option<Box<dyn QueueReceiver>> {
    match &settings.transport {
        TransportConfig::Broker(conn) => Some(Box::new(AmqpReceiver::new(conn.clone()))),
        TransportConfig::ManagedIdentity(conn) => {
            Some(Box::new(ServiceBusReceiver::new(conn.clone(), credentials)))
        }
        TransportConfig::Unconfigured => None,
    }
}

/// The platform credential provider used in managed-identity mode.
pub fn default_credentials() -> Arc<dyn CredentialProvider> {
    Arc::new(WorkloadIdentityCredential::from_env())
}
