//! Managed-identity transport over the cloud messaging REST interface.
//!
//! Sending posts the payload to `<namespace>/<queue>/messages`. Receiving uses
//! peek-lock: a message is locked with `POST .../messages/head`, completed
//! with `DELETE` on ack and abandoned with `PUT` on nack.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use super::credential::{CredentialProvider, SERVICE_BUS_SCOPE};
use super::{Delivery, DeliveryTag, QueueReceiver, QueueSender, QueueSpec};
use crate::config::ManagedIdentityConnection;
use crate::utils::error::TransportError;

/// Long-poll window for a single receive request, in seconds.
const RECEIVE_TIMEOUT_SECS: u64 = 30;

/// `https://` is assumed when the namespace carries no scheme.
fn namespace_url(namespace: &str) -> Result<Url, TransportError> {
    let namespace = namespace.trim_end_matches('/');
    let raw = if namespace.starts_with("http://") || namespace.starts_with("https://") {
        namespace.to_string()
    } else {
        format!("https://{namespace}")
    };
    Url::parse(&raw).map_err(|e| TransportError::Connection(format!("invalid namespace {raw}: {e}")))
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, TransportError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| TransportError::Connection(format!("{base} cannot be a base url")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn rejected(response: reqwest::Response) -> TransportError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TransportError::Rejected { status, body }
}

pub struct ServiceBusSender {
    connection: ManagedIdentityConnection,
    credentials: Arc<dyn CredentialProvider>,
    client: reqwest::Client,
}

impl ServiceBusSender {
    pub fn new(
        connection: ManagedIdentityConnection,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            connection,
            credentials,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl QueueSender for ServiceBusSender {
    fn destination(&self) -> String {
        format!("{} using workload identity credentials", self.connection.namespace)
    }

    async fn send(&self, queue: &str, payload: &[u8]) -> Result<(), TransportError> {
        let token = self.credentials.token(SERVICE_BUS_SCOPE).await?;
        let url = endpoint(&namespace_url(&self.connection.namespace)?, &[queue, "messages"])?;

        let response = self
            .client
            .post(url)
            .bearer_auth(&token.token)
            .body(payload.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct BrokerProperties {
    #[serde(rename = "MessageId")]
    message_id: String,
    #[serde(rename = "LockToken")]
    lock_token: String,
    #[serde(rename = "DeliveryCount", default)]
    delivery_count: u32,
}

#[derive(Debug)]
struct LockedMessage {
    message_id: String,
    lock_token: String,
}

/// Peek-lock receiver. Holds at most `prefetch` locked messages.
pub struct ServiceBusReceiver {
    connection: ManagedIdentityConnection,
    credentials: Arc<dyn CredentialProvider>,
    client: reqwest::Client,
    queue: Option<String>,
    prefetch: u16,
    locked: HashMap<DeliveryTag, LockedMessage>,
    next_tag: DeliveryTag,
    receive_timeout_secs: u64,
}

impl ServiceBusReceiver {
    pub fn new(
        connection: ManagedIdentityConnection,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            connection,
            credentials,
            client: reqwest::Client::new(),
            queue: None,
            prefetch: 1,
            locked: HashMap::new(),
            next_tag: 0,
            receive_timeout_secs: RECEIVE_TIMEOUT_SECS,
        }
    }

    pub fn with_receive_timeout(mut self, secs: u64) -> Self {
        self.receive_timeout_secs = secs;
        self
    }

    fn queue(&self) -> Result<&str, TransportError> {
        self.queue
            .as_deref()
            .ok_or_else(|| TransportError::Closed("not subscribed".into()))
    }

    async fn settle(&mut self, tag: DeliveryTag, complete: bool) -> Result<(), TransportError> {
        let queue = self.queue()?.to_string();
        let locked = self
            .locked
            .remove(&tag)
            .ok_or(TransportError::UnknownDelivery(tag))?;

        let token = self.credentials.token(SERVICE_BUS_SCOPE).await?;
        let url = endpoint(
            &namespace_url(&self.connection.namespace)?,
            &[
                queue.as_str(),
                "messages",
                locked.message_id.as_str(),
                locked.lock_token.as_str(),
            ],
        )?;

        let request = if complete {
            self.client.delete(url)
        } else {
            self.client.put(url)
        };
        let response = request.bearer_auth(&token.token).send().await?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }
        Ok(())
    }
}

#[async_trait]
impl QueueReceiver for ServiceBusReceiver {
    async fn subscribe(&mut self, spec: &QueueSpec) -> Result<(), TransportError> {
        // Queues and their durability are provisioned on the namespace.
        debug!(queue = %spec.name, durable = spec.durable, "attaching peek-lock receiver");
        self.queue = Some(spec.name.clone());
        self.prefetch = spec.prefetch;
        self.locked.clear();
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, TransportError> {
        let queue = self.queue()?.to_string();
        if self.prefetch != 0 && self.locked.len() >= self.prefetch as usize {
            return Err(TransportError::Channel(format!(
                "prefetch limit of {} reached",
                self.prefetch
            )));
        }

        let base = namespace_url(&self.connection.namespace)?;
        loop {
            let token = self.credentials.token(SERVICE_BUS_SCOPE).await?;
            let mut url = endpoint(&base, &[queue.as_str(), "messages", "head"])?;
            url.query_pairs_mut()
                .append_pair("timeout", &self.receive_timeout_secs.to_string());

            let response = self
                .client
                .post(url)
                .bearer_auth(&token.token)
                .send()
                .await?;

            match response.status() {
                StatusCode::NO_CONTENT => continue,
                status if status.is_success() => {
                    let properties = response
                        .headers()
                        .get("BrokerProperties")
                        .and_then(|v| v.to_str().ok())
                        .ok_or_else(|| {
                            TransportError::Channel("missing BrokerProperties header".into())
                        })
                        .and_then(|raw| {
                            serde_json::from_str::<BrokerProperties>(raw)
                                .map_err(|e| TransportError::Channel(e.to_string()))
                        })?;
                    let payload = response.bytes().await?.to_vec();

                    self.next_tag += 1;
                    let tag = self.next_tag;
                    self.locked.insert(
                        tag,
                        LockedMessage {
                            message_id: properties.message_id,
                            lock_token: properties.lock_token,
                        },
                    );

                    return Ok(Some(Delivery {
                        tag,
                        payload,
                        redelivered: properties.delivery_count > 1,
                    }));
                }
                StatusCode::NOT_FOUND | StatusCode::GONE => {
                    warn!(queue = %queue, "queue no longer exists");
                    return Ok(None);
                }
                _ => return Err(rejected(response).await),
            }
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), TransportError> {
        self.settle(tag, true).await
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError> {
        if !requeue {
            // Abandon is the only negative settlement here; the namespace's
            // max delivery count decides when it gets dead-lettered.
            debug!(tag, "abandoning message, requeue=false is not distinguishable");
        }
        self.settle(tag, false).await
    }
}
