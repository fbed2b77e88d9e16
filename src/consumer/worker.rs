use std::future::{self, Future};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::settlement::{DeliveryState, Disposition, Settlement, settle};
use crate::config::Settings;
use crate::order::summarize;
use crate::persistence::DocumentStore;
use crate::transport::{Delivery, QueueReceiver, QueueSpec};
use crate::utils::error::{ParseError, TransportError};

/// At most one unacknowledged delivery per consumer.
pub const PREFETCH: u16 = 1;

/// Counters reported when the consumer loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: u64,
    pub nacked: u64,
}

/// Drains the order queue into the document store.
pub struct OrderConsumer {
    receiver: Box<dyn QueueReceiver>,
    store: Arc<dyn DocumentStore>,
    collection: String,
    spec: QueueSpec,
    requeue_on_nack: bool,
    stats: ConsumerStats,
}

impl OrderConsumer {
    pub fn new(
        receiver: Box<dyn QueueReceiver>,
        store: Arc<dyn DocumentStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            receiver,
            store,
            collection: settings.store.collection.clone(),
            spec: QueueSpec {
                name: settings.queue.name.clone(),
                durable: settings.consumer.durable,
                prefetch: PREFETCH,
            },
            requeue_on_nack: settings.consumer.requeue_on_nack,
            stats: ConsumerStats::default(),
        }
    }

    pub fn spec(&self) -> &QueueSpec {
        &self.spec
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Declare the queue and attach with a prefetch of one.
    pub async fn subscribe(&mut self) -> Result<(), TransportError> {
        self.receiver.subscribe(&self.spec).await?;
        info!(
            queue = %self.spec.name,
            collection = %self.collection,
            "listening for orders"
        );
        Ok(())
    }

    /// Parse and persist one delivery and decide its disposition. Nothing is
    /// inserted when parsing fails.
    pub fn process(&self, delivery: &Delivery) -> Settlement {
        let mut settlement = Settlement::received(delivery.tag);

        settlement.advance(DeliveryState::Parsing);
        let parsed = serde_json::from_slice::<Value>(&delivery.payload).map_err(ParseError::from);

        let persisted = match &parsed {
            Ok(document) => {
                settlement.advance(DeliveryState::Persisting);
                Some(self.store.insert(&self.collection, document))
            }
            Err(_) => None,
        };

        let disposition = settle(&parsed, persisted.as_ref());
        match (parsed, persisted) {
            (_, Some(Ok(id))) => settlement.document_id = Some(id),
            (_, Some(Err(e))) => settlement.error = Some(e.into()),
            (Err(e), None) => settlement.error = Some(e.into()),
            (Ok(_), None) => {}
        }

        settlement.finish(disposition)
    }

    /// Process a delivery and settle it with the broker.
    pub async fn handle(&mut self, delivery: Delivery) -> Result<Settlement, TransportError> {
        debug!(
            tag = delivery.tag,
            redelivered = delivery.redelivered,
            summary = %summarize(&delivery.payload),
            "delivery received"
        );
        let settlement = self.process(&delivery);

        match settlement.disposition {
            Disposition::Ack => {
                self.receiver.ack(delivery.tag).await?;
                self.stats.acked += 1;
                info!(
                    tag = delivery.tag,
                    id = settlement.document_id.as_deref().unwrap_or_default(),
                    "order persisted"
                );
            }
            Disposition::Nack => {
                if let Some(e) = &settlement.error {
                    warn!(tag = delivery.tag, error = %e, requeue = self.requeue_on_nack, "rejecting delivery");
                }
                self.receiver.nack(delivery.tag, self.requeue_on_nack).await?;
                self.stats.nacked += 1;
            }
        }
        Ok(settlement)
    }

    /// Wait for the next delivery and handle it. `None` once the
    /// subscription has ended.
    pub async fn consume_one(&mut self) -> Result<Option<Settlement>, TransportError> {
        match self.receiver.next_delivery().await? {
            Some(delivery) => self.handle(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Consume until the subscription ends.
    pub async fn run(&mut self) -> Result<ConsumerStats, TransportError> {
        self.run_until(future::pending()).await
    }

    /// Consume until the subscription ends or `shutdown` resolves. A
    /// delivery that is being processed is settled before returning.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<ConsumerStats, TransportError>
    where
        F: Future<Output = ()>,
    {
        self.subscribe().await?;
        tokio::pin!(shutdown);

        loop {
            let next = tokio::select! {
                _ = &mut shutdown => {
                    info!("consumer shutting down");
                    None
                }
                next = self.receiver.next_delivery() => Some(next),
            };

            match next {
                Some(Ok(Some(delivery))) => {
                    self.handle(delivery).await?;
                }
                Some(Ok(None)) => {
                    warn!(queue = %self.spec.name, "subscription ended");
                    break;
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        if let Err(e) = self.receiver.close().await {
            debug!(error = %e, "closing receiver failed");
        }
        info!(acked = self.stats.acked, nacked = self.stats.nacked, "consumer stopped");
        Ok(self.stats)
    }
}
