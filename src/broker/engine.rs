//! Broker engine
//!
//! In-process queue broker used by the `relay` command and the tests. It
//! follows the delivery rules of an AMQP broker closely enough for the relay
//! to behave the same against it:
//! - queues are declared idempotently, with a durability flag
//! - each consumer has a prefetch limit on unacknowledged deliveries
//! - deliveries are settled by tag; a nack may requeue at the head
//! - a restart drops non-durable queues and everything in them
//!
//! Concurrency notes: state lives behind a `std::sync::Mutex` that is never
//! held across an await. Receivers wait on a shared `Notify` that is
//! signalled whenever a message becomes ready or capacity frees up.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::queue::{ConsumerId, Queue};
use crate::transport::{Delivery, DeliveryTag, QueueReceiver, QueueSender, QueueSpec};
use crate::utils::error::TransportError;

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<String, Queue>,
    next_tag: DeliveryTag,
    next_consumer: ConsumerId,
    /// Bumped on every restart so stale receivers notice they were cancelled.
    generation: u64,
}

enum Fetch {
    Delivered(Delivery),
    Empty,
    Cancelled,
}

/// Cheap to clone; all clones share the same queues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Declares a queue. Redeclaring with the same durability is a no-op;
    /// a different durability is rejected like an AMQP broker would.
    pub fn declare_queue(&self, name: &str, durable: bool) -> Result<(), TransportError> {
        let mut state = self.lock();
        match state.queues.get(name) {
            Some(queue) if queue.durable != durable => Err(TransportError::Channel(format!(
                "inequivalent arg 'durable' for queue '{name}': existing {}, requested {durable}",
                queue.durable
            ))),
            Some(_) => Ok(()),
            None => {
                state.queues.insert(name.to_string(), Queue::new(name, durable));
                debug!(queue = name, durable, "queue declared");
                Ok(())
            }
        }
    }

    /// Enqueue a payload. Publishing to an unknown queue creates it as
    /// non-durable so early orders are not lost before a consumer attaches.
    pub fn publish(&self, queue: &str, payload: Vec<u8>) {
        {
            let mut state = self.lock();
            state
                .queues
                .entry(queue.to_string())
                .or_insert_with(|| Queue::new(queue, false))
                .enqueue(payload);
        }
        self.notify.notify_waiters();
    }

    /// Simulates a broker restart. Non-durable queues vanish with their
    /// messages; durable queues keep theirs, unacked ones included. Every
    /// consumer is cancelled.
    pub fn restart(&self) {
        {
            let mut state = self.lock();
            let before = state.queues.len();
            state.queues.retain(|_, queue| queue.durable);
            for queue in state.queues.values_mut() {
                queue.reset_consumers();
            }
            state.generation += 1;
            info!(
                dropped = before - state.queues.len(),
                kept = state.queues.len(),
                "broker restarted"
            );
        }
        self.notify.notify_waiters();
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.lock().queues.contains_key(name)
    }

    /// Messages waiting to be delivered.
    pub fn ready_count(&self, name: &str) -> usize {
        self.lock().queues.get(name).map_or(0, |q| q.ready.len())
    }

    /// Messages delivered but not yet settled.
    pub fn unacked_count(&self, name: &str) -> usize {
        self.lock().queues.get(name).map_or(0, Queue::unacked_count)
    }

    pub fn sender(&self) -> InMemorySender {
        InMemorySender {
            broker: self.clone(),
        }
    }

    pub fn receiver(&self) -> InMemoryReceiver {
        InMemoryReceiver {
            broker: self.clone(),
            subscription: None,
        }
    }

    fn attach(&self, queue: &str, prefetch: u16) -> Result<Subscription, TransportError> {
        let mut state = self.lock();
        state.next_consumer += 1;
        let consumer = state.next_consumer;
        let generation = state.generation;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| TransportError::Closed(format!("queue '{queue}' not found")))?;
        q.add_consumer(consumer, prefetch);
        Ok(Subscription {
            queue: queue.to_string(),
            consumer,
            generation,
        })
    }

    fn fetch(&self, sub: &Subscription) -> Fetch {
        let mut state = self.lock();
        if state.generation != sub.generation {
            return Fetch::Cancelled;
        }
        state.next_tag += 1;
        let tag = state.next_tag;
        match state.queues.get_mut(&sub.queue) {
            Some(queue) => match queue.try_deliver(sub.consumer, tag) {
                Some(delivery) => Fetch::Delivered(delivery),
                None => Fetch::Empty,
            },
            None => Fetch::Cancelled,
        }
    }

    fn settle(
        &self,
        sub: &Subscription,
        tag: DeliveryTag,
        requeue: Option<bool>,
    ) -> Result<(), TransportError> {
        let settled = {
            let mut state = self.lock();
            if state.generation != sub.generation {
                return Err(TransportError::Closed("consumer cancelled".into()));
            }
            let queue = state
                .queues
                .get_mut(&sub.queue)
                .ok_or_else(|| TransportError::Closed(format!("queue '{}' gone", sub.queue)))?;
            match requeue {
                None => queue.ack(sub.consumer, tag),
                Some(requeue) => queue.nack(sub.consumer, tag, requeue),
            }
        };

        if !settled {
            return Err(TransportError::UnknownDelivery(tag));
        }
        // capacity freed or a message was requeued
        self.notify.notify_waiters();
        Ok(())
    }

    fn detach(&self, sub: &Subscription) {
        {
            let mut state = self.lock();
            if state.generation != sub.generation {
                return;
            }
            if let Some(queue) = state.queues.get_mut(&sub.queue) {
                queue.remove_consumer(sub.consumer);
            }
        }
        self.notify.notify_waiters();
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    queue: String,
    consumer: ConsumerId,
    generation: u64,
}

/// Sending handle onto an `InMemoryBroker`.
#[derive(Debug, Clone)]
pub struct InMemorySender {
    broker: InMemoryBroker,
}

#[async_trait]
impl QueueSender for InMemorySender {
    fn destination(&self) -> String {
        "in-process broker".to_string()
    }

    async fn send(&self, queue: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.broker.publish(queue, payload.to_vec());
        Ok(())
    }
}

/// A consumer on an `InMemoryBroker`. Dropping it returns its unacked
/// messages to the queue.
#[derive(Debug)]
pub struct InMemoryReceiver {
    broker: InMemoryBroker,
    subscription: Option<Subscription>,
}

impl InMemoryReceiver {
    fn subscription(&self) -> Result<&Subscription, TransportError> {
        self.subscription
            .as_ref()
            .ok_or_else(|| TransportError::Closed("not subscribed".into()))
    }
}

#[async_trait]
impl QueueReceiver for InMemoryReceiver {
    async fn subscribe(&mut self, spec: &QueueSpec) -> Result<(), TransportError> {
        if let Some(previous) = self.subscription.take() {
            self.broker.detach(&previous);
        }
        self.broker.declare_queue(&spec.name, spec.durable)?;
        self.subscription = Some(self.broker.attach(&spec.name, spec.prefetch)?);
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, TransportError> {
        let sub = self.subscription()?.clone();
        loop {
            // Register interest before looking so a concurrent publish is not missed.
            let notified = self.broker.notify.notified();
            match self.broker.fetch(&sub) {
                Fetch::Delivered(delivery) => return Ok(Some(delivery)),
                Fetch::Cancelled => {
                    warn!(queue = %sub.queue, "consumer cancelled by broker");
                    self.subscription = None;
                    return Ok(None);
                }
                Fetch::Empty => notified.await,
            }
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), TransportError> {
        let sub = self.subscription()?;
        self.broker.settle(sub, tag, None)
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError> {
        let sub = self.subscription()?;
        self.broker.settle(sub, tag, Some(requeue))
    }
}

impl Drop for InMemoryReceiver {
    fn drop(&mut self) {
        if let Some(sub) = self.subscription.take() {
            self.broker.detach(&sub);
        }
    }
}
