use std::collections::{BTreeMap, HashMap, VecDeque};

use crate::transport::{Delivery, DeliveryTag};

pub type ConsumerId = u64;

/// A message waiting in a queue or held by a consumer.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub payload: Vec<u8>,
    pub redelivered: bool,
}

/// One consumer attached to a queue and the deliveries it has not settled.
#[derive(Debug, Default)]
pub struct ConsumerSlot {
    /// Zero means unlimited.
    pub prefetch: u16,
    pub unacked: BTreeMap<DeliveryTag, QueuedMessage>,
}

impl ConsumerSlot {
    fn has_capacity(&self) -> bool {
        self.prefetch == 0 || self.unacked.len() < self.prefetch as usize
    }
}

/// Represents a named queue in the broker.
///
/// Ready messages are delivered in FIFO order to consumers with spare
/// prefetch capacity. Requeued messages go back to the head of the queue.
#[derive(Debug, Default)]
pub struct Queue {
    pub name: String,
    pub durable: bool,
    pub ready: VecDeque<QueuedMessage>,
    pub consumers: HashMap<ConsumerId, ConsumerSlot>,
}

impl Queue {
    pub fn new(name: &str, durable: bool) -> Self {
        Self {
            name: name.to_string(),
            durable,
            ready: VecDeque::new(),
            consumers: HashMap::new(),
        }
    }

    pub fn enqueue(&mut self, payload: Vec<u8>) {
        self.ready.push_back(QueuedMessage {
            payload,
            redelivered: false,
        });
    }

    pub fn add_consumer(&mut self, id: ConsumerId, prefetch: u16) {
        self.consumers.insert(
            id,
            ConsumerSlot {
                prefetch,
                unacked: BTreeMap::new(),
            },
        );
    }

    /// Detach a consumer. Whatever it had not settled goes back to the head
    /// of the queue, flagged as redelivered, in original order.
    pub fn remove_consumer(&mut self, id: ConsumerId) {
        if let Some(slot) = self.consumers.remove(&id) {
            self.requeue_all(slot.unacked);
        }
    }

    /// Hand the next ready message to `consumer` if its prefetch allows it.
    pub fn try_deliver(&mut self, consumer: ConsumerId, tag: DeliveryTag) -> Option<Delivery> {
        let slot = self.consumers.get_mut(&consumer)?;
        if !slot.has_capacity() {
            return None;
        }

        let message = self.ready.pop_front()?;
        let delivery = Delivery {
            tag,
            payload: message.payload.clone(),
            redelivered: message.redelivered,
        };
        slot.unacked.insert(tag, message);
        Some(delivery)
    }

    /// Settle an outstanding delivery. Returns false if the tag is unknown.
    pub fn ack(&mut self, consumer: ConsumerId, tag: DeliveryTag) -> bool {
        self.consumers
            .get_mut(&consumer)
            .and_then(|slot| slot.unacked.remove(&tag))
            .is_some()
    }

    /// Reject an outstanding delivery, optionally putting it back at the head
    /// of the queue. Without requeue the message is dropped.
    pub fn nack(&mut self, consumer: ConsumerId, tag: DeliveryTag, requeue: bool) -> bool {
        let Some(mut message) = self
            .consumers
            .get_mut(&consumer)
            .and_then(|slot| slot.unacked.remove(&tag))
        else {
            return false;
        };

        if requeue {
            message.redelivered = true;
            self.ready.push_front(message);
        }
        true
    }

    /// Cancel every consumer and make their unacked messages ready again.
    pub fn reset_consumers(&mut self) {
        let slots: Vec<_> = self.consumers.drain().map(|(_, slot)| slot).collect();
        for slot in slots {
            self.requeue_all(slot.unacked);
        }
    }

    pub fn unacked_count(&self) -> usize {
        self.consumers.values().map(|slot| slot.unacked.len()).sum()
    }

    fn requeue_all(&mut self, unacked: BTreeMap<DeliveryTag, QueuedMessage>) {
        for (_, mut message) in unacked.into_iter().rev() {
            message.redelivered = true;
            self.ready.push_front(message);
        }
    }
}
