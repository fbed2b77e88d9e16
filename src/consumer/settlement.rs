use serde_json::Value;

use crate::transport::DeliveryTag;
use crate::utils::error::{ConsumeError, ParseError, PersistenceError};

/// Where a single delivery is in its processing.
///
/// The success path is `Received -> Parsing -> Persisting -> Acked`. A failed
/// parse or insert goes straight to `Nacked`; there is no retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Parsing,
    Persisting,
    Acked,
    Nacked,
}

impl DeliveryState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryState::Acked | DeliveryState::Nacked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}

/// Decide how a delivery is settled from its parse and persist outcomes.
///
/// `persisted` is `None` when the insert never ran because parsing failed.
pub fn settle(
    parsed: &Result<Value, ParseError>,
    persisted: Option<&Result<String, PersistenceError>>,
) -> Disposition {
    match (parsed, persisted) {
        (Ok(_), Some(Ok(_))) => Disposition::Ack,
        _ => Disposition::Nack,
    }
}

/// Record of one processed delivery.
#[derive(Debug)]
pub struct Settlement {
    pub tag: DeliveryTag,
    pub trail: Vec<DeliveryState>,
    pub disposition: Disposition,
    /// Id assigned by the store when the order was persisted.
    pub document_id: Option<String>,
    pub error: Option<ConsumeError>,
}

impl Settlement {
    pub(crate) fn received(tag: DeliveryTag) -> Self {
        Self {
            tag,
            trail: vec![DeliveryState::Received],
            disposition: Disposition::Nack,
            document_id: None,
            error: None,
        }
    }

    pub(crate) fn advance(&mut self, state: DeliveryState) {
        self.trail.push(state);
    }

    pub fn state(&self) -> DeliveryState {
        self.trail
            .last()
            .copied()
            .unwrap_or(DeliveryState::Received)
    }

    /// Close the trail with the given disposition.
    pub(crate) fn finish(mut self, disposition: Disposition) -> Self {
        self.disposition = disposition;
        self.advance(match disposition {
            Disposition::Ack => DeliveryState::Acked,
            Disposition::Nack => DeliveryState::Nacked,
        });
        self
    }
}
