//! The `consumer` module drains the order queue into the document store.
//!
//! Each delivery is parsed as JSON and inserted into the order collection,
//! then acknowledged. A parse or insert failure negatively acknowledges the
//! delivery and inserts nothing. The decision itself is the pure
//! `settle` function so it can be checked without a broker.

pub mod settlement;
pub mod worker;

pub use settlement::{DeliveryState, Disposition, Settlement, settle};
pub use worker::{ConsumerStats, OrderConsumer, PREFETCH};
