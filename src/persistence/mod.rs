//! The `persistence` module is the document store behind the consumer.
//!
//! Parsed orders are written verbatim into a named collection. It uses
//! `sled` as an embedded key-value store: one tree per collection, keys
//! assigned by the store.

pub mod sled_store;

pub use sled_store::{DocumentStore, Persistence, StoredDocument};

#[cfg(test)]
mod tests;
