//! # order-relay
//!
//! `order-relay` moves orders from an HTTP intake endpoint onto a message
//! queue and from the queue into a document store.
//!
//! ## Core Modules
//!
//! - `intake`: the HTTP endpoint and the publisher that hands order bytes to the queue.
//! - `consumer`: the prefetch-of-one loop that parses, persists and acks or nacks.
//! - `transport`: the queue seams plus the broker (AMQP) and managed-identity transports.
//! - `broker`: an in-process queue broker implementing the same seams.
//! - `config`: loading and resolving settings, including the transport mode.
//! - `persistence`: the sled-backed document store.
//! - `client`: an order submission client.
//! - `order`: the order document model.
//! - `utils`: error types and logging setup.

pub mod broker;
pub mod client;
pub mod config;
pub mod consumer;
pub mod intake;
pub mod order;
pub mod persistence;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod tests;
