//! The `client` module is the submitting side of the intake endpoint.
//!
//! `OrderClient` posts orders over HTTP, either one at a time or as a steady
//! stream of random orders, standing in for customers of the storefront.

pub mod order_client;
pub use order_client::OrderClient;
