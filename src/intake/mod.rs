//! The `intake` module accepts orders over HTTP and hands their raw bytes to
//! the queue through the transport chosen at startup.

pub mod http;
pub mod publisher;

pub use http::{IntakeState, router, serve};
pub use publisher::{OrderPublisher, PublishOutcome};

#[cfg(test)]
mod tests;
