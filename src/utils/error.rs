//! The `error` module defines the error types used across `order-relay`.
//!
//! Errors are split by concern: publishing, transports, consumption and
//! persistence. `AppError` wraps them for the binary.

use thiserror::Error;

/// Failures raised by a queue transport, for both sending and receiving.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection to the broker or namespace could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A credential could not be acquired from the credential provider.
    #[error("credential acquisition failed: {0}")]
    Credential(String),

    /// A channel, link or request-level operation failed.
    #[error("channel error: {0}")]
    Channel(String),

    /// The remote end answered with an unexpected status.
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The delivery stream or the queue is gone.
    #[error("queue closed: {0}")]
    Closed(String),

    /// The delivery tag is not outstanding on this receiver.
    #[error("unknown delivery tag {0}")]
    UnknownDelivery(u64),
}

impl From<lapin::Error> for TransportError {
    fn from(err: lapin::Error) -> Self {
        TransportError::Channel(err.to_string())
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() {
            TransportError::Connection(err.to_string())
        } else {
            TransportError::Channel(err.to_string())
        }
    }
}

/// Result of handing an order to the publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Neither broker credentials nor managed identity are configured.
    #[error("no credentials set for message queue")]
    ConfigurationMissing,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The payload of a delivery is not valid JSON.
#[derive(Debug, Error)]
#[error("payload is not valid JSON: {0}")]
pub struct ParseError(#[from] pub serde_json::Error);

/// The document store could not complete an operation.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to open store: {0}")]
    Open(String),

    #[error("failed to encode document: {0}")]
    Encode(String),

    #[error("failed to write document: {0}")]
    Write(String),

    #[error("failed to read documents: {0}")]
    Read(String),
}

impl From<sled::Error> for PersistenceError {
    fn from(err: sled::Error) -> Self {
        PersistenceError::Write(err.to_string())
    }
}

/// Why a single delivery was negatively acknowledged.
#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Failures of the order submission client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("intake answered {0}")]
    Status(u16),

    #[error("orders per hour must be greater than zero")]
    InvalidRate,
}

/// Top-level error for the `order-relay` binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("{0}")]
    Unconfigured(String),
}
