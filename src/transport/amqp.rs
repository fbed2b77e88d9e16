//! Direct broker transport over AMQP 0-9-1.
//!
//! The sender opens a connection per message and closes it right after the
//! publish is handed to the client library; it does not wait for a publisher
//! confirm. The receiver keeps one connection and channel for the lifetime
//! of its subscription.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Delivery, DeliveryTag, QueueReceiver, QueueSender, QueueSpec};
use crate::config::BrokerConnection;
use crate::utils::error::TransportError;

/// Delay before connection attempt `n + 1` is `n * RECONNECT_DELAY`.
const RECONNECT_DELAY: Duration = Duration::from_millis(500);

const REPLY_SUCCESS: u16 = 200;

pub(crate) fn amqp_uri(conn: &BrokerConnection) -> AMQPUri {
    AMQPUri {
        scheme: if conn.uses_tls() {
            AMQPScheme::AMQPS
        } else {
            AMQPScheme::AMQP
        },
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: conn.username.clone(),
                password: conn.password.clone(),
            },
            host: conn.hostname.clone(),
            port: conn.port,
        },
        vhost: "/".to_string(),
        query: Default::default(),
    }
}

/// Connect to the broker, retrying up to `reconnect_limit` extra times.
pub async fn connect(conn: &BrokerConnection) -> Result<Connection, TransportError> {
    let attempts = conn.reconnect_limit.saturating_add(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match Connection::connect_uri(amqp_uri(conn), ConnectionProperties::default()).await {
            Ok(connection) => return Ok(connection),
            Err(e) => {
                warn!(attempt, attempts, address = %conn.address(), error = %e, "broker connection failed");
                last_error = e.to_string();
                if attempt < attempts {
                    tokio::time::sleep(RECONNECT_DELAY * attempt).await;
                }
            }
        }
    }

    Err(TransportError::Connection(format!(
        "{} after {attempts} attempt(s): {last_error}",
        conn.address()
    )))
}

pub struct AmqpSender {
    connection: BrokerConnection,
}

impl AmqpSender {
    pub fn new(connection: BrokerConnection) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl QueueSender for AmqpSender {
    fn destination(&self) -> String {
        format!("{} using local auth credentials", self.connection.address())
    }

    async fn send(&self, queue: &str, payload: &[u8]) -> Result<(), TransportError> {
        let connection = connect(&self.connection).await?;

        let result = async {
            let channel = connection.create_channel().await?;
            let published = channel
                .basic_publish(
                    "",
                    queue,
                    BasicPublishOptions::default(),
                    payload,
                    BasicProperties::default(),
                )
                .await
                .map(|_confirm| ());
            if let Err(e) = channel.close(REPLY_SUCCESS, "OK").await {
                debug!(error = %e, "closing sender channel failed");
            }
            published
        }
        .await;

        if let Err(e) = connection.close(REPLY_SUCCESS, "OK").await {
            debug!(error = %e, "closing sender connection failed");
        }

        result.map_err(TransportError::from)
    }
}

struct Session {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
}

/// Long-lived subscriber on one queue.
pub struct AmqpReceiver {
    connection: BrokerConnection,
    session: Option<Session>,
}

impl AmqpReceiver {
    pub fn new(connection: BrokerConnection) -> Self {
        Self {
            connection,
            session: None,
        }
    }

    fn session(&mut self) -> Result<&mut Session, TransportError> {
        self.session
            .as_mut()
            .ok_or_else(|| TransportError::Closed("not subscribed".into()))
    }
}

#[async_trait]
impl QueueReceiver for AmqpReceiver {
    async fn subscribe(&mut self, spec: &QueueSpec) -> Result<(), TransportError> {
        let connection = connect(&self.connection).await?;
        let channel = connection.create_channel().await?;

        channel
            .queue_declare(
                &spec.name,
                QueueDeclareOptions {
                    durable: spec.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .basic_qos(spec.prefetch, BasicQosOptions::default())
            .await?;

        let consumer_tag = format!("order-relay-{}", Uuid::new_v4());
        let consumer = channel
            .basic_consume(
                &spec.name,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            queue = %spec.name,
            durable = spec.durable,
            prefetch = spec.prefetch,
            address = %self.connection.address(),
            "consuming from broker"
        );
        self.session = Some(Session {
            connection,
            channel,
            consumer,
        });
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, TransportError> {
        let session = self.session()?;
        match session.consumer.next().await {
            Some(Ok(delivery)) => Ok(Some(Delivery {
                tag: delivery.delivery_tag,
                payload: delivery.data,
                redelivered: delivery.redelivered,
            })),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    async fn ack(&mut self, tag: DeliveryTag) -> Result<(), TransportError> {
        let session = self.session()?;
        session
            .channel
            .basic_ack(tag, BasicAckOptions::default())
            .await?;
        Ok(())
    }

    async fn nack(&mut self, tag: DeliveryTag, requeue: bool) -> Result<(), TransportError> {
        let session = self.session()?;
        session
            .channel
            .basic_nack(
                tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(session) = self.session.take() {
            session.channel.close(REPLY_SUCCESS, "OK").await?;
            session.connection.close(REPLY_SUCCESS, "OK").await?;
        }
        Ok(())
    }
}
