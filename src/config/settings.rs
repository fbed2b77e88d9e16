use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Top-level configuration settings for the application.
///
/// Resolved once at startup and handed to the intake and consumer
/// constructors; nothing re-reads the environment afterwards.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub queue: QueueSettings,
    pub store: StoreSettings,
    pub consumer: ConsumerSettings,
    pub log_level: String,
}

/// Configuration settings for the intake HTTP server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Reported by `GET /health`.
    pub app_version: String,
    /// Answer `202 Accepted` with a warning when publishing fails instead of
    /// the plain `201 Created`.
    pub report_degraded: bool,
}

/// Where orders are sent and how the queue is reached.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSettings {
    pub name: String,
    pub transport: TransportConfig,
}

/// The single transport mode active for the lifetime of the process.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    /// Direct connection to an AMQP broker with static credentials.
    Broker(BrokerConnection),
    /// Managed-identity connection to a cloud messaging namespace.
    ManagedIdentity(ManagedIdentityConnection),
    /// Neither credentials nor managed identity were configured.
    Unconfigured,
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Broker(_) => "broker",
            TransportConfig::ManagedIdentity(_) => "managed-identity",
            TransportConfig::Unconfigured => "unconfigured",
        }
    }
}

#[derive(Clone, PartialEq)]
pub struct BrokerConnection {
    pub protocol: String,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Transport override, e.g. `tls` or `tcp`.
    pub transport: Option<String>,
    /// Extra connection attempts after the first one fails.
    pub reconnect_limit: u32,
}

impl BrokerConnection {
    pub fn uses_tls(&self) -> bool {
        let tls_transport = matches!(
            self.transport.as_deref().map(str::to_ascii_lowercase).as_deref(),
            Some("tls") | Some("ssl")
        );
        tls_transport || self.protocol.eq_ignore_ascii_case("amqps")
    }

    /// `host:port`, safe to log.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

// Keeps the password out of logs.
impl fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("protocol", &self.protocol)
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("transport", &self.transport)
            .field("reconnect_limit", &self.reconnect_limit)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManagedIdentityConnection {
    /// Fully-qualified namespace, e.g. `shop.servicebus.windows.net`.
    pub namespace: String,
}

/// Document store location.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSettings {
    pub path: String,
    pub collection: String,
}

/// Consumer-side queue behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    /// Durability used when declaring the queue. Non-durable queues lose
    /// their messages when the broker restarts.
    pub durable: bool,
    /// Requeue flag passed with every nack.
    pub requeue_on_nack: bool,
}

/// Raw configuration as read from the environment and optional config file.
///
/// Field names are the lowercased environment variable names. Every value is
/// optional and kept as text; `Settings::from_partial` parses numbers and
/// flags and fills the gaps with defaults, so an empty or malformed variable
/// never stops startup.
#[derive(Debug, Default, Deserialize)]
pub struct PartialSettings {
    pub order_queue_protocol: Option<String>,
    pub order_queue_hostname: Option<String>,
    pub order_queue_port: Option<String>,
    pub order_queue_username: Option<String>,
    pub order_queue_password: Option<String>,
    pub order_queue_transport: Option<String>,
    pub order_queue_reconnect_limit: Option<String>,
    pub order_queue_name: Option<String>,
    pub order_queue_durable: Option<String>,
    pub order_queue_nack_requeue: Option<String>,
    pub use_workload_identity_auth: Option<String>,
    pub azure_servicebus_fullyqualifiednamespace: Option<String>,
    pub order_intake_host: Option<String>,
    pub order_intake_port: Option<String>,
    pub order_intake_report_degraded: Option<String>,
    pub app_version: Option<String>,
    pub order_db_path: Option<String>,
    pub order_db_collection_name: Option<String>,
    pub log_level: Option<String>,
}

pub const DEFAULT_QUEUE_PROTOCOL: &str = "amqp";
pub const DEFAULT_QUEUE_HOSTNAME: &str = "localhost";
pub const DEFAULT_QUEUE_PORT: u16 = 5672;

/// Provides default values for `Settings`.
///
/// The default transport is `Unconfigured`: credentials are never defaulted.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".to_string(),
                port: 3000,
                app_version: "0.1.0".to_string(),
                report_degraded: false,
            },
            queue: QueueSettings {
                name: "orders".to_string(),
                transport: TransportConfig::Unconfigured,
            },
            store: StoreSettings {
                path: "orderdb".to_string(),
                collection: "orders".to_string(),
            },
            consumer: ConsumerSettings {
                durable: false,
                requeue_on_nack: true,
            },
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Merge partially specified configuration with the defaults and resolve
    /// the transport mode.
    pub fn from_partial(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let transport = resolve_transport(&partial);

        Settings {
            server: ServerSettings {
                host: present(partial.order_intake_host).unwrap_or(default.server.host),
                port: number("ORDER_INTAKE_PORT", partial.order_intake_port)
                    .unwrap_or(default.server.port),
                app_version: present(partial.app_version).unwrap_or(default.server.app_version),
                report_degraded: flag(partial.order_intake_report_degraded)
                    .unwrap_or(default.server.report_degraded),
            },
            queue: QueueSettings {
                name: present(partial.order_queue_name).unwrap_or(default.queue.name),
                transport,
            },
            store: StoreSettings {
                path: present(partial.order_db_path).unwrap_or(default.store.path),
                collection: present(partial.order_db_collection_name)
                    .unwrap_or(default.store.collection),
            },
            consumer: ConsumerSettings {
                durable: flag(partial.order_queue_durable).unwrap_or(default.consumer.durable),
                requeue_on_nack: flag(partial.order_queue_nack_requeue)
                    .unwrap_or(default.consumer.requeue_on_nack),
            },
            log_level: present(partial.log_level).unwrap_or(default.log_level),
        }
    }
}

/// Pick the transport mode.
///
/// Static credentials win over managed identity. Managed identity needs a
/// namespace from `ORDER_QUEUE_HOSTNAME` or
/// `AZURE_SERVICEBUS_FULLYQUALIFIEDNAMESPACE`.
pub fn resolve_transport(partial: &PartialSettings) -> TransportConfig {
    let username = present(partial.order_queue_username.clone());
    let password = present(partial.order_queue_password.clone());

    if let (Some(username), Some(password)) = (username, password) {
        return TransportConfig::Broker(BrokerConnection {
            protocol: present(partial.order_queue_protocol.clone())
                .unwrap_or_else(|| DEFAULT_QUEUE_PROTOCOL.to_string()),
            hostname: present(partial.order_queue_hostname.clone())
                .unwrap_or_else(|| DEFAULT_QUEUE_HOSTNAME.to_string()),
            port: number("ORDER_QUEUE_PORT", partial.order_queue_port.clone())
                .unwrap_or(DEFAULT_QUEUE_PORT),
            username,
            password,
            transport: present(partial.order_queue_transport.clone()),
            reconnect_limit: number(
                "ORDER_QUEUE_RECONNECT_LIMIT",
                partial.order_queue_reconnect_limit.clone(),
            )
            .unwrap_or(0),
        });
    }

    if flag(partial.use_workload_identity_auth.clone()).unwrap_or(false) {
        let namespace = present(partial.order_queue_hostname.clone())
            .or_else(|| present(partial.azure_servicebus_fullyqualifiednamespace.clone()));

        return match namespace {
            Some(namespace) => {
                TransportConfig::ManagedIdentity(ManagedIdentityConnection { namespace })
            }
            None => {
                tracing::warn!("no hostname set for message queue");
                TransportConfig::Unconfigured
            }
        };
    }

    TransportConfig::Unconfigured
}

/// Treat empty strings the same as unset values.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse a numeric value. Malformed values are logged and treated as unset.
fn number<T: FromStr>(key: &str, value: Option<String>) -> Option<T> {
    let raw = present(value)?;
    match raw.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric configuration value");
            None
        }
    }
}

/// Only the literal `true` enables a flag; any other non-empty value disables it.
fn flag(value: Option<String>) -> Option<bool> {
    present(value).map(|v| v.trim() == "true")
}
