mod settings;

use config::{Config, ConfigError, Environment, File};

pub use settings::{
    BrokerConnection, ConsumerSettings, ManagedIdentityConnection, PartialSettings,
    QueueSettings, ServerSettings, Settings, StoreSettings, TransportConfig, resolve_transport,
};

/// Loads the configuration from the optional default file and the process
/// environment, merges it with default values and resolves the transport mode.
///
/// Environment variables are read under their own names, e.g.
/// `ORDER_QUEUE_HOSTNAME` or `USE_WORKLOAD_IDENTITY_AUTH`.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default());

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    let settings = Settings::from_partial(partial);
    tracing::debug!(
        transport = settings.queue.transport.kind(),
        queue = %settings.queue.name,
        "configuration loaded"
    );
    Ok(settings)
}
