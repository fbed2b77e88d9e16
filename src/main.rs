//! CLI for order-relay
//!
//! Subcommands:
//! - `intake`: run the HTTP intake endpoint
//! - `consume`: run the queue consumer
//! - `relay`: run both against an in-process broker
//! - `submit`: post random orders to an intake endpoint

use std::future::Future;
use std::pin::Pin;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use order_relay::broker::InMemoryBroker;
use order_relay::client::OrderClient;
use order_relay::config::{Settings, load_config};
use order_relay::consumer::OrderConsumer;
use order_relay::intake::{self, IntakeState, OrderPublisher};
use order_relay::persistence::Persistence;
use order_relay::transport::{default_credentials, receiver_for};
use order_relay::utils::error::AppError;
use order_relay::utils::logging;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "order-relay", version)]
enum Command {
    /// Accept orders over HTTP and publish them to the queue
    Intake,
    /// Consume orders from the queue into the document store
    Consume,
    /// Run intake and consumer in one process with an in-process broker
    Relay,
    /// Post random orders to an intake endpoint
    Submit {
        /// Intake endpoint to post orders to
        #[arg(long, default_value = "http://localhost:3000/")]
        url: String,
        /// Submission rate
        #[arg(long, default_value_t = 60)]
        orders_per_hour: u32,
        /// Stop after this many orders
        #[arg(long)]
        count: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    logging::init(&settings.log_level);

    let result = match cmd {
        Command::Intake => run_intake(settings).await,
        Command::Consume => run_consumer(settings).await,
        Command::Relay => run_relay(settings).await,
        Command::Submit {
            url,
            orders_per_hour,
            count,
        } => run_submit(&url, orders_per_hour, count).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("order-relay failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

type Shutdown = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Every future built by the returned factory resolves once Ctrl-C is received.
fn shutdown_signal() -> impl Fn() -> Shutdown {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received. Exiting gracefully.");
        }
        let _ = tx.send(true);
    });

    move || -> Shutdown {
        let mut rx = rx.clone();
        Box::pin(async move {
            let _ = rx.wait_for(|stop| *stop).await;
        })
    }
}

async fn run_intake(settings: Settings) -> Result<(), AppError> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let publisher = OrderPublisher::from_settings(&settings.queue, default_credentials());
    let state = IntakeState::new(publisher, &settings.server);

    let shutdown = shutdown_signal();
    intake::serve(&addr, state, shutdown()).await?;
    Ok(())
}

async fn run_consumer(settings: Settings) -> Result<(), AppError> {
    let receiver = receiver_for(&settings.queue, default_credentials()).ok_or_else(|| {
        AppError::Unconfigured("no credentials set for message queue".to_string())
    })?;
    let store = Arc::new(Persistence::open(&settings.store.path)?);

    let mut consumer = OrderConsumer::new(receiver, store, &settings);
    let shutdown = shutdown_signal();
    consumer.run_until(shutdown()).await?;
    Ok(())
}

async fn run_relay(settings: Settings) -> Result<(), AppError> {
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let broker = InMemoryBroker::new();
    broker.declare_queue(&settings.queue.name, settings.consumer.durable)?;

    let publisher = OrderPublisher::new(
        settings.queue.name.clone(),
        Some(Arc::new(broker.sender())),
    );
    let state = IntakeState::new(publisher, &settings.server);

    let store = Arc::new(Persistence::open(&settings.store.path)?);
    let mut consumer = OrderConsumer::new(Box::new(broker.receiver()), store.clone(), &settings);

    let shutdown = shutdown_signal();
    let ((), stats) = tokio::try_join!(
        async {
            intake::serve(&addr, state, shutdown())
                .await
                .map_err(AppError::from)
        },
        async { consumer.run_until(shutdown()).await.map_err(AppError::from) },
    )?;

    info!(
        acked = stats.acked,
        nacked = stats.nacked,
        stored = store.count(&settings.store.collection)?,
        "relay stopped"
    );
    Ok(())
}

async fn run_submit(url: &str, orders_per_hour: u32, count: Option<u64>) -> Result<(), AppError> {
    let client = OrderClient::new(url);
    info!(url = client.url(), orders_per_hour, "submitting orders");

    let shutdown = shutdown_signal();
    let accepted = client.run(orders_per_hour, count, shutdown()).await?;
    info!(accepted, "done submitting orders");
    Ok(())
}
