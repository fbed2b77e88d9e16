use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use crate::broker::InMemoryBroker;
use crate::client::OrderClient;
use crate::config::Settings;
use crate::consumer::{Disposition, OrderConsumer};
use crate::intake::{IntakeState, OrderPublisher, router};
use crate::persistence::Persistence;
use crate::transport::{QueueReceiver, QueueSpec};

struct Relay {
    base: String,
    broker: InMemoryBroker,
    store: Arc<Persistence>,
    _dir: TempDir,
}

impl Relay {
    async fn start() -> Self {
        crate::utils::logging::init("debug");

        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Persistence::open(dir.path().to_str().unwrap()).unwrap());
        let broker = InMemoryBroker::new();

        let state = IntakeState {
            publisher: OrderPublisher::new("orders", Some(Arc::new(broker.sender()))),
            version: "0.1.0".into(),
            report_degraded: false,
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            broker,
            store,
            _dir: dir,
        }
    }

    fn consumer(&self) -> OrderConsumer {
        OrderConsumer::new(
            Box::new(self.broker.receiver()),
            self.store.clone(),
            &Settings::default(),
        )
    }

    async fn post(&self, body: &'static str) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{}/", self.base))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn integration_order_is_persisted_end_to_end() {
    let relay = Relay::start().await;

    let resp = relay
        .post(r#"{"customerId":"c1","items":[{"productId":"p1","quantity":2,"price":9.99}]}"#)
        .await;
    assert_eq!(resp.status(), 201);
    assert!(resp.bytes().await.unwrap().is_empty());

    let mut consumer = relay.consumer();
    consumer.subscribe().await.unwrap();
    let settlement = consumer.consume_one().await.unwrap().unwrap();
    assert_eq!(settlement.disposition, Disposition::Ack);

    let documents = relay.store.load_documents("orders").unwrap();
    assert_eq!(documents.len(), 1);
    let order = &documents[0].document;
    assert_eq!(order["customerId"], "c1");
    assert_eq!(order["items"].as_array().unwrap().len(), 1);
    assert_eq!(order["items"][0]["quantity"], 2);
    assert_eq!(order["items"][0]["productId"], "p1");
}

#[tokio::test]
async fn integration_bare_json_string_is_stored_as_is() {
    let relay = Relay::start().await;

    let resp = relay.post(r#""not json""#).await;
    assert_eq!(resp.status(), 201);

    let mut consumer = relay.consumer();
    consumer.subscribe().await.unwrap();
    let settlement = consumer.consume_one().await.unwrap().unwrap();

    // no schema: any JSON value is a document
    assert_eq!(settlement.disposition, Disposition::Ack);
    let documents = relay.store.load_documents("orders").unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].document, json!("not json"));
}

#[tokio::test]
async fn integration_malformed_body_is_accepted_then_nacked() {
    let relay = Relay::start().await;

    let resp = relay.post(r#"{"customerId":"c1","items":["#).await;
    assert_eq!(resp.status(), 201);

    let mut consumer = relay.consumer();
    consumer.subscribe().await.unwrap();
    let settlement = consumer.consume_one().await.unwrap().unwrap();

    assert_eq!(settlement.disposition, Disposition::Nack);
    assert_eq!(relay.store.count("orders").unwrap(), 0);
}

#[tokio::test]
async fn integration_unacked_message_is_lost_on_broker_restart() {
    let relay = Relay::start().await;

    let resp = relay.post(r#"{"customerId":"c2","items":[]}"#).await;
    assert_eq!(resp.status(), 201);

    let mut receiver = relay.broker.receiver();
    receiver
        .subscribe(&QueueSpec {
            name: "orders".into(),
            durable: false,
            prefetch: 1,
        })
        .await
        .unwrap();
    let delivery = receiver.next_delivery().await.unwrap().unwrap();
    assert_eq!(relay.broker.unacked_count("orders"), 1);

    relay.broker.restart();
    assert!(!relay.broker.has_queue("orders"));
    assert!(receiver.ack(delivery.tag).await.is_err());

    // a fresh consumer redeclares the queue and finds nothing
    let mut consumer = relay.consumer();
    consumer.subscribe().await.unwrap();
    assert_eq!(relay.broker.ready_count("orders"), 0);
    assert_eq!(relay.store.count("orders").unwrap(), 0);
}

#[tokio::test]
async fn integration_running_consumer_drains_client_orders() {
    let relay = Relay::start().await;

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let mut consumer = relay.consumer();
    let worker = tokio::spawn(async move {
        consumer
            .run_until(async {
                let _ = stop_rx.await;
            })
            .await
    });

    let client = OrderClient::new(format!("{}/", relay.base));
    let accepted = client
        .run(3_600_000, Some(5), std::future::pending())
        .await
        .unwrap();
    assert_eq!(accepted, 5);

    tokio::time::timeout(Duration::from_secs(5), async {
        while relay.store.count("orders").unwrap() < 5 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("orders were not persisted");

    stop_tx.send(()).unwrap();
    let stats = worker.await.unwrap().unwrap();
    assert_eq!(stats.acked, 5);
    assert_eq!(stats.nacked, 0);
}
