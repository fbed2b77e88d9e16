use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use super::{IntakeState, OrderPublisher, router};
use crate::config::{QueueSettings, TransportConfig};
use crate::transport::QueueSender;
use crate::transport::credential::{AccessToken, CredentialProvider};
use crate::utils::error::{PublishError, TransportError};

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl QueueSender for RecordingSender {
    fn destination(&self) -> String {
        "recorder".into()
    }

    async fn send(&self, queue: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.sent
            .lock()
            .unwrap()
            .push((queue.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Emits its own log line on send so ordering against the publisher's
/// diagnostic can be checked.
struct LoggingSender;

#[async_trait]
impl QueueSender for LoggingSender {
    fn destination(&self) -> String {
        "broker.internal:5672 using local auth credentials".into()
    }

    async fn send(&self, _queue: &str, _payload: &[u8]) -> Result<(), TransportError> {
        tracing::info!("payload handed to sender");
        Ok(())
    }
}

/// Log sink shared between the subscriber and the assertions.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct FailingSender;

#[async_trait]
impl QueueSender for FailingSender {
    fn destination(&self) -> String {
        "nowhere".into()
    }

    async fn send(&self, _queue: &str, _payload: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::Connection("broker unreachable".into()))
    }
}

struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn token(&self, _scope: &str) -> Result<AccessToken, TransportError> {
        panic!("credentials must not be requested");
    }
}

fn state(publisher: OrderPublisher, report_degraded: bool) -> IntakeState {
    IntakeState {
        publisher,
        version: "1.2.3".into(),
        report_degraded,
    }
}

async fn start_server(state: IntakeState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn unconfigured_publisher_reports_missing_configuration() {
    let publisher = OrderPublisher::new("orders", None);
    assert!(!publisher.is_configured());

    let err = publisher.publish(b"{}").await.unwrap_err();
    assert!(matches!(err, PublishError::ConfigurationMissing));
}

#[tokio::test]
async fn unconfigured_settings_build_no_sender() {
    let settings = QueueSettings {
        name: "orders".into(),
        transport: TransportConfig::Unconfigured,
    };
    let publisher = OrderPublisher::from_settings(&settings, Arc::new(NoCredentials));

    assert!(!publisher.is_configured());
    assert_eq!(publisher.queue_name(), "orders");
}

#[tokio::test]
async fn publisher_sends_payload_verbatim_to_configured_queue() {
    let sender = Arc::new(RecordingSender::default());
    let publisher = OrderPublisher::new("orders", Some(sender.clone()));

    publisher.publish(b"{\"customerId\":\"c1\"}").await.unwrap();

    let sent = sender.sent.lock().unwrap();
    assert_eq!(
        *sent,
        vec![("orders".to_string(), b"{\"customerId\":\"c1\"}".to_vec())]
    );
}

#[tokio::test]
async fn transport_failure_is_returned_to_the_caller() {
    let publisher = OrderPublisher::new("orders", Some(Arc::new(FailingSender)));

    let err = publisher.publish(b"{}").await.unwrap_err();
    assert!(matches!(
        err,
        PublishError::Transport(TransportError::Connection(_))
    ));
}

#[tokio::test]
async fn post_forwards_raw_body_and_answers_created() {
    let sender = Arc::new(RecordingSender::default());
    let base = start_server(state(
        OrderPublisher::new("orders", Some(sender.clone())),
        false,
    ))
    .await;

    let body = r#"{"customerId":"c1","items":[{"productId":"p1","quantity":2,"price":9.99}]}"#;
    let resp = reqwest::Client::new()
        .post(format!("{base}/"))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201);
    assert!(resp.bytes().await.unwrap().is_empty());
    assert_eq!(sender.sent.lock().unwrap()[0].1, body.as_bytes());
}

#[tokio::test]
async fn malformed_body_is_not_rejected_at_intake() {
    let sender = Arc::new(RecordingSender::default());
    let base = start_server(state(
        OrderPublisher::new("orders", Some(sender.clone())),
        false,
    ))
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/"))
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201);
    assert_eq!(sender.sent.lock().unwrap()[0].1, b"{not json");
}

#[tokio::test]
async fn publish_failure_still_answers_created_by_default() {
    let base = start_server(state(
        OrderPublisher::new("orders", Some(Arc::new(FailingSender))),
        false,
    ))
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/"))
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201);
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn unconfigured_transport_still_answers_created() {
    let base = start_server(state(OrderPublisher::new("orders", None), false)).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/"))
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201);
}

#[tokio::test]
async fn degraded_mode_answers_accepted_with_warning() {
    let base = start_server(state(
        OrderPublisher::new("orders", Some(Arc::new(FailingSender))),
        true,
    ))
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/"))
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 202);
    let body: serde_json::Value = resp.json().await.unwrap();
    let warning = body["warning"].as_str().unwrap();
    assert!(warning.contains("broker unreachable"));
}

#[tokio::test]
async fn degraded_mode_keeps_created_on_success() {
    let base = start_server(state(
        OrderPublisher::new("orders", Some(Arc::new(RecordingSender::default()))),
        true,
    ))
    .await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/"))
        .body("{}")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 201);
}

#[tokio::test]
async fn health_reports_version() {
    let base = start_server(state(OrderPublisher::new("orders", None), false)).await;

    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok", "version": "1.2.3" }));
}

#[tokio::test]
async fn publisher_logs_destination_and_payload_before_sending() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let publisher = OrderPublisher::new("orders", Some(Arc::new(LoggingSender)));
    publisher.publish(br#"{"customerId":"c1"}"#).await.unwrap();

    let output = logs.contents();
    let diagnostic = output
        .find(r#"sending message {"customerId":"c1"} to orders on broker.internal:5672 using local auth credentials"#)
        .expect("diagnostic line missing");
    let sent = output
        .find("payload handed to sender")
        .expect("sender was not called");
    assert!(diagnostic < sent);
}

#[tokio::test]
async fn unconfigured_publisher_logs_missing_credentials() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let _ = OrderPublisher::new("orders", None).publish(b"{}").await;

    let output = logs.contents();
    assert!(output.contains("no credentials set for message queue"));
    assert!(!output.contains("sending message"));
}
