use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::OnceCell;

use super::{EventPublisher, FileEvent, FILE_READY, LEGACY_FILE_READY};

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
enum PublishError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Broker rejected request ({status}): {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Broker settings. Talks to the RabbitMQ management HTTP API.
#[derive(Debug, Clone)]
pub struct RabbitMqConfig {
    /// e.g. `http://rabbitmq:15672`
    pub api_url: String,
    pub username: String,
    pub password: String,
    pub vhost: String,
    /// Topic exchange events are published to
    pub exchange: String,
    /// Durable queue the notifications consumer reads
    pub queue: String,
    /// Routing key bound to the queue for compatibility with older producers
    pub routing_key: String,
}

#[derive(Deserialize)]
struct PublishResponse {
    routed: bool,
}

struct Inner {
    client: Client,
    config: RabbitMqConfig,
    topology: OnceCell<()>,
    failures: AtomicU64,
}

/// Best-effort RabbitMQ publisher.
///
/// Exchange, queue and bindings are declared once on first use; a failed
/// declaration is retried by the next publish. Each event gets a bounded number
/// of attempts with exponential backoff, then is dropped and counted.
#[derive(Clone)]
pub struct RabbitMqPublisher {
    inner: Arc<Inner>,
}

impl RabbitMqPublisher {
    pub fn new(config: RabbitMqConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            inner: Arc::new(Inner {
                client,
                config,
                topology: OnceCell::new(),
                failures: AtomicU64::new(0),
            }),
        })
    }
}

impl Inner {
    fn vhost(&self) -> String {
        self.config.vhost.replace('/', "%2F")
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.config.api_url.trim_end_matches('/'))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PublishError> {
        let resp = request
            .basic_auth(&self.config.username, Some(&self.config.password))
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(PublishError::Status { status, body });
        }
        Ok(resp)
    }

    /// Declarations are idempotent on the broker side.
    async fn declare_topology(&self) -> Result<(), PublishError> {
        let vhost = self.vhost();
        let exchange = &self.config.exchange;
        let queue = &self.config.queue;

        self.send(
            self.client
                .put(self.url(&format!("exchanges/{vhost}/{exchange}")))
                .json(&serde_json::json!({ "type": "topic", "durable": true })),
        )
        .await?;

        self.send(
            self.client
                .put(self.url(&format!("queues/{vhost}/{queue}")))
                .json(&serde_json::json!({ "durable": true })),
        )
        .await?;

        let mut routing_keys = vec![
            self.config.routing_key.as_str(),
            FILE_READY,
            LEGACY_FILE_READY,
        ];
        routing_keys.sort_unstable();
        routing_keys.dedup();
        for routing_key in routing_keys {
            self.send(
                self.client
                    .post(self.url(&format!("bindings/{vhost}/e/{exchange}/q/{queue}")))
                    .json(&serde_json::json!({ "routing_key": routing_key })),
            )
            .await?;
        }

        tracing::info!(
            exchange = %exchange,
            queue = %queue,
            "Declared notification topology"
        );
        Ok(())
    }

    async fn publish_once(&self, event: &FileEvent) -> Result<(), PublishError> {
        self.topology
            .get_or_try_init(|| self.declare_topology())
            .await?;

        let payload = serde_json::to_string(event)?;
        let resp = self
            .send(
                self.client
                    .post(self.url(&format!(
                        "exchanges/{}/{}/publish",
                        self.vhost(),
                        self.config.exchange
                    )))
                    .json(&serde_json::json!({
                        "properties": {
                            "content_type": "application/json",
                            "delivery_mode": 2,
                        },
                        "routing_key": event.event,
                        "payload": payload,
                        "payload_encoding": "string",
                    })),
            )
            .await?;

        let body: PublishResponse = resp.json().await?;
        if !body.routed {
            tracing::warn!(
                event = %event.event,
                file_id = %event.file_id,
                "Event published but not routed to any queue"
            );
        }
        Ok(())
    }

    async fn deliver(&self, event: FileEvent) {
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.publish_once(&event).await {
                Ok(()) => {
                    tracing::debug!(event = %event.event, file_id = %event.file_id, "Published event");
                    return;
                }
                Err(e) if attempt < MAX_ATTEMPTS => {
                    tracing::debug!(attempt, error = %e, "Publish attempt failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        event = %event.event,
                        file_id = %event.file_id,
                        error = %e,
                        "Dropping event after {MAX_ATTEMPTS} attempts"
                    );
                }
            }
        }
    }
}

impl EventPublisher for RabbitMqPublisher {
    fn publish(&self, event: FileEvent) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move { inner.deliver(event).await });
            }
            Err(_) => {
                self.inner.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(file_id = %event.file_id, "No runtime available to publish event");
            }
        }
    }

    fn failures(&self) -> u64 {
        self.inner.failures.load(Ordering::Relaxed)
    }
}
