//! MQTT client wrapper for the drover orchestrator.
//!
//! One process-wide handle owns the broker session: it publishes commands to
//! per-device topics and holds the single wildcard subscription
//! `device/no_+/response` that covers every device. Incoming response
//! payloads are decoded and handed to a registered [`ResponseHandler`] (the
//! script engine). This is the only crate that touches broker APIs.
//!
//! The event-loop task keeps polling through connection errors, so the
//! session auto-reconnects; the wildcard subscription is re-established on
//! every `ConnAck`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use drover_config::BrokerConfig;
use drover_protocol::{topics, Command, Response};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Publishing seam used by the facade; lets tests swap in a recorder.
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    /// Serialize the command to JSON and publish it at QoS 0, non-retained.
    async fn publish_command(&self, topic: &str, command: &Command) -> Result<()>;
}

/// Receiver of every device response that arrives on the wildcard
/// subscription. Implementations must not block: they run on the broker
/// event-loop task.
pub trait ResponseHandler: Send + Sync {
    fn handle_response(&self, response: Response);
}

type SharedHandler = Arc<RwLock<Option<Arc<dyn ResponseHandler>>>>;

/// Process-wide broker handle.
pub struct BrokerClient {
    client: AsyncClient,
    handler: SharedHandler,
    event_task: JoinHandle<()>,
}

impl BrokerClient {
    /// Connect and wait for the initial `ConnAck`; failing to reach the
    /// broker at startup is fatal for the caller.
    pub async fn connect(config: &BrokerConfig) -> Result<Self> {
        let client_id = format!("server_{}", Utc::now().timestamp());
        info!(
            host = %config.host,
            port = config.port,
            client_id = %client_id,
            "Connecting to MQTT broker"
        );

        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 64);
        let handler: SharedHandler = Arc::new(RwLock::new(None));

        wait_for_connack(&client, &mut event_loop).await?;
        info!(
            subscription = topics::RESPONSE_WILDCARD,
            "Connected to MQTT broker"
        );

        let event_task = tokio::spawn(run_event_loop(
            client.clone(),
            event_loop,
            Arc::clone(&handler),
        ));

        Ok(Self {
            client,
            handler,
            event_task,
        })
    }

    /// Install the server-side response handler; set once by the engine at
    /// startup.
    pub fn set_response_handler(&self, handler: Arc<dyn ResponseHandler>) {
        *self.handler.write().expect("handler lock poisoned") = Some(handler);
    }

    pub async fn disconnect(&self) {
        if let Err(err) = self.client.disconnect().await {
            warn!(error = %err, "MQTT disconnect failed");
        }
        self.event_task.abort();
        info!("Disconnected from MQTT broker");
    }
}

#[async_trait]
impl CommandPublisher for BrokerClient {
    async fn publish_command(&self, topic: &str, command: &Command) -> Result<()> {
        let payload = serde_json::to_vec(command).context("Failed to serialize command")?;
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .with_context(|| format!("Failed to publish command to {topic}"))?;

        debug!(
            command_id = %command.id,
            command_type = %command.command_type,
            topic = %topic,
            "Published command"
        );
        Ok(())
    }
}

/// Poll until the first `ConnAck` (subscribing there) or fail.
async fn wait_for_connack(client: &AsyncClient, event_loop: &mut EventLoop) -> Result<()> {
    let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
    loop {
        let event = tokio::time::timeout_at(deadline, event_loop.poll())
            .await
            .context("Timed out waiting for broker ConnAck")?
            .context("MQTT connection failed")?;

        if let Event::Incoming(Packet::ConnAck(_)) = event {
            subscribe_responses(client).await?;
            return Ok(());
        }
    }
}

async fn subscribe_responses(client: &AsyncClient) -> Result<()> {
    client
        .subscribe(topics::RESPONSE_WILDCARD, QoS::AtMostOnce)
        .await
        .context("Failed to subscribe to device response wildcard")
}

async fn run_event_loop(client: AsyncClient, mut event_loop: EventLoop, handler: SharedHandler) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                // Reconnect path: the session is fresh, re-assert the
                // wildcard subscription.
                info!("MQTT session (re)established");
                if let Err(err) = subscribe_responses(&client).await {
                    error!(error = %err, "Failed to re-subscribe after reconnect");
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                dispatch_response(&handler, &publish.topic, &publish.payload);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "MQTT connection error, retrying");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
            }
        }
    }
}

fn dispatch_response(handler: &SharedHandler, topic: &str, payload: &[u8]) {
    let response: Response = match serde_json::from_slice(payload) {
        Ok(response) => response,
        Err(err) => {
            warn!(topic = %topic, error = %err, "Failed to decode device response");
            return;
        }
    };

    debug!(
        topic = %topic,
        response_id = %response.id,
        status = ?response.status,
        "Device response received"
    );

    let guard = handler.read().expect("handler lock poisoned");
    match guard.as_ref() {
        Some(handler) => handler.handle_response(response),
        None => warn!(response_id = %response.id, "No response handler registered, dropping"),
    }
}

/// Recording publisher for tests.
#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// A publisher that records every command and optionally forwards it to
    /// a channel, so a test can play the device side of the conversation.
    #[derive(Default)]
    pub struct MockCommandPublisher {
        published: Mutex<Vec<(String, Command)>>,
        forward: Mutex<Option<mpsc::UnboundedSender<Command>>>,
        fail_count: AtomicUsize,
    }

    impl MockCommandPublisher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Publisher plus the stream of commands it will forward, in
        /// publication order.
        pub fn with_forwarding() -> (Arc<Self>, mpsc::UnboundedReceiver<Command>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let publisher = Self::new();
            *publisher.forward.lock().unwrap() = Some(tx);
            (Arc::new(publisher), rx)
        }

        /// Fail the next `count` publishes with a broker error.
        pub fn fail_next(&self, count: usize) {
            self.fail_count.store(count, Ordering::SeqCst);
        }

        pub fn published(&self) -> Vec<(String, Command)> {
            self.published.lock().unwrap().clone()
        }

        pub fn publish_count(&self) -> usize {
            self.published.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CommandPublisher for MockCommandPublisher {
        async fn publish_command(&self, topic: &str, command: &Command) -> Result<()> {
            let remaining = self.fail_count.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_count.store(remaining - 1, Ordering::SeqCst);
                anyhow::bail!("mock broker unavailable");
            }

            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), command.clone()));
            if let Some(tx) = self.forward.lock().unwrap().as_ref() {
                let _ = tx.send(command.clone());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockCommandPublisher;
    use super::*;
    use drover_protocol::CommandType;

    #[tokio::test]
    async fn mock_publisher_records_topic_and_command() {
        let publisher = MockCommandPublisher::new();
        let command = Command::new("exec_1_1", "exec_1", CommandType::Tap, "SN1");

        publisher
            .publish_command(&topics::command_topic("SN1"), &command)
            .await
            .unwrap();

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "device/no_SN1/command");
        assert_eq!(published[0].1.id, "exec_1_1");
    }

    #[tokio::test]
    async fn mock_publisher_fail_next_surfaces_broker_error() {
        let publisher = MockCommandPublisher::new();
        publisher.fail_next(1);
        let command = Command::new("exec_1_1", "exec_1", CommandType::Wait, "SN1");

        let err = publisher
            .publish_command("device/no_SN1/command", &command)
            .await;
        assert!(err.is_err());

        // The failure is consumed; the next publish succeeds.
        publisher
            .publish_command("device/no_SN1/command", &command)
            .await
            .unwrap();
        assert_eq!(publisher.publish_count(), 1);
    }

    #[test]
    fn dispatch_drops_undecodable_payloads() {
        let handler: SharedHandler = Arc::new(RwLock::new(None));
        // Must not panic or invoke anything.
        dispatch_response(&handler, "device/no_SN1/response", b"not json");
    }

    #[test]
    fn dispatch_routes_to_registered_handler() {
        use std::sync::Mutex;

        struct Capture(Mutex<Vec<Response>>);
        impl ResponseHandler for Capture {
            fn handle_response(&self, response: Response) {
                self.0.lock().unwrap().push(response);
            }
        }

        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let handler: SharedHandler =
            Arc::new(RwLock::new(Some(capture.clone() as Arc<dyn ResponseHandler>)));

        let payload = serde_json::to_vec(&Response::success("exec_1_7")).unwrap();
        dispatch_response(&handler, "device/no_SN1/response", &payload);

        let seen = capture.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].id, "exec_1_7");
    }
}
