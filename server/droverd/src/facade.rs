//! Per-execution device client.
//!
//! Scripts see synchronous primitive calls; underneath, each call publishes
//! one command to the device's command topic, parks on the execution's
//! correlator and returns the response (or a synthetic timeout). Broker
//! failures fold into an error response so scripts always observe an
//! ordinary [`Response`]. This is the single point enforcing per-command
//! timeouts; scripts never touch the broker.

use async_trait::async_trait;
use chrono::Utc;
use drover_broker::CommandPublisher;
use drover_protocol::{topics, Command, CommandType, Response};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::context::CancelToken;
use crate::correlator::Correlator;

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// The fixed capability set scripts compose against.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    async fn execute_shell(&self, command: &str) -> Response;
    async fn tap(&self, x: i32, y: i32) -> Response;
    async fn input(&self, text: &str) -> Response;
    async fn screenshot(&self) -> Response;
    async fn screenshot_only(&self) -> Response;
    async fn get_ui_text(&self) -> Response;
    async fn check_text(&self, text: &str) -> Response;

    /// Local sleep; no device round trip. Returns early if the execution is
    /// cancelled while sleeping.
    async fn wait(&self, seconds: u64);

    /// Raise or lower the per-command deadline for subsequent calls.
    fn set_timeout(&self, seconds: u64);
}

/// MQTT-backed implementation, one per execution.
pub struct MqttDeviceClient {
    device_id: String,
    execution_id: String,
    publisher: Arc<dyn CommandPublisher>,
    correlator: Arc<Correlator>,
    cancel: Arc<CancelToken>,
    timeout_secs: AtomicU64,
    last_nanos: AtomicI64,
}

impl MqttDeviceClient {
    pub fn new(
        device_id: impl Into<String>,
        execution_id: impl Into<String>,
        publisher: Arc<dyn CommandPublisher>,
        correlator: Arc<Correlator>,
        cancel: Arc<CancelToken>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            execution_id: execution_id.into(),
            publisher,
            correlator,
            cancel,
            timeout_secs: AtomicU64::new(DEFAULT_COMMAND_TIMEOUT_SECS),
            last_nanos: AtomicI64::new(0),
        }
    }

    /// `<execution_id>_<unix-nanos>`, strictly increasing within the
    /// execution even when the clock returns an equal reading.
    fn next_command_id(&self) -> String {
        let mut nanos = Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.last_nanos.load(Ordering::SeqCst) + 1);
        let previous = self.last_nanos.load(Ordering::SeqCst);
        if nanos <= previous {
            nanos = previous + 1;
        }
        self.last_nanos.store(nanos, Ordering::SeqCst);
        format!("{}_{}", self.execution_id, nanos)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.load(Ordering::SeqCst))
    }

    fn new_command(&self, command_type: CommandType) -> Command {
        Command::new(
            self.next_command_id(),
            self.execution_id.clone(),
            command_type,
            self.device_id.clone(),
        )
        .with_timeout(self.timeout_secs.load(Ordering::SeqCst))
    }

    /// Publish the command and wait for its response. Within one execution
    /// commands are strictly sequential: the script task is parked here
    /// until the response (or timeout) is observed.
    async fn run_command(&self, command: Command) -> Response {
        // Nothing is published for an execution that has terminated.
        if self.cancel.is_cancelled() {
            return Response::error(command.id, "execution cancelled");
        }

        let command_id = command.id.clone();
        let waiter = self.correlator.register(&command_id);
        let topic = topics::command_topic(&self.device_id);

        if let Err(err) = self.publisher.publish_command(&topic, &command).await {
            self.correlator.discard(&command_id);
            warn!(
                command_id = %command_id,
                device_id = %self.device_id,
                error = %err,
                "Command publish failed"
            );
            return Response::error(command_id, format!("publish failed: {err:#}"));
        }

        self.correlator
            .wait(&command_id, waiter, self.timeout())
            .await
    }
}

#[async_trait]
impl DeviceClient for MqttDeviceClient {
    async fn execute_shell(&self, command: &str) -> Response {
        let mut cmd = self.new_command(CommandType::Shell);
        cmd.command = Some(command.to_string());
        self.run_command(cmd).await
    }

    async fn tap(&self, x: i32, y: i32) -> Response {
        let mut cmd = self.new_command(CommandType::Tap);
        cmd.x = Some(x);
        cmd.y = Some(y);
        self.run_command(cmd).await
    }

    async fn input(&self, text: &str) -> Response {
        let mut cmd = self.new_command(CommandType::Input);
        cmd.text = Some(text.to_string());
        self.run_command(cmd).await
    }

    async fn screenshot(&self) -> Response {
        self.run_command(self.new_command(CommandType::Screenshot))
            .await
    }

    async fn screenshot_only(&self) -> Response {
        self.run_command(self.new_command(CommandType::ScreenshotOnly))
            .await
    }

    async fn get_ui_text(&self) -> Response {
        self.run_command(self.new_command(CommandType::GetUiText))
            .await
    }

    async fn check_text(&self, text: &str) -> Response {
        let mut cmd = self.new_command(CommandType::CheckText);
        cmd.text = Some(text.to_string());
        self.run_command(cmd).await
    }

    async fn wait(&self, seconds: u64) {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    fn set_timeout(&self, seconds: u64) {
        self.timeout_secs.store(seconds, Ordering::SeqCst);
    }
}
