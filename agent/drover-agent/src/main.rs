//! Drover device agent.
//!
//! Subscribes to this device's command topic, executes one command at a
//! time and publishes each response on the device's response topic. The
//! broker event loop stays responsive while commands run: incoming commands
//! queue onto a single worker task, which preserves the one-at-a-time
//! ordering the orchestrator relies on.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use drover_config::BrokerConfig;
use drover_protocol::{topics, Response};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod dispatch;
mod serial;
mod shell;
mod uidump;

use dispatch::CommandExecutor;
use shell::Adb;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);
const KEEP_ALIVE: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "drover-agent", version, about = "Drover on-device command agent")]
struct Args {
    /// Device serial; detected via `getprop ro.serialno` when omitted.
    #[arg(long, env = "DROVER_SERIAL")]
    serial: Option<String>,

    /// Dotfile consulted for MQTT settings after the environment.
    #[arg(long, default_value = ".env", env = "DROVER_ENV_FILE")]
    env_file: PathBuf,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let serial = serial::detect(args.serial)
        .await
        .context("Cannot determine device serial number")?;
    let command_topic = topics::command_topic(&serial);
    let response_topic = topics::response_topic(&serial);
    info!(serial = %serial, command_topic = %command_topic, "Starting drover-agent");

    let config = BrokerConfig::load_from(&args.env_file);
    let client_id = format!("device_{}_{}", serial, Utc::now().timestamp());
    let mut options = MqttOptions::new(client_id, &config.host, config.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);
    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.clone().unwrap_or_default());
    }

    let (client, mut event_loop) = AsyncClient::new(options, 32);

    // Single worker: commands execute strictly one at a time, in arrival
    // order, while the event loop keeps servicing the connection.
    let (job_tx, mut job_rx) = mpsc::channel::<Vec<u8>>(16);
    let executor = CommandExecutor::new(Adb::new(serial.clone()));
    let worker = {
        let client = client.clone();
        let response_topic = response_topic.clone();
        tokio::spawn(async move {
            while let Some(payload) = job_rx.recv().await {
                let Some(response) = executor.handle_payload(&payload).await else {
                    continue;
                };
                publish_response(&client, &response_topic, &response).await;
            }
        })
    };

    info!(broker = %config.host, port = config.port, "Agent connecting to broker");
    loop {
        tokio::select! {
            event = event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(topic = %command_topic, "Connected, subscribing to command topic");
                    if let Err(err) = client.subscribe(&command_topic, QoS::AtMostOnce).await {
                        error!(error = %err, "Failed to subscribe to command topic");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if job_tx.send(publish.payload.to_vec()).await.is_err() {
                        error!("Command worker is gone, shutting down");
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "Broker connection error, retrying");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, disconnecting");
                break;
            }
        }
    }

    drop(job_tx);
    let _ = client.disconnect().await;
    worker.abort();
    Ok(())
}

async fn publish_response(client: &AsyncClient, topic: &str, response: &Response) {
    let payload = match serde_json::to_vec(response) {
        Ok(payload) => payload,
        Err(err) => {
            error!(response_id = %response.id, error = %err, "Failed to serialize response");
            return;
        }
    };

    match client
        .publish(topic, QoS::AtMostOnce, false, payload)
        .await
    {
        Ok(()) => info!(response_id = %response.id, status = ?response.status, "Response published"),
        Err(err) => error!(response_id = %response.id, error = %err, "Failed to publish response"),
    }
}
