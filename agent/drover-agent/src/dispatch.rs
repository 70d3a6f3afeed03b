//! Command dispatch: one command in, one response out.
//!
//! Commands execute strictly one at a time; the worker loop in `main`
//! feeds this executor sequentially. Every response carries the measured
//! duration and a timestamp.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use drover_protocol::{Command, CommandType, Response, TextPosition};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::shell::{Adb, ToolError, ToolOutput, DEFAULT_SHELL_TIMEOUT};
use crate::uidump;

const UI_DUMP_TIMEOUT: Duration = Duration::from_secs(15);
const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(10);
const UI_DUMP_REMOTE_PATH: &str = "/sdcard/ui.xml";
const SCREENSHOT_REMOTE_PATH: &str = "/sdcard/screenshot.png";

pub struct CommandExecutor {
    adb: Adb,
}

impl CommandExecutor {
    pub fn new(adb: Adb) -> Self {
        Self { adb }
    }

    /// Decode one raw command payload and execute it. Payloads with an
    /// unrecognized type tag still get an error response as long as they
    /// carry a command id; payloads without an id are dropped.
    pub async fn handle_payload(&self, payload: &[u8]) -> Option<Response> {
        match serde_json::from_slice::<Command>(payload) {
            Ok(command) => Some(self.execute(&command).await),
            Err(decode_err) => {
                let raw: Value = serde_json::from_slice(payload).ok()?;
                let id = raw.get("id")?.as_str()?.to_string();
                let kind = raw
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("<missing>");
                warn!(command_id = %id, kind, error = %decode_err, "Unknown command");
                Some(self.stamped(Response::error(id, "unknown command type"), Instant::now()))
            }
        }
    }

    /// Execute one decoded command.
    pub async fn execute(&self, command: &Command) -> Response {
        let start = Instant::now();
        info!(
            command_id = %command.id,
            command_type = %command.command_type,
            "Executing command"
        );

        let response = match command.command_type {
            CommandType::Shell => self.run_shell(command).await,
            CommandType::Tap => self.run_tap(command).await,
            CommandType::Input => self.run_input(command).await,
            CommandType::Screenshot => self.run_screenshot(command, true).await,
            CommandType::ScreenshotOnly => self.run_screenshot(command, false).await,
            CommandType::GetUiText => self.run_get_ui_text(command).await,
            CommandType::CheckText => self.run_check_text(command).await,
            CommandType::Wait => self.run_wait(command).await,
        };

        self.stamped(response, start)
    }

    fn stamped(&self, mut response: Response, start: Instant) -> Response {
        response.duration_ms = start.elapsed().as_millis() as i64;
        response.timestamp = Utc::now().timestamp();
        response
    }

    fn command_timeout(command: &Command) -> Duration {
        command
            .timeout
            .filter(|t| *t > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_SHELL_TIMEOUT)
    }

    /// Map a tool invocation onto the wire statuses: deadline overruns
    /// become `timeout`, any other failure `error`.
    fn tool_response(command_id: &str, outcome: Result<ToolOutput, ToolError>) -> Response {
        match outcome {
            Ok(output) => {
                let mut response = if output.ok {
                    Response::success(command_id)
                } else {
                    Response::error(command_id, output.error.unwrap_or_default())
                };
                response.result = output.combined;
                response
            }
            Err(ToolError::Timeout) => Response::timeout(command_id),
            Err(err) => Response::error(command_id, err.to_string()),
        }
    }

    async fn run_shell(&self, command: &Command) -> Response {
        let Some(line) = command.command.as_deref().filter(|c| !c.is_empty()) else {
            return Response::error(&command.id, "empty shell command");
        };
        let timeout = Self::command_timeout(command);

        // With explicit args the line is a program; otherwise it runs under
        // the shell.
        let outcome = if command.args.is_empty() {
            crate::shell::run_tool("sh", &["-c", line], timeout).await
        } else {
            let args: Vec<&str> = command.args.iter().map(String::as_str).collect();
            crate::shell::run_tool(line, &args, timeout).await
        };

        Self::tool_response(&command.id, outcome)
    }

    async fn run_tap(&self, command: &Command) -> Response {
        let (x, y) = (
            command.x.unwrap_or_default(),
            command.y.unwrap_or_default(),
        );
        if x <= 0 || y <= 0 {
            return Response::error(&command.id, format!("invalid tap coordinates ({x}, {y})"));
        }

        let x = x.to_string();
        let y = y.to_string();
        let outcome = self
            .adb
            .shell(&["input", "tap", &x, &y], Self::command_timeout(command))
            .await;
        Self::tool_response(&command.id, outcome)
    }

    async fn run_input(&self, command: &Command) -> Response {
        let Some(text) = command.text.as_deref().filter(|t| !t.is_empty()) else {
            return Response::error(&command.id, "empty input text");
        };

        let outcome = self
            .adb
            .shell(&["input", "text", text], Self::command_timeout(command))
            .await;
        Self::tool_response(&command.id, outcome)
    }

    async fn run_screenshot(&self, command: &Command, with_ui_text: bool) -> Response {
        let screenshot = match self.capture_screenshot().await {
            Ok(encoded) => encoded,
            Err(message) => return Response::error(&command.id, message),
        };

        let mut response = Response::success(&command.id);
        response.screenshot = Some(screenshot);
        response.result = "screenshot captured".to_string();

        if with_ui_text {
            match self.fetch_ui_text().await {
                Ok(text_info) => response.text_info = text_info,
                Err(message) => {
                    // The image is still worth returning.
                    warn!(command_id = %command.id, error = %message, "UI dump failed");
                }
            }
        }

        response
    }

    async fn run_get_ui_text(&self, command: &Command) -> Response {
        match self.fetch_ui_text().await {
            Ok(text_info) => {
                let mut response = Response::success(&command.id);
                response.result = format!("extracted {} UI text elements", text_info.len());
                response.text_info = text_info;
                response
            }
            Err(message) => Response::error(&command.id, message),
        }
    }

    async fn run_check_text(&self, command: &Command) -> Response {
        let Some(needle) = command.text.as_deref().filter(|t| !t.is_empty()) else {
            return Response::error(&command.id, "empty check text");
        };

        let text_info = match self.fetch_ui_text().await {
            Ok(text_info) => text_info,
            Err(message) => return Response::error(&command.id, message),
        };

        let hit = text_info.iter().find(|p| p.text.contains(needle));
        let mut response = match hit {
            Some(position) => {
                let mut response = Response::success(&command.id);
                response.result = format!(
                    "found text '{}' at ({}, {})",
                    needle, position.x, position.y
                );
                response
            }
            None => Response::error(&command.id, format!("text not found: {needle}")),
        };
        // Either way the observed list goes back for diagnosis.
        response.text_info = text_info;
        response
    }

    async fn run_wait(&self, command: &Command) -> Response {
        let seconds = command.timeout.filter(|t| *t > 0).unwrap_or(1);
        tokio::time::sleep(Duration::from_secs(seconds)).await;

        let mut response = Response::success(&command.id);
        response.result = format!("waited {seconds} seconds");
        response
    }

    /// Capture a PNG on the device, pull it locally and base64-encode it.
    async fn capture_screenshot(&self) -> Result<String, String> {
        let captured = self
            .adb
            .shell(
                &["screencap", "-p", SCREENSHOT_REMOTE_PATH],
                SCREENSHOT_TIMEOUT,
            )
            .await
            .map_err(|err| format!("screenshot failed: {err}"))?;
        if !captured.ok {
            return Err(format!(
                "screenshot failed: {}",
                captured.error.unwrap_or_default()
            ));
        }

        let local_dir = tempfile::tempdir().map_err(|err| format!("tempdir failed: {err}"))?;
        let local_path = local_dir.path().join("screenshot.png");
        let local = local_path.to_string_lossy().into_owned();

        let pulled = self
            .adb
            .run(&["pull", SCREENSHOT_REMOTE_PATH, &local], SCREENSHOT_TIMEOUT)
            .await
            .map_err(|err| format!("screenshot pull failed: {err}"))?;
        if !pulled.ok {
            return Err(format!(
                "screenshot pull failed: {}",
                pulled.error.unwrap_or_default()
            ));
        }

        let image =
            std::fs::read(&local_path).map_err(|err| format!("screenshot read failed: {err}"))?;

        // Remote cleanup can lag behind the response.
        let adb = self.adb.clone();
        tokio::spawn(async move {
            let _ = adb
                .shell(&["rm", SCREENSHOT_REMOTE_PATH], SCREENSHOT_TIMEOUT)
                .await;
        });

        Ok(BASE64.encode(image))
    }

    /// UI dump protocol: dump (exit status ignored), verify the file,
    /// read it, clean up asynchronously.
    async fn fetch_ui_text(&self) -> Result<Vec<TextPosition>, String> {
        // uiautomator often prints a permission warning yet still writes
        // the file; the exit status is not trustworthy.
        let _ = self
            .adb
            .shell(
                &["uiautomator", "dump", UI_DUMP_REMOTE_PATH],
                UI_DUMP_TIMEOUT,
            )
            .await;

        let exists = self
            .adb
            .shell(&["test", "-f", UI_DUMP_REMOTE_PATH], UI_DUMP_TIMEOUT)
            .await;
        match exists {
            Ok(output) if output.ok => {}
            _ => {
                debug!("UI dump file missing, returning empty text info");
                return Ok(Vec::new());
            }
        }

        let dump = self
            .adb
            .shell(&["cat", UI_DUMP_REMOTE_PATH], UI_DUMP_TIMEOUT)
            .await
            .map_err(|err| format!("failed to read UI dump: {err}"))?;

        let adb = self.adb.clone();
        tokio::spawn(async move {
            let _ = adb.shell(&["rm", UI_DUMP_REMOTE_PATH], UI_DUMP_TIMEOUT).await;
        });

        Ok(uidump::parse_ui_dump(&dump.combined))
    }
}
