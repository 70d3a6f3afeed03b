use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::response::TextPosition;

/// Lifecycle state of one script run.
///
/// Transitions are one-way: `running` moves into exactly one of the terminal
/// states and never back. Persisted records are always terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

/// Request to start a named script against one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptRequest {
    pub device_id: String,
    pub script_name: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

/// Immediate answer to a script submission; the run continues asynchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub message: String,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i32,
    pub y: i32,
}

/// Final outcome of a script function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub text_info: Vec<TextPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinate>,
}

impl ScriptResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Map::new(),
            error: None,
            duration_ms: 0,
            screenshot: None,
            text_info: Vec::new(),
            coordinates: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        let mut result = Self::ok(message);
        result.success = false;
        result
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_screenshot(mut self, screenshot: Option<String>) -> Self {
        self.screenshot = screenshot;
        self
    }

    pub fn with_text_info(mut self, text_info: Vec<TextPosition>) -> Self {
        self.text_info = text_info;
        self
    }

    pub fn with_coordinates(mut self, x: i32, y: i32) -> Self {
        self.coordinates = Some(Coordinate { x, y });
        self
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// One script run, live in memory while running and persisted as
/// `<id>.json` once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptExecution {
    pub id: String,
    pub script_name: String,
    pub device_id: String,
    #[serde(default)]
    pub variables: Map<String, Value>,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ScriptResult>,
}

impl ScriptExecution {
    /// Execution id of the form `<device>_<script>_<unix-seconds>`.
    pub fn make_id(device_id: &str, script_name: &str, at: DateTime<Utc>) -> String {
        format!("{}_{}_{}", device_id, script_name, at.timestamp())
    }

    pub fn new(request: &ScriptRequest, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Self::make_id(&request.device_id, &request.script_name, start_time),
            script_name: request.script_name.clone(),
            device_id: request.device_id.clone(),
            variables: request.variables.clone(),
            start_time,
            end_time: None,
            status: ExecutionStatus::Running,
            result: None,
        }
    }

    /// Wall-clock duration so far, or the final duration once terminal.
    pub fn duration_ms(&self) -> i64 {
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - self.start_time).num_milliseconds()
    }
}
