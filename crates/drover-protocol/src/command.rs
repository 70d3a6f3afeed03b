use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Operation the agent is asked to perform.
///
/// The set is closed: new command types are added here and in the agent's
/// dispatch table in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    Shell,
    Tap,
    Input,
    Screenshot,
    ScreenshotOnly,
    GetUiText,
    CheckText,
    Wait,
}

impl CommandType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Shell => "shell",
            CommandType::Tap => "tap",
            CommandType::Input => "input",
            CommandType::Screenshot => "screenshot",
            CommandType::ScreenshotOnly => "screenshot_only",
            CommandType::GetUiText => "get_ui_text",
            CommandType::CheckText => "check_text",
            CommandType::Wait => "wait",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One device command, published to `device/no_<serial>/command`.
///
/// Created by the facade, consumed by the agent, never mutated after
/// publication. `id` is globally unique and carries the owning
/// `execution_id` as its prefix; the server's dispatcher relies on that
/// prefix to route the response back to the right execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    pub execution_id: String,
    #[serde(rename = "type")]
    pub command_type: CommandType,
    /// Shell command line (`shell` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Extra argv for `shell`; when empty the command line runs under `sh -c`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    /// Text to type (`input`) or to look for (`check_text`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Per-command deadline in seconds; the agent kills overrunning tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Unix seconds at creation.
    #[serde(default)]
    pub timestamp: i64,
}

impl Command {
    pub fn new(
        id: impl Into<String>,
        execution_id: impl Into<String>,
        command_type: CommandType,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            execution_id: execution_id.into(),
            command_type,
            command: None,
            args: Vec::new(),
            x: None,
            y: None,
            text: None,
            timeout: None,
            device_id: Some(device_id.into()),
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = Some(seconds);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_type_round_trips_as_snake_case() {
        let json = serde_json::to_string(&CommandType::ScreenshotOnly).unwrap();
        assert_eq!(json, "\"screenshot_only\"");

        let parsed: CommandType = serde_json::from_str("\"get_ui_text\"").unwrap();
        assert_eq!(parsed, CommandType::GetUiText);
    }

    #[test]
    fn command_serializes_type_tag_and_omits_empty_fields() {
        let cmd = Command::new("exec_1_100", "exec_1", CommandType::Tap, "SN1");
        let value = serde_json::to_value(&cmd).unwrap();

        assert_eq!(value["type"], "tap");
        assert_eq!(value["id"], "exec_1_100");
        assert_eq!(value["execution_id"], "exec_1");
        // Unused payload fields stay off the wire entirely.
        assert!(value.get("command").is_none());
        assert!(value.get("text").is_none());
        assert!(value.get("args").is_none());
    }

    #[test]
    fn command_decode_ignores_unknown_fields() {
        let raw = r#"{
            "id": "exec_1_100",
            "execution_id": "exec_1",
            "type": "shell",
            "command": "wm size",
            "timeout": 15,
            "some_future_field": {"nested": true}
        }"#;

        let cmd: Command = serde_json::from_str(raw).unwrap();
        assert_eq!(cmd.command_type, CommandType::Shell);
        assert_eq!(cmd.command.as_deref(), Some("wm size"));
        assert_eq!(cmd.timeout, Some(15));
        assert!(cmd.args.is_empty());
    }

    #[test]
    fn command_id_prefix_is_execution_id() {
        let cmd = Command::new("SN1_wait_1700000000_42", "SN1_wait_1700000000", CommandType::Wait, "SN1");
        assert!(cmd.id.starts_with(&cmd.execution_id));
    }
}
