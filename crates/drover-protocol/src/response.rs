use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Outcome classification of one command on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    Error,
    Timeout,
}

/// Text rectangle on screen, from a UI dump or an OCR pass.
///
/// Top-left origin; the canonical tap target is the rectangle center.
/// UI-derived hits report confidence 100, OCR engines report their own score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPosition {
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub confidence: f32,
    /// Origin of the hit: `ui`, `ocr`, `tesseract`, ...
    #[serde(default)]
    pub source: String,
}

impl TextPosition {
    /// Center of the rectangle, where a tap should land.
    pub fn tap_target(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Result of one command, published on `device/no_<serial>/response`.
///
/// `id` echoes the originating command id; the correlator keys on it.
/// Timeout responses may also be synthesized server-side when the facade's
/// deadline expires before the agent answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub status: ResponseStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,
    /// Present iff status is not `success`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64-encoded PNG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub text_info: Vec<TextPosition>,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub timestamp: i64,
}

impl Response {
    pub fn success(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            execution_id: None,
            status: ResponseStatus::Success,
            result: String::new(),
            error: None,
            screenshot: None,
            text_info: Vec::new(),
            duration_ms: 0,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut response = Self::success(id);
        response.status = ResponseStatus::Error;
        response.error = Some(message.into());
        response
    }

    /// Synthetic timeout response, used by the facade when the waiter's
    /// deadline expires and by the agent when a tool overruns.
    pub fn timeout(id: impl Into<String>) -> Self {
        let mut response = Self::success(id);
        response.status = ResponseStatus::Timeout;
        response.error = Some("command execution timeout".to_string());
        response
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tap_target_is_rectangle_center() {
        let position = TextPosition {
            text: "登录".to_string(),
            x: 400,
            y: 900,
            width: 200,
            height: 60,
            confidence: 100.0,
            source: "ui".to_string(),
        };
        assert_eq!(position.tap_target(), (500, 930));
    }

    #[test]
    fn timeout_response_carries_canonical_error() {
        let response = Response::timeout("exec_1_100");
        assert_eq!(response.status, ResponseStatus::Timeout);
        assert_eq!(response.error.as_deref(), Some("command execution timeout"));
        assert!(!response.is_success());
    }

    #[test]
    fn error_is_absent_from_wire_on_success() {
        let mut response = Response::success("exec_1_100");
        response.result = "ok".to_string();

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "success");
        assert!(value.get("error").is_none());
        assert!(value.get("screenshot").is_none());
        assert!(value.get("text_info").is_none());
    }

    #[test]
    fn response_round_trips_with_text_info() {
        let mut response = Response::success("exec_1_100");
        response.text_info = vec![TextPosition {
            text: "Settings".to_string(),
            x: 10,
            y: 20,
            width: 30,
            height: 40,
            confidence: 91.5,
            source: "tesseract".to_string(),
        }];
        response.duration_ms = 120;

        let json = serde_json::to_string(&response).unwrap();
        let back: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(back.text_info, response.text_info);
        assert_eq!(back.duration_ms, 120);
    }
}
