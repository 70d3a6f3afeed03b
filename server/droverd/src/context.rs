//! Per-execution runtime context handed to script functions.

use chrono::{DateTime, Utc};
use drover_ocr::ExtractorManager;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;

use crate::facade::DeviceClient;

/// Cancellation token observable by long-running primitives. Fired once by
/// `cancel`; observers see it at their next suspension point.
pub struct CancelToken {
    tx: watch::Sender<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn fire(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token has been fired.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only ends on fire().
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a script function needs for one run. Never escapes the
/// script's task.
pub struct ScriptContext {
    pub device_id: String,
    pub execution_id: String,
    pub variables: Map<String, Value>,
    pub start_time: DateTime<Utc>,
    pub client: Arc<dyn DeviceClient>,
    pub ocr: Arc<ExtractorManager>,
    cancel: Arc<CancelToken>,
}

impl ScriptContext {
    pub fn new(
        device_id: impl Into<String>,
        execution_id: impl Into<String>,
        variables: Map<String, Value>,
        client: Arc<dyn DeviceClient>,
        ocr: Arc<ExtractorManager>,
        cancel: Arc<CancelToken>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            execution_id: execution_id.into(),
            variables,
            start_time: Utc::now(),
            client,
            ocr,
            cancel,
        }
    }

    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.variables.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    /// Integer accessor tolerating numeric, floating and decimal-string
    /// values, the way request payloads actually arrive.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.variables
            .get(key)
            .and_then(coerce_int)
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.variables.get(key) {
            Some(Value::Bool(b)) => *b,
            _ => default,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> Arc<CancelToken> {
        Arc::clone(&self.cancel)
    }
}

/// Lenient integer coercion shared by context and parameter lookups.
pub fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Parameter lookups against the request's variable map.
pub mod params {
    use super::coerce_int;
    use serde_json::{Map, Value};

    pub fn get_str<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
        params.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    pub fn get_int(params: &Map<String, Value>, key: &str, default: i64) -> i64 {
        params.get(key).and_then(coerce_int).unwrap_or(default)
    }

    pub fn get_bool(params: &Map<String, Value>, key: &str, default: bool) -> bool {
        params.get(key).and_then(Value::as_bool).unwrap_or(default)
    }
}
