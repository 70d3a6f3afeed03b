//! Broker configuration for drover processes.
//!
//! Every key is resolved independently, in order: process environment, then
//! a `.env` dotfile in the working directory, then the compiled default.
//! Recognized keys: `MQTT_BROKER` (default `localhost`), `MQTT_PORT`
//! (default `1883`), `MQTT_USERNAME`, `MQTT_PASSWORD`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_BROKER_HOST: &str = "localhost";
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Connection settings for the MQTT broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Never serialized back out.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            port: DEFAULT_BROKER_PORT,
            username: None,
            password: None,
        }
    }
}

impl BrokerConfig {
    /// Load from the process environment and `./.env`.
    pub fn load() -> Self {
        Self::load_from(Path::new(".env"))
    }

    /// Load with an explicit dotfile path; a missing dotfile is not an error.
    pub fn load_from(dotfile: &Path) -> Self {
        let file_values = parse_dotfile(dotfile);
        Self::resolve(&file_values, |key| std::env::var(key).ok())
    }

    /// Key-by-key precedence: env over dotfile over default. Seamed on the
    /// env lookup so precedence is testable without touching process state.
    fn resolve(
        file_values: &HashMap<String, String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let lookup = |key: &str| -> Option<String> {
            env(key)
                .filter(|value| !value.is_empty())
                .or_else(|| file_values.get(key).cloned())
        };

        let port = match lookup("MQTT_PORT") {
            Some(raw) => match raw.parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    warn!(value = %raw, "invalid MQTT_PORT, using default");
                    DEFAULT_BROKER_PORT
                }
            },
            None => DEFAULT_BROKER_PORT,
        };

        Self {
            host: lookup("MQTT_BROKER").unwrap_or_else(|| DEFAULT_BROKER_HOST.to_string()),
            port,
            username: lookup("MQTT_USERNAME"),
            password: lookup("MQTT_PASSWORD"),
        }
    }
}

/// Parse a `KEY=value` dotfile. Blank lines and `#`/`//` comments are
/// skipped, values may be single- or double-quoted.
fn parse_dotfile(path: &Path) -> HashMap<String, String> {
    let mut values = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(path) else {
        return values;
    };

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        values.insert(key, value.to_string());
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_dotfile(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_apply_without_env_or_dotfile() {
        let config = BrokerConfig::resolve(&HashMap::new(), |_| None);
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1883);
        assert!(config.username.is_none());
        assert!(config.password.is_none());
    }

    #[test]
    fn dotfile_overrides_defaults() {
        let file = write_dotfile(
            "# broker settings\nMQTT_BROKER=broker.internal\nMQTT_PORT=8883\nMQTT_USERNAME=\"drover\"\nMQTT_PASSWORD='secret'\n",
        );
        let values = parse_dotfile(file.path());
        let config = BrokerConfig::resolve(&values, |_| None);

        assert_eq!(config.host, "broker.internal");
        assert_eq!(config.port, 8883);
        assert_eq!(config.username.as_deref(), Some("drover"));
        assert_eq!(config.password.as_deref(), Some("secret"));
    }

    #[test]
    fn env_overrides_dotfile_per_key() {
        let file = write_dotfile("MQTT_BROKER=from-file\nMQTT_PORT=8883\n");
        let values = parse_dotfile(file.path());
        // Only the host is overridden in the environment; the port must
        // still come from the dotfile.
        let config = BrokerConfig::resolve(&values, |key| match key {
            "MQTT_BROKER" => Some("from-env".to_string()),
            _ => None,
        });

        assert_eq!(config.host, "from-env");
        assert_eq!(config.port, 8883);
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        let config = BrokerConfig::resolve(&HashMap::new(), |key| match key {
            "MQTT_PORT" => Some("not-a-port".to_string()),
            _ => None,
        });
        assert_eq!(config.port, DEFAULT_BROKER_PORT);
    }

    #[test]
    fn dotfile_parser_skips_comments_and_malformed_lines() {
        let file = write_dotfile("# comment\n// other comment\n\njunk line\nMQTT_BROKER=ok\n");
        let values = parse_dotfile(file.path());
        assert_eq!(values.len(), 1);
        assert_eq!(values.get("MQTT_BROKER").map(String::as_str), Some("ok"));
    }

    #[test]
    fn missing_dotfile_is_not_an_error() {
        let values = parse_dotfile(Path::new("/nonexistent/.env"));
        assert!(values.is_empty());
    }
}
