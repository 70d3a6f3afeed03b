//! Typed builders for the per-device MQTT topic namespace.
//!
//! Topics embed the device serial verbatim: `device/no_<serial>/command` for
//! server→device commands, `device/no_<serial>/response` for the way back.
//! The server holds a single wildcard subscription covering every device.

const DEVICE_PREFIX: &str = "device/no_";

/// Wildcard the server subscribes to; `+` matches exactly one device serial.
pub const RESPONSE_WILDCARD: &str = "device/no_+/response";

/// Command topic for one device (server → device).
pub fn command_topic(serial: &str) -> String {
    format!("{DEVICE_PREFIX}{serial}/command")
}

/// Response topic for one device (device → server).
pub fn response_topic(serial: &str) -> String {
    format!("{DEVICE_PREFIX}{serial}/response")
}

/// Extract the serial from a response topic, if it has the canonical shape.
pub fn serial_from_response_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(DEVICE_PREFIX)?
        .strip_suffix("/response")
        .filter(|serial| !serial.is_empty() && !serial.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_embed_serial_verbatim() {
        assert_eq!(command_topic("SN1"), "device/no_SN1/command");
        assert_eq!(response_topic("SN1"), "device/no_SN1/response");
    }

    #[test]
    fn wildcard_matches_every_device_slot() {
        // The wildcard differs from a concrete response topic only in the
        // serial slot.
        let concrete = response_topic("ABC123");
        let wild_parts: Vec<&str> = RESPONSE_WILDCARD.split('/').collect();
        let concrete_parts: Vec<&str> = concrete.split('/').collect();
        assert_eq!(wild_parts.len(), concrete_parts.len());
        assert_eq!(wild_parts[0], concrete_parts[0]);
        assert_eq!(wild_parts[1], "no_+");
        assert_eq!(wild_parts[2], concrete_parts[2]);
    }

    #[test]
    fn serial_extraction() {
        assert_eq!(
            serial_from_response_topic("device/no_SN1/response"),
            Some("SN1")
        );
        assert_eq!(serial_from_response_topic("device/no_SN1/command"), None);
        assert_eq!(serial_from_response_topic("device/no_/response"), None);
        assert_eq!(serial_from_response_topic("other/no_SN1/response"), None);
        assert_eq!(
            serial_from_response_topic("device/no_a/b/response"),
            None,
            "serials never contain topic separators"
        );
    }
}
