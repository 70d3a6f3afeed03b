//! Device serial discovery.
//!
//! Order: explicit override (flag or `DROVER_SERIAL`), else the platform's
//! `getprop ro.serialno`. An empty serial aborts startup: the topic
//! namespace embeds it and an agent without one cannot subscribe.

use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::shell::run_tool;

const GETPROP_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn detect(override_serial: Option<String>) -> Result<String> {
    if let Some(serial) = override_serial.filter(|s| !s.is_empty()) {
        return Ok(serial);
    }

    let output = run_tool(
        "adb",
        &["shell", "getprop", "ro.serialno"],
        GETPROP_TIMEOUT,
    )
    .await
    .context("Failed to query device serial number")?;

    if !output.ok {
        bail!(
            "getprop failed: {}",
            output.error.unwrap_or_default()
        );
    }

    let serial = output.combined.trim().to_string();
    if serial.is_empty() {
        bail!("device serial number is empty");
    }
    Ok(serial)
}
