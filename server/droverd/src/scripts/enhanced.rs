//! Enhanced variants: UI lookup first, server-side OCR as fallback.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use drover_protocol::{ScriptResult, TextPosition};
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::{info, warn};

use crate::catalog::{Script, ScriptDescriptor};
use crate::context::{params, ScriptContext};
use crate::facade::DEFAULT_COMMAND_TIMEOUT_SECS;

use super::{elapsed_ms, find_text};

/// Take a fresh screenshot and run it through the default extractor.
/// Returns the screenshot (for result attachments) plus the OCR positions.
async fn ocr_pass(ctx: &ScriptContext) -> Result<(Option<String>, Vec<TextPosition>), String> {
    let screen = ctx.client.screenshot_only().await;
    if !screen.is_success() {
        return Err(format!(
            "Screenshot failed: {}",
            screen.error.unwrap_or_default()
        ));
    }
    let Some(encoded) = screen.screenshot else {
        return Err("Screenshot response carried no image".to_string());
    };

    let image = BASE64
        .decode(encoded.as_bytes())
        .map_err(|err| format!("Invalid screenshot encoding: {err}"))?;

    match ctx.ocr.process(&image, &[]).await {
        Ok(positions) => Ok((Some(encoded), positions)),
        Err(err) => Err(format!("OCR failed: {err}")),
    }
}

pub struct GetOcrTextScript;

#[async_trait]
impl Script for GetOcrTextScript {
    fn descriptor(&self) -> ScriptDescriptor {
        ScriptDescriptor::new(
            "get_ocr_text",
            "Take a screenshot and extract text via the server-side OCR engine",
        )
    }

    async fn run(&self, ctx: &ScriptContext, _parameters: &Map<String, Value>) -> ScriptResult {
        let start = Instant::now();

        match ocr_pass(ctx).await {
            Ok((screenshot, positions)) => ScriptResult::ok("OCR text extracted successfully")
                .with_data("text_count", json!(positions.len()))
                .with_screenshot(screenshot)
                .with_text_info(positions)
                .with_duration(elapsed_ms(start)),
            Err(message) => ScriptResult::failure(message).with_duration(elapsed_ms(start)),
        }
    }
}

pub struct CheckTextEnhancedScript;

#[async_trait]
impl Script for CheckTextEnhancedScript {
    fn descriptor(&self) -> ScriptDescriptor {
        ScriptDescriptor::new(
            "check_text_enhanced",
            "Check for a text via UI dump, optionally falling back to OCR",
        )
        .param("text", "Text to look for")
        .param("timeout", "Per-command timeout in seconds, default 30")
        .param("ocr_fallback", "Run server-side OCR when the UI lookup misses, default false")
    }

    async fn run(&self, ctx: &ScriptContext, parameters: &Map<String, Value>) -> ScriptResult {
        let start = Instant::now();
        let Some(text) = params::get_str(parameters, "text") else {
            return ScriptResult::failure("Missing required parameter: text")
                .with_duration(elapsed_ms(start));
        };
        let timeout = params::get_int(parameters, "timeout", DEFAULT_COMMAND_TIMEOUT_SECS as i64);
        let ocr_fallback = params::get_bool(parameters, "ocr_fallback", false);

        info!(
            execution_id = %ctx.execution_id,
            text = %text,
            timeout,
            ocr_fallback,
            "Enhanced text check"
        );
        ctx.client.set_timeout(timeout.max(1) as u64);

        let mut all_positions = Vec::new();
        let mut screenshot = None;

        let ui = ctx.client.get_ui_text().await;
        let found_in_ui = ui.is_success() && find_text(&ui.text_info, text).is_some();
        if ui.is_success() {
            all_positions.extend(ui.text_info);
        }

        let mut found_in_ocr = false;
        if !found_in_ui && ocr_fallback {
            info!(execution_id = %ctx.execution_id, "Text not in UI dump, attempting OCR fallback");
            match ocr_pass(ctx).await {
                Ok((image, positions)) => {
                    found_in_ocr = find_text(&positions, text).is_some();
                    screenshot = image;
                    all_positions.extend(positions);
                }
                Err(message) => {
                    warn!(execution_id = %ctx.execution_id, error = %message, "OCR fallback failed");
                }
            }
        }

        if found_in_ui || found_in_ocr {
            let source = if found_in_ui { "ui" } else { "ocr" };
            return ScriptResult::ok(format!("Text '{text}' found via {source}"))
                .with_data("text", json!(text))
                .with_data("found_in_ui", json!(found_in_ui))
                .with_data("found_in_ocr", json!(found_in_ocr))
                .with_data("source", json!(source))
                .with_text_info(all_positions)
                .with_screenshot(screenshot)
                .with_duration(elapsed_ms(start));
        }

        ScriptResult::failure(format!("Text '{text}' not found in UI or OCR"))
            .with_text_info(all_positions)
            .with_screenshot(screenshot)
            .with_duration(elapsed_ms(start))
    }
}

pub struct FindAndClickEnhancedScript;

#[async_trait]
impl Script for FindAndClickEnhancedScript {
    fn descriptor(&self) -> ScriptDescriptor {
        ScriptDescriptor::new(
            "find_and_click_enhanced",
            "Find a text via UI dump (OCR fallback) and tap it",
        )
        .param("text", "Text to look for")
        .param("timeout", "Per-command timeout in seconds, default 30")
        .param("required", "Fail when the text is missing, default true")
        .param("ocr_fallback", "Run server-side OCR when the UI lookup misses, default false")
    }

    async fn run(&self, ctx: &ScriptContext, parameters: &Map<String, Value>) -> ScriptResult {
        let start = Instant::now();
        let Some(text) = params::get_str(parameters, "text") else {
            return ScriptResult::failure("Missing required parameter: text")
                .with_duration(elapsed_ms(start));
        };
        let timeout = params::get_int(parameters, "timeout", DEFAULT_COMMAND_TIMEOUT_SECS as i64);
        let required = params::get_bool(parameters, "required", true);
        let ocr_fallback = params::get_bool(parameters, "ocr_fallback", false);

        info!(
            execution_id = %ctx.execution_id,
            text = %text,
            timeout,
            required,
            ocr_fallback,
            "Enhanced find and click"
        );
        ctx.client.set_timeout(timeout.max(1) as u64);

        let mut all_positions: Vec<TextPosition> = Vec::new();
        let mut screenshot = None;
        let mut target: Option<TextPosition> = None;
        let mut source = "";

        let ui = ctx.client.get_ui_text().await;
        if ui.is_success() {
            if let Some(hit) = find_text(&ui.text_info, text) {
                target = Some(hit.clone());
                source = "ui";
            }
            all_positions.extend(ui.text_info);
        }

        if target.is_none() && ocr_fallback {
            info!(execution_id = %ctx.execution_id, "Text not in UI dump, attempting OCR fallback");
            match ocr_pass(ctx).await {
                Ok((image, positions)) => {
                    if let Some(hit) = find_text(&positions, text) {
                        target = Some(hit.clone());
                        source = "ocr";
                    }
                    screenshot = image;
                    all_positions.extend(positions);
                }
                Err(message) => {
                    warn!(execution_id = %ctx.execution_id, error = %message, "OCR fallback failed");
                }
            }
        }

        let Some(target) = target else {
            if required {
                return ScriptResult::failure(format!("Text '{text}' not found on screen"))
                    .with_screenshot(screenshot)
                    .with_text_info(all_positions)
                    .with_duration(elapsed_ms(start));
            }
            return ScriptResult::ok(format!("Text '{text}' not found, but not required"))
                .with_data("found", json!(false))
                .with_data("source", json!("none"))
                .with_screenshot(screenshot)
                .with_text_info(all_positions)
                .with_duration(elapsed_ms(start));
        };

        let (click_x, click_y) = target.tap_target();
        info!(
            execution_id = %ctx.execution_id,
            source,
            found_x = target.x,
            found_y = target.y,
            click_x,
            click_y,
            "Text found, tapping center"
        );

        let tap = ctx.client.tap(click_x, click_y).await;
        if !tap.is_success() {
            return ScriptResult::failure(format!("Tap failed: {}", tap.error.unwrap_or_default()))
                .with_screenshot(screenshot)
                .with_text_info(all_positions)
                .with_duration(elapsed_ms(start));
        }

        ScriptResult::ok(format!(
            "Successfully found and clicked text '{text}' via {source}"
        ))
        .with_data("text", json!(text))
        .with_data("click_x", json!(click_x))
        .with_data("click_y", json!(click_y))
        .with_data("found_x", json!(target.x))
        .with_data("found_y", json!(target.y))
        .with_data("source", json!(source))
        .with_data("confidence", json!(target.confidence))
        .with_screenshot(screenshot)
        .with_text_info(all_positions)
        .with_coordinates(click_x, click_y)
        .with_duration(elapsed_ms(start))
    }
}
