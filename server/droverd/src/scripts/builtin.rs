//! The nine primitive scripts.

use async_trait::async_trait;
use drover_protocol::ScriptResult;
use serde_json::{json, Map, Value};
use std::time::Instant;
use tracing::info;

use crate::catalog::{Script, ScriptDescriptor};
use crate::context::{params, ScriptContext};
use crate::facade::DEFAULT_COMMAND_TIMEOUT_SECS;

use super::{elapsed_ms, find_text};

/// Screenshot → substring-match text → tap at the rectangle center.
///
/// Shared with the composites, which call it directly with their own
/// parameter maps.
pub(crate) async fn find_and_click(
    ctx: &ScriptContext,
    parameters: &Map<String, Value>,
) -> ScriptResult {
    let start = Instant::now();

    let Some(text) = params::get_str(parameters, "text") else {
        return ScriptResult::failure("Missing required parameter: text")
            .with_duration(elapsed_ms(start));
    };
    let timeout = params::get_int(parameters, "timeout", DEFAULT_COMMAND_TIMEOUT_SECS as i64);
    let required = params::get_bool(parameters, "required", true);

    info!(
        execution_id = %ctx.execution_id,
        text = %text,
        timeout,
        required,
        "Finding and clicking text"
    );
    ctx.client.set_timeout(timeout.max(1) as u64);

    let screen = ctx.client.screenshot().await;
    if !screen.is_success() {
        return ScriptResult::failure(format!(
            "Screenshot failed: {}",
            screen.error.unwrap_or_default()
        ))
        .with_duration(elapsed_ms(start));
    }

    let Some(target) = find_text(&screen.text_info, text) else {
        if required {
            return ScriptResult::failure(format!("Text '{text}' not found on screen"))
                .with_screenshot(screen.screenshot)
                .with_text_info(screen.text_info)
                .with_duration(elapsed_ms(start));
        }
        return ScriptResult::ok(format!("Text '{text}' not found (optional)"))
            .with_data("found", json!(false))
            .with_screenshot(screen.screenshot)
            .with_text_info(screen.text_info)
            .with_duration(elapsed_ms(start));
    };

    let (click_x, click_y) = target.tap_target();
    let target_text = target.text.clone();
    info!(
        execution_id = %ctx.execution_id,
        found_x = target.x,
        found_y = target.y,
        click_x,
        click_y,
        "Text found, tapping center"
    );

    let tap = ctx.client.tap(click_x, click_y).await;
    if !tap.is_success() {
        return ScriptResult::failure(format!("Tap failed: {}", tap.error.unwrap_or_default()))
            .with_screenshot(screen.screenshot)
            .with_coordinates(click_x, click_y)
            .with_duration(elapsed_ms(start));
    }

    ScriptResult::ok(format!("Successfully found and clicked text: '{text}'"))
        .with_data("found", json!(true))
        .with_data("text", json!(target_text))
        .with_data("click_x", json!(click_x))
        .with_data("click_y", json!(click_y))
        .with_screenshot(screen.screenshot)
        .with_coordinates(click_x, click_y)
        .with_duration(elapsed_ms(start))
}

pub struct FindAndClickScript;

#[async_trait]
impl Script for FindAndClickScript {
    fn descriptor(&self) -> ScriptDescriptor {
        ScriptDescriptor::new("find_and_click", "Find a text on screen and tap it")
            .param("text", "Text to look for (substring match)")
            .param("timeout", "Per-command timeout in seconds, default 30")
            .param("required", "Fail when the text is missing, default true")
    }

    async fn run(&self, ctx: &ScriptContext, parameters: &Map<String, Value>) -> ScriptResult {
        find_and_click(ctx, parameters).await
    }
}

pub struct ScreenshotScript;

#[async_trait]
impl Script for ScreenshotScript {
    fn descriptor(&self) -> ScriptDescriptor {
        ScriptDescriptor::new(
            "screenshot",
            "Take a screenshot and extract UI text positions",
        )
    }

    async fn run(&self, ctx: &ScriptContext, _parameters: &Map<String, Value>) -> ScriptResult {
        let start = Instant::now();
        let response = ctx.client.screenshot().await;
        if !response.is_success() {
            return ScriptResult::failure(format!(
                "Screenshot failed: {}",
                response.error.unwrap_or_default()
            ))
            .with_duration(elapsed_ms(start));
        }

        ScriptResult::ok("Screenshot taken successfully")
            .with_data("text_count", json!(response.text_info.len()))
            .with_screenshot(response.screenshot)
            .with_text_info(response.text_info)
            .with_duration(elapsed_ms(start))
    }
}

pub struct ScreenshotOnlyScript;

#[async_trait]
impl Script for ScreenshotOnlyScript {
    fn descriptor(&self) -> ScriptDescriptor {
        ScriptDescriptor::new("screenshot_only", "Take a screenshot without UI extraction")
    }

    async fn run(&self, ctx: &ScriptContext, _parameters: &Map<String, Value>) -> ScriptResult {
        let start = Instant::now();
        let response = ctx.client.screenshot_only().await;
        if !response.is_success() {
            return ScriptResult::failure(format!(
                "Screenshot failed: {}",
                response.error.unwrap_or_default()
            ))
            .with_duration(elapsed_ms(start));
        }

        ScriptResult::ok("Screenshot taken successfully")
            .with_screenshot(response.screenshot)
            .with_duration(elapsed_ms(start))
    }
}

pub struct GetUiTextScript;

#[async_trait]
impl Script for GetUiTextScript {
    fn descriptor(&self) -> ScriptDescriptor {
        ScriptDescriptor::new("get_ui_text", "Extract UI text positions without an image")
    }

    async fn run(&self, ctx: &ScriptContext, _parameters: &Map<String, Value>) -> ScriptResult {
        let start = Instant::now();
        let response = ctx.client.get_ui_text().await;
        if !response.is_success() {
            return ScriptResult::failure(format!(
                "Get UI text failed: {}",
                response.error.unwrap_or_default()
            ))
            .with_duration(elapsed_ms(start));
        }

        ScriptResult::ok("UI text extracted successfully")
            .with_data("text_count", json!(response.text_info.len()))
            .with_text_info(response.text_info)
            .with_duration(elapsed_ms(start))
    }
}

pub struct WaitScript;

#[async_trait]
impl Script for WaitScript {
    fn descriptor(&self) -> ScriptDescriptor {
        ScriptDescriptor::new("wait", "Sleep without a device round trip")
            .param("seconds", "Seconds to wait, must be positive")
    }

    async fn run(&self, ctx: &ScriptContext, parameters: &Map<String, Value>) -> ScriptResult {
        let start = Instant::now();
        let seconds = params::get_int(parameters, "seconds", 0);
        if seconds <= 0 {
            return ScriptResult::failure("Invalid seconds parameter")
                .with_duration(elapsed_ms(start));
        }

        info!(execution_id = %ctx.execution_id, seconds, "Waiting");
        ctx.client.wait(seconds as u64).await;

        if ctx.is_cancelled() {
            return ScriptResult::failure("Wait cancelled").with_duration(elapsed_ms(start));
        }

        ScriptResult::ok(format!("Waited for {seconds} seconds"))
            .with_data("seconds", json!(seconds))
            .with_duration(elapsed_ms(start))
    }
}

pub struct InputTextScript;

#[async_trait]
impl Script for InputTextScript {
    fn descriptor(&self) -> ScriptDescriptor {
        ScriptDescriptor::new("input_text", "Send keystrokes to the device")
            .param("text", "Text to type")
    }

    async fn run(&self, ctx: &ScriptContext, parameters: &Map<String, Value>) -> ScriptResult {
        let start = Instant::now();
        let Some(text) = params::get_str(parameters, "text") else {
            return ScriptResult::failure("Missing required parameter: text")
                .with_duration(elapsed_ms(start));
        };

        let response = ctx.client.input(text).await;
        if !response.is_success() {
            return ScriptResult::failure(format!(
                "Input failed: {}",
                response.error.unwrap_or_default()
            ))
            .with_duration(elapsed_ms(start));
        }

        ScriptResult::ok("Text input successful")
            .with_data("text", json!(text))
            .with_duration(elapsed_ms(start))
    }
}

pub struct CheckTextScript;

#[async_trait]
impl Script for CheckTextScript {
    fn descriptor(&self) -> ScriptDescriptor {
        ScriptDescriptor::new("check_text", "Check whether a text is on screen")
            .param("text", "Text to look for")
            .param("required", "Fail when the text is missing, default true")
    }

    async fn run(&self, ctx: &ScriptContext, parameters: &Map<String, Value>) -> ScriptResult {
        let start = Instant::now();
        let Some(text) = params::get_str(parameters, "text") else {
            return ScriptResult::failure("Missing required parameter: text")
                .with_duration(elapsed_ms(start));
        };
        let required = params::get_bool(parameters, "required", true);

        let response = ctx.client.check_text(text).await;
        let found = response.is_success();

        if required && !found {
            return ScriptResult::failure(format!("Required text '{text}' not found"))
                .with_screenshot(response.screenshot)
                .with_text_info(response.text_info)
                .with_duration(elapsed_ms(start));
        }

        ScriptResult::ok(format!("Text check completed: {text}"))
            .with_data("text", json!(text))
            .with_data("found", json!(found))
            .with_screenshot(response.screenshot)
            .with_text_info(response.text_info)
            .with_duration(elapsed_ms(start))
    }
}

pub struct ExecuteShellScript;

#[async_trait]
impl Script for ExecuteShellScript {
    fn descriptor(&self) -> ScriptDescriptor {
        ScriptDescriptor::new("execute_shell", "Run a shell command on the device")
            .param("command", "Shell command line")
            .param("timeout", "Per-command timeout in seconds, default 30")
    }

    async fn run(&self, ctx: &ScriptContext, parameters: &Map<String, Value>) -> ScriptResult {
        let start = Instant::now();
        let Some(command) = params::get_str(parameters, "command") else {
            return ScriptResult::failure("Missing required parameter: command")
                .with_duration(elapsed_ms(start));
        };
        let timeout = params::get_int(parameters, "timeout", DEFAULT_COMMAND_TIMEOUT_SECS as i64);

        info!(execution_id = %ctx.execution_id, command = %command, timeout, "Executing shell command");
        ctx.client.set_timeout(timeout.max(1) as u64);

        let response = ctx.client.execute_shell(command).await;
        if !response.is_success() {
            return ScriptResult::failure(format!(
                "Shell command failed: {}",
                response.error.unwrap_or_default()
            ))
            .with_duration(elapsed_ms(start));
        }

        ScriptResult::ok("Shell command executed successfully")
            .with_data("command", json!(command))
            .with_data("result", json!(response.result))
            .with_duration(elapsed_ms(start))
    }
}

pub struct ClickCoordinateScript;

#[async_trait]
impl Script for ClickCoordinateScript {
    fn descriptor(&self) -> ScriptDescriptor {
        ScriptDescriptor::new("click_coordinate", "Tap an absolute coordinate")
            .param("x", "X coordinate")
            .param("y", "Y coordinate")
            .param("timeout", "Per-command timeout in seconds, default 30")
    }

    async fn run(&self, ctx: &ScriptContext, parameters: &Map<String, Value>) -> ScriptResult {
        let start = Instant::now();
        let Some(x) = parameters.get("x").and_then(crate::context::coerce_int) else {
            return ScriptResult::failure("Invalid x coordinate parameter")
                .with_duration(elapsed_ms(start));
        };
        let Some(y) = parameters.get("y").and_then(crate::context::coerce_int) else {
            return ScriptResult::failure("Invalid y coordinate parameter")
                .with_duration(elapsed_ms(start));
        };
        let timeout = params::get_int(parameters, "timeout", DEFAULT_COMMAND_TIMEOUT_SECS as i64);

        info!(execution_id = %ctx.execution_id, x, y, timeout, "Tapping coordinate");
        ctx.client.set_timeout(timeout.max(1) as u64);

        let response = ctx.client.tap(x as i32, y as i32).await;
        if !response.is_success() {
            return ScriptResult::failure(format!(
                "Tap failed: {}",
                response.error.unwrap_or_default()
            ))
            .with_duration(elapsed_ms(start));
        }

        ScriptResult::ok(format!("Successfully tapped coordinate ({x}, {y})"))
            .with_data("x", json!(x))
            .with_data("y", json!(y))
            .with_coordinates(x as i32, y as i32)
            .with_duration(elapsed_ms(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::testing::{ui_position, MockDeviceClient};
    use drover_ocr::ExtractorManager;
    use std::sync::Arc;

    fn context_with(client: Arc<MockDeviceClient>) -> ScriptContext {
        ScriptContext::new(
            "SN1",
            "SN1_test_1700000000",
            Map::new(),
            client,
            Arc::new(ExtractorManager::new()),
            Arc::new(crate::context::CancelToken::new()),
        )
    }

    fn params_of(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn find_and_click_taps_rectangle_center() {
        // "登录" at bounds [400,900][600,960] → tap at (500, 930).
        let client = Arc::new(MockDeviceClient::new(vec![ui_position(
            "登录", 400, 900, 200, 60,
        )]));
        let ctx = context_with(Arc::clone(&client));

        let result = find_and_click(&ctx, &params_of(&[("text", json!("登录"))])).await;

        assert!(result.success, "{}", result.message);
        assert_eq!(result.data["click_x"], 500);
        assert_eq!(result.data["click_y"], 930);
        assert_eq!(client.calls(), vec!["screenshot", "tap:500,930"]);
    }

    #[tokio::test]
    async fn find_and_click_required_miss_fails_without_tap() {
        let client = Arc::new(MockDeviceClient::new(vec![ui_position(
            "首页", 0, 0, 100, 40,
        )]));
        let ctx = context_with(Arc::clone(&client));

        let result = find_and_click(
            &ctx,
            &params_of(&[("text", json!("支付")), ("required", json!(true))]),
        )
        .await;

        assert!(!result.success);
        assert_eq!(result.message, "Text '支付' not found on screen");
        assert_eq!(client.calls(), vec!["screenshot"], "no tap was published");
    }

    #[tokio::test]
    async fn find_and_click_optional_miss_succeeds_with_found_false() {
        let client = Arc::new(MockDeviceClient::new(vec![]));
        let ctx = context_with(Arc::clone(&client));

        let result = find_and_click(
            &ctx,
            &params_of(&[("text", json!("支付")), ("required", json!(false))]),
        )
        .await;

        assert!(result.success);
        assert_eq!(result.data["found"], false);
        assert_eq!(client.calls(), vec!["screenshot"]);
    }

    #[tokio::test]
    async fn find_and_click_surfaces_tap_failure() {
        let mut mock = MockDeviceClient::new(vec![ui_position("OK", 0, 0, 10, 10)]);
        mock.fail_taps = true;
        let client = Arc::new(mock);
        let ctx = context_with(Arc::clone(&client));

        let result = find_and_click(&ctx, &params_of(&[("text", json!("ok"))])).await;
        assert!(!result.success);
        assert!(result.message.starts_with("Tap failed"));
    }

    #[tokio::test]
    async fn wait_rejects_non_positive_seconds() {
        let client = Arc::new(MockDeviceClient::new(vec![]));
        let ctx = context_with(Arc::clone(&client));

        for seconds in [json!(0), json!(-3), json!("junk")] {
            let result = WaitScript
                .run(&ctx, &params_of(&[("seconds", seconds)]))
                .await;
            assert!(!result.success);
            assert_eq!(result.message, "Invalid seconds parameter");
        }
        assert!(client.calls().is_empty(), "no sleep for invalid input");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_reports_waited_seconds() {
        let client = Arc::new(MockDeviceClient::new(vec![]));
        let ctx = context_with(Arc::clone(&client));

        let result = WaitScript
            .run(&ctx, &params_of(&[("seconds", json!(2))]))
            .await;

        assert!(result.success);
        assert_eq!(result.message, "Waited for 2 seconds");
        assert_eq!(result.data["seconds"], 2);
    }

    #[tokio::test]
    async fn check_text_required_miss_fails() {
        let client = Arc::new(MockDeviceClient::new(vec![ui_position(
            "设置", 0, 0, 10, 10,
        )]));
        let ctx = context_with(Arc::clone(&client));

        let result = CheckTextScript
            .run(&ctx, &params_of(&[("text", json!("支付"))]))
            .await;
        assert!(!result.success);

        let result = CheckTextScript
            .run(
                &ctx,
                &params_of(&[("text", json!("支付")), ("required", json!(false))]),
            )
            .await;
        assert!(result.success);
        assert_eq!(result.data["found"], false);
    }

    #[tokio::test]
    async fn execute_shell_passes_result_through() {
        let client = Arc::new(MockDeviceClient::new(vec![]));
        let ctx = context_with(Arc::clone(&client));

        let result = ExecuteShellScript
            .run(&ctx, &params_of(&[("command", json!("wm size"))]))
            .await;

        assert!(result.success);
        assert_eq!(result.data["result"], "ran: wm size");
    }

    #[tokio::test]
    async fn click_coordinate_accepts_string_coordinates() {
        let client = Arc::new(MockDeviceClient::new(vec![]));
        let ctx = context_with(Arc::clone(&client));

        let result = ClickCoordinateScript
            .run(
                &ctx,
                &params_of(&[("x", json!("320")), ("y", json!(640.2))]),
            )
            .await;

        assert!(result.success);
        assert_eq!(client.calls(), vec!["tap:320,640"]);
    }

    #[tokio::test]
    async fn missing_required_params_are_validation_failures() {
        let client = Arc::new(MockDeviceClient::new(vec![]));
        let ctx = context_with(Arc::clone(&client));

        let result = InputTextScript.run(&ctx, &Map::new()).await;
        assert_eq!(result.message, "Missing required parameter: text");

        let result = ExecuteShellScript.run(&ctx, &Map::new()).await;
        assert_eq!(result.message, "Missing required parameter: command");

        let result = find_and_click(&ctx, &Map::new()).await;
        assert_eq!(result.message, "Missing required parameter: text");
        assert!(client.calls().is_empty());
    }
}
