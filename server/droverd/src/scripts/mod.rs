//! The registered script set.
//!
//! Scripts compose device primitives through the facade; they never touch
//! the broker. Composites call the plain variants directly inside their own
//! task, there is no nested scheduler.

use drover_protocol::TextPosition;
use std::sync::Arc;
use std::time::Instant;

use crate::catalog::ScriptCatalog;

pub mod builtin;
pub mod composites;
pub mod enhanced;

/// Register every built-in script. Called once at process initialization.
pub fn register_builtin(catalog: &ScriptCatalog) {
    catalog.register(Arc::new(builtin::ScreenshotScript));
    catalog.register(Arc::new(builtin::ScreenshotOnlyScript));
    catalog.register(Arc::new(builtin::GetUiTextScript));
    catalog.register(Arc::new(builtin::WaitScript));
    catalog.register(Arc::new(builtin::InputTextScript));
    catalog.register(Arc::new(builtin::CheckTextScript));
    catalog.register(Arc::new(builtin::ExecuteShellScript));
    catalog.register(Arc::new(builtin::FindAndClickScript));
    catalog.register(Arc::new(builtin::ClickCoordinateScript));
    catalog.register(Arc::new(enhanced::CheckTextEnhancedScript));
    catalog.register(Arc::new(enhanced::FindAndClickEnhancedScript));
    catalog.register(Arc::new(enhanced::GetOcrTextScript));
    catalog.register(Arc::new(composites::LoginScript));
    catalog.register(Arc::new(composites::SmartNavigateScript));
}

/// Case-insensitive substring match over screen text positions, first hit
/// wins (dump order is top-to-bottom).
pub(crate) fn find_text<'a>(positions: &'a [TextPosition], needle: &str) -> Option<&'a TextPosition> {
    let needle = needle.to_lowercase();
    positions
        .iter()
        .find(|position| position.text.to_lowercase().contains(&needle))
}

pub(crate) fn elapsed_ms(start: Instant) -> i64 {
    start.elapsed().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(text: &str) -> TextPosition {
        TextPosition {
            text: text.to_string(),
            x: 0,
            y: 0,
            width: 10,
            height: 10,
            confidence: 100.0,
            source: "ui".to_string(),
        }
    }

    #[test]
    fn find_text_is_case_insensitive_substring() {
        let screen = vec![position("Settings"), position("登录按钮")];

        assert_eq!(find_text(&screen, "settings").unwrap().text, "Settings");
        assert_eq!(find_text(&screen, "登录").unwrap().text, "登录按钮");
        assert!(find_text(&screen, "logout").is_none());
    }

    #[test]
    fn find_text_returns_first_hit() {
        let screen = vec![position("OK"), position("OK again")];
        let hit = find_text(&screen, "ok").unwrap();
        assert_eq!(hit.text, "OK");
    }
}
