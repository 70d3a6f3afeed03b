//! uiautomator dump parsing.
//!
//! The emitter writes the whole view tree as one line of XML, so instead of
//! a structural parse the scanner walks `text="…"` attributes and pairs each
//! with the `bounds="[x1,y1][x2,y2]"` that follows within a bounded
//! look-ahead window. Width and height derive from the two corners.

use drover_protocol::TextPosition;

/// How far past a `text` attribute the matching `bounds` may sit. The
/// observed emitter keeps them within the same element, well inside this
/// window.
const BOUNDS_LOOKAHEAD: usize = 500;

pub const UI_SOURCE: &str = "ui";
pub const UI_CONFIDENCE: f32 = 100.0;

/// Extract text rectangles from a uiautomator XML dump.
pub fn parse_ui_dump(xml: &str) -> Vec<TextPosition> {
    let mut positions = Vec::new();
    let bytes = xml.as_bytes();
    let mut cursor = 0;

    while let Some(offset) = xml[cursor..].find("text=\"") {
        let text_start = cursor + offset + "text=\"".len();
        let Some(text_len) = xml[text_start..].find('"') else {
            break;
        };
        let text = &xml[text_start..text_start + text_len];
        let after_text = text_start + text_len;

        if !text.is_empty() {
            let window_end = (after_text + BOUNDS_LOOKAHEAD).min(bytes.len());
            // Look-ahead must land on a char boundary for the slice below.
            let window_end = floor_char_boundary(xml, window_end);
            if let Some(bounds) = find_bounds(&xml[after_text..window_end]) {
                let (x, y, width, height) = bounds;
                positions.push(TextPosition {
                    text: text.to_string(),
                    x,
                    y,
                    width,
                    height,
                    confidence: UI_CONFIDENCE,
                    source: UI_SOURCE.to_string(),
                });
            }
        }

        cursor = after_text;
    }

    positions
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index < s.len() && !s.is_char_boundary(index) {
        index -= 1;
    }
    index.min(s.len())
}

/// Parse the first `bounds="[x1,y1][x2,y2]"` in the window into
/// `(x, y, width, height)`.
fn find_bounds(window: &str) -> Option<(i32, i32, i32, i32)> {
    let start = window.find("bounds=\"[")? + "bounds=\"[".len();
    let end = window[start..].find("]\"")?;
    let raw = &window[start..start + end];

    let (first, second) = raw.split_once("][")?;
    let (x1, y1) = parse_pair(first)?;
    let (x2, y2) = parse_pair(second)?;

    Some((x1, y1, x2 - x1, y2 - y1))
}

fn parse_pair(raw: &str) -> Option<(i32, i32)> {
    let (x, y) = raw.split_once(',')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    // Realistic single-line dump: uiautomator emits the whole tree without
    // newlines.
    const SAMPLE: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?><hierarchy rotation="0"><node index="0" text="" resource-id="" class="android.widget.FrameLayout" bounds="[0,0][1080,2400]"><node index="1" text="登录" resource-id="com.app:id/login" class="android.widget.Button" package="com.app" checkable="false" bounds="[400,900][600,960]" /><node index="2" text="用户名" resource-id="com.app:id/user" class="android.widget.EditText" bounds="[100,300][500,360]" /></node></hierarchy>"#;

    #[test]
    fn parses_text_and_bounds_pairs() {
        let positions = parse_ui_dump(SAMPLE);
        assert_eq!(positions.len(), 2);

        assert_eq!(positions[0].text, "登录");
        assert_eq!(positions[0].x, 400);
        assert_eq!(positions[0].y, 900);
        assert_eq!(positions[0].width, 200);
        assert_eq!(positions[0].height, 60);
        assert_eq!(positions[0].source, "ui");
        assert_eq!(positions[0].confidence, 100.0);

        assert_eq!(positions[1].text, "用户名");
        assert_eq!(positions[1].width, 400);
    }

    #[test]
    fn empty_texts_are_skipped() {
        let positions = parse_ui_dump(SAMPLE);
        assert!(positions.iter().all(|p| !p.text.is_empty()));
    }

    #[test]
    fn text_without_nearby_bounds_is_dropped() {
        let filler = "x".repeat(BOUNDS_LOOKAHEAD + 10);
        let xml = format!(r#"<node text="orphan" {filler} bounds="[0,0][10,10]" />"#);
        assert!(parse_ui_dump(&xml).is_empty());
    }

    #[test]
    fn malformed_bounds_are_dropped() {
        let xml = r#"<node text="a" bounds="[garbage]" /><node text="b" bounds="[1,2][3" />"#;
        assert!(parse_ui_dump(xml).is_empty());
    }

    #[test]
    fn tolerates_truncated_input() {
        assert!(parse_ui_dump("").is_empty());
        assert!(parse_ui_dump(r#"<node text="dangling"#).is_empty());
        assert!(parse_ui_dump(r#"<node text="x" bounds="[1,2][3,4]"#).is_empty());
    }

    #[test]
    fn multibyte_text_near_window_edge_does_not_panic() {
        let pad = "y".repeat(BOUNDS_LOOKAHEAD - 8);
        let xml = format!(r#"<node text="點" {pad}漢漢漢 bounds="[1,2][3,4]" />"#);
        // Window edge may fall inside a multibyte char; must not panic.
        let _ = parse_ui_dump(&xml);
    }
}
