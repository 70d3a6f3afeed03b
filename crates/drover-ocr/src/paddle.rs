//! PaddleOCR-backed extraction engine.
//!
//! Delegates to an external helper (a small PaddleOCR Python entry point)
//! that takes an image path and prints a JSON array of recognitions, each a
//! text with a confidence and a four-point quad. The quad is reduced to its
//! bounding rectangle.

use async_trait::async_trait;
use drover_protocol::TextPosition;
use serde::Deserialize;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{ExtractorError, TextExtractor};

const ENGINE_NAME: &str = "paddleocr";
const DEFAULT_HELPER: &str = "paddleocr-helper";
const DEFAULT_LANGUAGES: &str = "ch,en";
const MIN_CONFIDENCE: f32 = 30.0;
const PROCESS_TIMEOUT: Duration = Duration::from_secs(60);

/// One recognition as printed by the helper: `box` is
/// `[[x1,y1],[x2,y2],[x3,y3],[x4,y4]]` in reading order.
#[derive(Debug, Deserialize)]
struct PaddleRecognition {
    text: String,
    confidence: f32,
    #[serde(rename = "box")]
    quad: Vec<[i32; 2]>,
}

pub struct PaddleExtractor {
    helper: String,
}

impl PaddleExtractor {
    pub fn new() -> Self {
        Self {
            helper: DEFAULT_HELPER.to_string(),
        }
    }

    pub fn with_helper(helper: impl Into<String>) -> Self {
        Self {
            helper: helper.into(),
        }
    }

    fn language_arg(languages: &[String]) -> String {
        if languages.is_empty() {
            DEFAULT_LANGUAGES.to_string()
        } else {
            languages.join(",")
        }
    }
}

impl Default for PaddleExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for PaddleExtractor {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn supported_languages(&self) -> Vec<String> {
        DEFAULT_LANGUAGES.split(',').map(String::from).collect()
    }

    async fn extract(
        &self,
        image: &[u8],
        languages: &[String],
    ) -> Result<Vec<TextPosition>, ExtractorError> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(image)?;
        file.flush()?;

        let languages = Self::language_arg(languages);
        let output = tokio::time::timeout(
            PROCESS_TIMEOUT,
            Command::new(&self.helper)
                .arg("--image")
                .arg(file.path())
                .args(["--lang", &languages])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ExtractorError::Processing {
            engine: ENGINE_NAME.to_string(),
            message: "paddleocr helper timed out".to_string(),
        })?
        .map_err(|err| ExtractorError::Processing {
            engine: ENGINE_NAME.to_string(),
            message: format!("failed to run paddleocr helper: {err}"),
        })?;

        if !output.status.success() {
            return Err(ExtractorError::Processing {
                engine: ENGINE_NAME.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let positions = parse_recognitions(&output.stdout)?;
        debug!(
            languages = %languages,
            extracted = positions.len(),
            "PaddleOCR extraction finished"
        );
        Ok(positions)
    }
}

fn parse_recognitions(raw: &[u8]) -> Result<Vec<TextPosition>, ExtractorError> {
    let recognitions: Vec<PaddleRecognition> =
        serde_json::from_slice(raw).map_err(|err| ExtractorError::Processing {
            engine: ENGINE_NAME.to_string(),
            message: format!("invalid helper output: {err}"),
        })?;

    let mut positions = Vec::new();
    for recognition in recognitions {
        let text = recognition.text.trim();
        if text.is_empty() || recognition.confidence < MIN_CONFIDENCE {
            continue;
        }
        let Some(rect) = bounding_rect(&recognition.quad) else {
            warn!(text = %text, "Skipping recognition with malformed quad");
            continue;
        };
        let (x, y, width, height) = rect;

        positions.push(TextPosition {
            text: text.to_string(),
            x,
            y,
            width,
            height,
            confidence: recognition.confidence,
            source: ENGINE_NAME.to_string(),
        });
    }

    Ok(positions)
}

/// Axis-aligned bounding rectangle of the four-point quad.
fn bounding_rect(quad: &[[i32; 2]]) -> Option<(i32, i32, i32, i32)> {
    if quad.len() != 4 {
        return None;
    }
    let min_x = quad.iter().map(|p| p[0]).min()?;
    let max_x = quad.iter().map(|p| p[0]).max()?;
    let min_y = quad.iter().map(|p| p[1]).min()?;
    let max_y = quad.iter().map(|p| p[1]).max()?;
    Some((min_x, min_y, max_x - min_x, max_y - min_y))
}
