//! Tesseract-backed extraction engine.
//!
//! Shells out to the `tesseract` CLI in TSV mode and turns its word-level
//! boxes into [`TextPosition`]s. Words below 30% confidence are dropped.

use async_trait::async_trait;
use drover_protocol::TextPosition;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{ExtractorError, TextExtractor};

const ENGINE_NAME: &str = "tesseract";
const DEFAULT_LANGUAGES: &str = "eng+chi_sim+jpn+kor";
const MIN_CONFIDENCE: f32 = 30.0;
const PROCESS_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TesseractExtractor {
    binary: String,
}

impl TesseractExtractor {
    pub fn new() -> Self {
        Self {
            binary: "tesseract".to_string(),
        }
    }

    /// Point at a non-PATH binary; used by packaging and tests.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn language_arg(languages: &[String]) -> String {
        if languages.is_empty() {
            DEFAULT_LANGUAGES.to_string()
        } else {
            languages.join("+")
        }
    }
}

impl Default for TesseractExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    fn name(&self) -> &str {
        ENGINE_NAME
    }

    fn supported_languages(&self) -> Vec<String> {
        DEFAULT_LANGUAGES.split('+').map(String::from).collect()
    }

    async fn extract(
        &self,
        image: &[u8],
        languages: &[String],
    ) -> Result<Vec<TextPosition>, ExtractorError> {
        // The CLI wants a file on disk; hand it a temp image.
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(image)?;
        file.flush()?;

        let languages = Self::language_arg(languages);
        let output = tokio::time::timeout(
            PROCESS_TIMEOUT,
            Command::new(&self.binary)
                .arg(file.path())
                .arg("stdout")
                .args(["-l", &languages, "--psm", "3", "tsv"])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| ExtractorError::Processing {
            engine: ENGINE_NAME.to_string(),
            message: "tesseract timed out".to_string(),
        })?
        .map_err(|err| ExtractorError::Processing {
            engine: ENGINE_NAME.to_string(),
            message: format!("failed to run tesseract: {err}"),
        })?;

        if !output.status.success() {
            return Err(ExtractorError::Processing {
                engine: ENGINE_NAME.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let positions = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!(
            languages = %languages,
            extracted = positions.len(),
            "Tesseract extraction finished"
        );
        Ok(positions)
    }
}

/// Parse tesseract TSV output. Word rows are level 5; columns are
/// `level page block par line word left top width height conf text`.
fn parse_tsv(tsv: &str) -> Vec<TextPosition> {
    let mut positions = Vec::new();

    for line in tsv.lines().skip(1) {
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() < 12 {
            continue;
        }
        if columns[0] != "5" {
            continue;
        }

        let (Ok(left), Ok(top), Ok(width), Ok(height)) = (
            columns[6].parse::<i32>(),
            columns[7].parse::<i32>(),
            columns[8].parse::<i32>(),
            columns[9].parse::<i32>(),
        ) else {
            warn!(line = %line, "Skipping malformed tesseract row");
            continue;
        };
        let confidence: f32 = columns[10].parse().unwrap_or(0.0);
        let text = columns[11].trim();

        if confidence < MIN_CONFIDENCE || text.is_empty() {
            continue;
        }

        positions.push(TextPosition {
            text: text.to_string(),
            x: left,
            y: top,
            width,
            height,
            confidence,
            source: ENGINE_NAME.to_string(),
        });
    }

    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t1080\t2400\t-1\t\n\
5\t1\t1\t1\t1\t1\t120\t300\t80\t35\t91.4\tButton\n\
5\t1\t1\t1\t1\t2\t80\t400\t100\t30\t12.0\tnoise\n\
5\t1\t1\t1\t1\t3\t220\t500\t70\t28\t78.9\tCancel\n\
5\t1\t1\t1\t1\t4\t10\t10\t5\t5\t95.0\t \n";

    #[test]
    fn tsv_parser_keeps_confident_words_only() {
        let positions = parse_tsv(SAMPLE_TSV);
        assert_eq!(positions.len(), 2);

        assert_eq!(positions[0].text, "Button");
        assert_eq!(positions[0].x, 120);
        assert_eq!(positions[0].y, 300);
        assert_eq!(positions[0].width, 80);
        assert_eq!(positions[0].height, 35);
        assert_eq!(positions[0].source, "tesseract");

        // Low-confidence and blank words are filtered.
        assert_eq!(positions[1].text, "Cancel");
    }

    #[test]
    fn tsv_parser_survives_garbage() {
        assert!(parse_tsv("").is_empty());
        assert!(parse_tsv("not\ta\ttsv").is_empty());
        assert!(parse_tsv("header\n5\t1\t1\n").is_empty());
    }

    #[test]
    fn language_argument_joins_with_plus() {
        assert_eq!(
            TesseractExtractor::language_arg(&["eng".to_string(), "chi_sim".to_string()]),
            "eng+chi_sim"
        );
        assert_eq!(TesseractExtractor::language_arg(&[]), DEFAULT_LANGUAGES);
    }
}
