//! Server-side text extraction for screenshots.
//!
//! The orchestrator's enhanced scripts fall back to OCR when the UI dump
//! misses a text. Extraction engines are pluggable: each implements
//! [`TextExtractor`], the [`ExtractorManager`] keeps them by name and routes
//! to a configurable default. The only contract an engine has to honor is
//! `image bytes + language hint → list of text positions`.

use async_trait::async_trait;
use drover_protocol::TextPosition;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

pub mod paddle;
pub mod tesseract;

pub use paddle::PaddleExtractor;
pub use tesseract::TesseractExtractor;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("extraction engine `{0}` is not available")]
    EngineNotFound(String),

    #[error("no extraction engines registered")]
    NoEngines,

    #[error("engine `{engine}` failed: {message}")]
    Processing { engine: String, message: String },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// One OCR engine.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    fn name(&self) -> &str;

    /// Language codes this engine can be asked for (e.g. `eng`, `chi_sim`).
    fn supported_languages(&self) -> Vec<String>;

    /// Extract text positions from an encoded image. An empty `languages`
    /// slice means the engine's own default set.
    async fn extract(
        &self,
        image: &[u8],
        languages: &[String],
    ) -> Result<Vec<TextPosition>, ExtractorError>;
}

/// Registry of extraction engines with a default selection.
#[derive(Default)]
pub struct ExtractorManager {
    engines: RwLock<HashMap<String, Arc<dyn TextExtractor>>>,
    default_engine: RwLock<Option<String>>,
}

impl ExtractorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine; the first one registered becomes the default.
    pub fn register(&self, extractor: Arc<dyn TextExtractor>) {
        let name = extractor.name().to_string();
        self.engines
            .write()
            .expect("engine lock poisoned")
            .insert(name.clone(), extractor);

        let mut default = self.default_engine.write().expect("default lock poisoned");
        if default.is_none() {
            *default = Some(name);
        }
    }

    pub fn default_engine(&self) -> Option<String> {
        self.default_engine
            .read()
            .expect("default lock poisoned")
            .clone()
    }

    pub fn set_default(&self, name: &str) -> Result<(), ExtractorError> {
        if !self
            .engines
            .read()
            .expect("engine lock poisoned")
            .contains_key(name)
        {
            return Err(ExtractorError::EngineNotFound(name.to_string()));
        }
        *self.default_engine.write().expect("default lock poisoned") = Some(name.to_string());
        Ok(())
    }

    pub fn engines(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .engines
            .read()
            .expect("engine lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Availability report for the status endpoint.
    pub fn engine_status(&self) -> Value {
        let engines = self.engines.read().expect("engine lock poisoned");
        let mut status = serde_json::Map::new();
        for (name, engine) in engines.iter() {
            status.insert(
                name.clone(),
                json!({
                    "name": engine.name(),
                    "supported_languages": engine.supported_languages(),
                    "available": true,
                }),
            );
        }
        status.insert(
            "default_engine".to_string(),
            json!(self.default_engine()),
        );
        Value::Object(status)
    }

    /// Run the default engine.
    pub async fn process(
        &self,
        image: &[u8],
        languages: &[String],
    ) -> Result<Vec<TextPosition>, ExtractorError> {
        let engine = {
            let default = self.default_engine().ok_or(ExtractorError::NoEngines)?;
            self.get(&default)?
        };
        engine.extract(image, languages).await
    }

    /// Run a specific engine by name.
    pub async fn process_with(
        &self,
        name: &str,
        image: &[u8],
        languages: &[String],
    ) -> Result<Vec<TextPosition>, ExtractorError> {
        let engine = self.get(name)?;
        engine.extract(image, languages).await
    }

    fn get(&self, name: &str) -> Result<Arc<dyn TextExtractor>, ExtractorError> {
        self.engines
            .read()
            .expect("engine lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| ExtractorError::EngineNotFound(name.to_string()))
    }
}

/// Fixed-output extractor for tests.
#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    use super::*;

    pub struct StaticExtractor {
        name: String,
        positions: Vec<TextPosition>,
    }

    impl StaticExtractor {
        pub fn new(name: impl Into<String>, positions: Vec<TextPosition>) -> Self {
            Self {
                name: name.into(),
                positions,
            }
        }
    }

    #[async_trait]
    impl TextExtractor for StaticExtractor {
        fn name(&self) -> &str {
            &self.name
        }

        fn supported_languages(&self) -> Vec<String> {
            vec!["eng".to_string()]
        }

        async fn extract(
            &self,
            _image: &[u8],
            _languages: &[String],
        ) -> Result<Vec<TextPosition>, ExtractorError> {
            Ok(self.positions.clone())
        }
    }
}
