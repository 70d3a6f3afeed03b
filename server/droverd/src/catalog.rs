//! Script catalog: named script functions plus their parameter descriptors.
//!
//! Registration happens at process initialization; the catalog is
//! effectively read-only afterwards but stays behind a read-write lock so
//! dynamic registration remains possible.

use async_trait::async_trait;
use drover_protocol::ScriptResult;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{error, info};

use crate::context::ScriptContext;
use crate::error::EngineError;

/// Human-facing description served by `scripts/info`.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptDescriptor {
    pub name: String,
    pub description: String,
    /// Parameter name → human-readable description.
    pub parameters: BTreeMap<String, String>,
}

impl ScriptDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), description.into());
        self
    }
}

/// A registered script: a named function composing device primitives.
#[async_trait]
pub trait Script: Send + Sync {
    fn descriptor(&self) -> ScriptDescriptor;

    async fn run(&self, ctx: &ScriptContext, params: &Map<String, Value>) -> ScriptResult;
}

#[derive(Default)]
pub struct ScriptCatalog {
    scripts: RwLock<HashMap<String, Arc<dyn Script>>>,
}

impl ScriptCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with every built-in script.
    pub fn with_builtin_scripts() -> Self {
        let catalog = Self::new();
        crate::scripts::register_builtin(&catalog);
        catalog
    }

    pub fn register(&self, script: Arc<dyn Script>) {
        let name = script.descriptor().name;
        self.scripts
            .write()
            .expect("catalog lock poisoned")
            .insert(name, script);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts
            .read()
            .expect("catalog lock poisoned")
            .contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Script>> {
        self.scripts
            .read()
            .expect("catalog lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .scripts
            .read()
            .expect("catalog lock poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.scripts.read().expect("catalog lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn descriptors(&self) -> Vec<ScriptDescriptor> {
        let mut descriptors: Vec<ScriptDescriptor> = self
            .scripts
            .read()
            .expect("catalog lock poisoned")
            .values()
            .map(|script| script.descriptor())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Run a script by name. The lock is released before the script runs.
    pub async fn execute(
        &self,
        name: &str,
        ctx: &ScriptContext,
        params: &Map<String, Value>,
    ) -> Result<ScriptResult, EngineError> {
        let script = self
            .get(name)
            .ok_or_else(|| EngineError::UnknownScript(name.to_string()))?;

        info!(
            script = %name,
            execution_id = %ctx.execution_id,
            device_id = %ctx.device_id,
            "Executing script"
        );
        let result = script.run(ctx, params).await;

        if result.success {
            info!(
                script = %name,
                execution_id = %ctx.execution_id,
                message = %result.message,
                "Script completed"
            );
        } else {
            error!(
                script = %name,
                execution_id = %ctx.execution_id,
                message = %result.message,
                error = result.error.as_deref().unwrap_or(""),
                "Script failed"
            );
        }

        Ok(result)
    }
}
