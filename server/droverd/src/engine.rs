//! Execution lifecycle engine.
//!
//! One `ScriptEngine` per process (cheaply clonable; clones share state).
//! It validates requests, creates the execution record, runs the script on
//! its own task (panic-isolated), and routes every incoming device response
//! to the owning execution's correlator by execution-id prefix. Transitions
//! into a terminal state are one-way; the terminal record is persisted and
//! the response sink torn down, after which late responses for that
//! execution are logged and dropped.

use chrono::Utc;
use drover_broker::{CommandPublisher, ResponseHandler};
use drover_ocr::ExtractorManager;
use drover_protocol::{
    ExecutionStatus, Response, ScriptExecution, ScriptRequest, ScriptResponse, ScriptResult,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::catalog::ScriptCatalog;
use crate::context::{CancelToken, ScriptContext};
use crate::correlator::Correlator;
use crate::error::EngineError;
use crate::facade::MqttDeviceClient;
use crate::persistence::{ExecutionStore, RETENTION};

const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
pub struct ScriptEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    publisher: Arc<dyn CommandPublisher>,
    catalog: Arc<ScriptCatalog>,
    ocr: Arc<ExtractorManager>,
    store: ExecutionStore,
    /// Live map: running executions plus terminal records until eviction.
    executions: RwLock<HashMap<String, ScriptExecution>>,
    /// Response sink per live execution; torn down on terminal transition.
    sinks: RwLock<HashMap<String, Arc<Correlator>>>,
    tokens: Mutex<HashMap<String, Arc<CancelToken>>>,
}

impl ScriptEngine {
    pub fn new(
        publisher: Arc<dyn CommandPublisher>,
        catalog: Arc<ScriptCatalog>,
        ocr: Arc<ExtractorManager>,
        store: ExecutionStore,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                publisher,
                catalog,
                ocr,
                store,
                executions: RwLock::new(HashMap::new()),
                sinks: RwLock::new(HashMap::new()),
                tokens: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Install persisted history into the live map. Called once at startup.
    pub async fn load_history(&self) -> usize {
        let records = self.inner.store.load_all().await;
        let count = records.len();
        let mut executions = self
            .inner
            .executions
            .write()
            .expect("executions lock poisoned");
        for record in records {
            executions.entry(record.id.clone()).or_insert(record);
        }
        count
    }

    /// Validate and launch one script run; returns immediately with the
    /// running record's coordinates.
    pub async fn execute(&self, request: ScriptRequest) -> Result<ScriptResponse, EngineError> {
        if request.device_id.is_empty() {
            return Err(EngineError::MissingDevice);
        }
        if request.script_name.is_empty() {
            return Err(EngineError::MissingScript);
        }
        if !self.inner.catalog.contains(&request.script_name) {
            return Err(EngineError::UnknownScript(request.script_name));
        }

        let start_time = Utc::now();
        let execution = ScriptExecution::new(&request, start_time);
        let execution_id = execution.id.clone();

        let correlator = Arc::new(Correlator::new());
        let cancel = Arc::new(CancelToken::new());

        {
            let mut executions = self
                .inner
                .executions
                .write()
                .expect("executions lock poisoned");
            if let Some(existing) = executions.get(&execution_id) {
                if existing.status == ExecutionStatus::Running {
                    return Err(EngineError::ExecutionCollision(execution_id));
                }
            }
            executions.insert(execution_id.clone(), execution);

            self.inner
                .sinks
                .write()
                .expect("sinks lock poisoned")
                .insert(execution_id.clone(), Arc::clone(&correlator));
            self.inner
                .tokens
                .lock()
                .expect("tokens lock poisoned")
                .insert(execution_id.clone(), Arc::clone(&cancel));
        }

        let client = Arc::new(MqttDeviceClient::new(
            request.device_id.clone(),
            execution_id.clone(),
            Arc::clone(&self.inner.publisher),
            correlator,
            Arc::clone(&cancel),
        ));
        let ctx = ScriptContext::new(
            request.device_id,
            execution_id.clone(),
            request.variables,
            client,
            Arc::clone(&self.inner.ocr),
            cancel,
        );

        info!(
            execution_id = %execution_id,
            script = %request.script_name,
            "Script execution started"
        );

        let engine = self.clone();
        let script_name = request.script_name;
        let task_execution_id = execution_id.clone();
        tokio::spawn(async move {
            engine.run_script(task_execution_id, script_name, ctx).await;
        });

        Ok(ScriptResponse {
            execution_id,
            status: ExecutionStatus::Running,
            message: "Script execution started".to_string(),
            start_time,
        })
    }

    /// Drive one script to its terminal state. Runs on the execution's own
    /// task; the inner spawn isolates script panics.
    async fn run_script(&self, execution_id: String, script_name: String, ctx: ScriptContext) {
        let started = std::time::Instant::now();
        let catalog = Arc::clone(&self.inner.catalog);
        let params = ctx.variables.clone();

        let handle =
            tokio::spawn(async move { catalog.execute(&script_name, &ctx, &params).await });

        let result = match handle.await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                ScriptResult::failure(format!("Execution error: {err}")).with_error(err.to_string())
            }
            Err(join_err) if join_err.is_panic() => {
                let panic_text = panic_message(join_err.into_panic());
                error!(
                    execution_id = %execution_id,
                    panic = %panic_text,
                    "Script panicked"
                );
                ScriptResult::failure(format!("Script panic: {panic_text}")).with_error(panic_text)
            }
            Err(_) => ScriptResult::failure("Script task was aborted"),
        };

        let duration_ms = started.elapsed().as_millis() as i64;
        self.finish(&execution_id, result.with_duration(duration_ms))
            .await;
    }

    /// Terminal transition for a finished script. Guarded: if the execution
    /// was cancelled while the script ran, the cancelled status stands.
    async fn finish(&self, execution_id: &str, result: ScriptResult) {
        let (record, transitioned) = {
            let mut executions = self
                .inner
                .executions
                .write()
                .expect("executions lock poisoned");
            let Some(execution) = executions.get_mut(execution_id) else {
                warn!(execution_id = %execution_id, "Finished execution is unknown");
                return;
            };

            let transitioned = execution.status == ExecutionStatus::Running;
            if transitioned {
                execution.status = if result.success {
                    ExecutionStatus::Completed
                } else {
                    ExecutionStatus::Failed
                };
                execution.end_time = Some(Utc::now());
                execution.result = Some(result);
            }
            (execution.clone(), transitioned)
        };

        self.teardown_sink(execution_id);

        info!(
            execution_id = %execution_id,
            status = record.status.as_str(),
            duration_ms = record.duration_ms(),
            "Script execution finished"
        );

        // A record that went terminal through cancel() is already on disk;
        // persisted files are immutable.
        if transitioned {
            if let Err(err) = self.inner.store.save(&record).await {
                warn!(execution_id = %execution_id, error = %err, "Failed to persist execution");
            }
        }
    }

    fn teardown_sink(&self, execution_id: &str) {
        self.inner
            .sinks
            .write()
            .expect("sinks lock poisoned")
            .remove(execution_id);
        self.inner
            .tokens
            .lock()
            .expect("tokens lock poisoned")
            .remove(execution_id);
    }

    pub fn get_status(&self, execution_id: &str) -> Option<ScriptExecution> {
        self.inner
            .executions
            .read()
            .expect("executions lock poisoned")
            .get(execution_id)
            .cloned()
    }

    /// Every in-memory record, newest first.
    pub fn list(&self) -> Vec<ScriptExecution> {
        let mut executions: Vec<ScriptExecution> = self
            .inner
            .executions
            .read()
            .expect("executions lock poisoned")
            .values()
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        executions
    }

    /// Terminal records only, newest first, capped at `limit`.
    pub fn history(&self, limit: usize) -> Vec<ScriptExecution> {
        let mut terminal: Vec<ScriptExecution> = self
            .inner
            .executions
            .read()
            .expect("executions lock poisoned")
            .values()
            .filter(|execution| execution.status.is_terminal())
            .cloned()
            .collect();
        terminal.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        if limit > 0 {
            terminal.truncate(limit);
        }
        terminal
    }

    /// Cancel a running execution. Idempotent: terminal records are left
    /// untouched, including their status and end time.
    pub async fn cancel(&self, execution_id: &str) -> Result<(), EngineError> {
        let record = {
            let mut executions = self
                .inner
                .executions
                .write()
                .expect("executions lock poisoned");
            let Some(execution) = executions.get_mut(execution_id) else {
                return Err(EngineError::ExecutionNotFound(execution_id.to_string()));
            };

            if execution.status != ExecutionStatus::Running {
                return Ok(());
            }

            execution.status = ExecutionStatus::Cancelled;
            execution.end_time = Some(Utc::now());
            execution.result = Some(ScriptResult::failure("Execution cancelled by user"));
            execution.clone()
        };

        if let Some(token) = self
            .inner
            .tokens
            .lock()
            .expect("tokens lock poisoned")
            .get(execution_id)
            .cloned()
        {
            token.fire();
        }
        self.teardown_sink(execution_id);

        info!(execution_id = %execution_id, "Execution cancelled");
        if let Err(err) = self.inner.store.save(&record).await {
            warn!(execution_id = %execution_id, error = %err, "Failed to persist cancelled execution");
        }
        Ok(())
    }

    /// Evict terminal in-memory records older than `max_age_hours`.
    pub fn cleanup(&self, max_age_hours: i64) -> usize {
        let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours.max(0));
        let mut executions = self
            .inner
            .executions
            .write()
            .expect("executions lock poisoned");
        let before = executions.len();
        executions.retain(|_, execution| {
            execution.status == ExecutionStatus::Running || execution.start_time >= cutoff
        });
        let cleaned = before - executions.len();
        info!(cleaned, max_age_hours, "Cleaned up old executions");
        cleaned
    }

    pub fn counts(&self) -> (usize, usize) {
        let executions = self
            .inner
            .executions
            .read()
            .expect("executions lock poisoned");
        let running = executions
            .values()
            .filter(|execution| execution.status == ExecutionStatus::Running)
            .count();
        (executions.len(), running)
    }

    pub fn catalog(&self) -> &ScriptCatalog {
        &self.inner.catalog
    }

    /// Daily retention sweep: remove expired files and evict the same ids
    /// from the live map.
    pub fn start_retention_sweep(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup is quiet.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = engine.inner.store.sweep_older_than(RETENTION).await;
                if !removed.is_empty() {
                    let mut executions = engine
                        .inner
                        .executions
                        .write()
                        .expect("executions lock poisoned");
                    for id in &removed {
                        executions.remove(id);
                    }
                    info!(count = removed.len(), "Retention sweep evicted records");
                }
            }
        });
    }
}

impl ResponseHandler for ScriptEngine {
    /// Route a device response to the owning execution's sink by
    /// execution-id prefix. The correlator does the exact command-id match;
    /// unmatched responses are logged and dropped.
    fn handle_response(&self, response: Response) {
        let sink = {
            let sinks = self.inner.sinks.read().expect("sinks lock poisoned");
            sinks
                .iter()
                .find(|(execution_id, _)| {
                    response.id.starts_with(execution_id.as_str())
                        && response.id.as_bytes().get(execution_id.len()) == Some(&b'_')
                })
                .map(|(execution_id, sink)| (execution_id.clone(), Arc::clone(sink)))
        };

        match sink {
            Some((execution_id, correlator)) => {
                if !correlator.deliver(response) {
                    warn!(execution_id = %execution_id, "Response had no waiter");
                }
            }
            None => {
                warn!(response_id = %response.id, "No live execution for response, dropping");
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
