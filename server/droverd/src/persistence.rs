//! Execution history on disk.
//!
//! One pretty-printed `<execution_id>.json` per terminal execution, written
//! atomically (temp file + rename) and immutable afterwards. The directory
//! is append-only during normal operation; the daily retention sweep is the
//! only deleter. Persistence failures are logged and never fatal, the
//! in-memory record stays authoritative.

use anyhow::{Context, Result};
use drover_protocol::ScriptExecution;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub const RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub struct ExecutionStore {
    dir: PathBuf,
}

impl ExecutionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %err, "Failed to create executions directory");
        }
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, execution_id: &str) -> PathBuf {
        self.dir.join(format!("{execution_id}.json"))
    }

    /// Write one terminal record atomically.
    pub async fn save(&self, execution: &ScriptExecution) -> Result<()> {
        let path = self.path_for(&execution.id);
        let tmp = self.dir.join(format!("{}.json.tmp", execution.id));

        let payload = serde_json::to_vec_pretty(execution)
            .context("Failed to serialize execution record")?;
        tokio::fs::write(&tmp, payload)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move record into place at {}", path.display()))?;

        debug!(execution_id = %execution.id, path = %path.display(), "Execution persisted");
        Ok(())
    }

    /// Read every record in the directory; corrupt files are logged and
    /// skipped.
    pub async fn load_all(&self) -> Vec<ScriptExecution> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "Failed to read executions directory");
                return records;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let raw = match tokio::fs::read(&path).await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to read execution file");
                    continue;
                }
            };
            match serde_json::from_slice::<ScriptExecution>(&raw) {
                Ok(execution) => records.push(execution),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Skipping corrupt execution file");
                }
            }
        }

        info!(count = records.len(), dir = %self.dir.display(), "Loaded execution history");
        records
    }

    /// Delete records whose file modification time is older than `max_age`.
    /// Returns the evicted execution ids so the caller can drop them from
    /// the live map too.
    pub async fn sweep_older_than(&self, max_age: Duration) -> Vec<String> {
        let cutoff = SystemTime::now() - max_age;
        let mut removed = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) => {
                warn!(dir = %self.dir.display(), error = %err, "Failed to read executions directory for sweep");
                return removed;
            }
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            if modified >= cutoff {
                continue;
            }

            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    info!(path = %path.display(), "Removed expired execution record");
                    removed.push(stem.to_string());
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "Failed to remove expired record");
                }
            }
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use drover_protocol::{ExecutionStatus, ScriptRequest, ScriptResult};
    use serde_json::Map;

    fn terminal_execution(id_suffix: i64) -> ScriptExecution {
        let request = ScriptRequest {
            device_id: "SN1".to_string(),
            script_name: "wait".to_string(),
            variables: Map::new(),
        };
        let mut execution = ScriptExecution::new(&request, Utc::now());
        execution.id = format!("SN1_wait_{id_suffix}");
        execution.status = ExecutionStatus::Completed;
        execution.end_time = Some(execution.start_time);
        execution.result = Some(ScriptResult::ok("Waited for 2 seconds"));
        execution
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExecutionStore::new(dir.path());

        let execution = terminal_execution(1);
        store.save(&execution).await.unwrap();

        // No temp files are left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let loaded = store.load_all().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, execution.id);
        assert_eq!(loaded[0].status, ExecutionStatus::Completed);
        assert_eq!(
            loaded[0].result.as_ref().unwrap().message,
            "Waited for 2 seconds"
        );
    }

    #[tokio::test]
    async fn corrupt_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExecutionStore::new(dir.path());

        store.save(&terminal_execution(1)).await.unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let loaded = store.load_all().await;
        assert_eq!(loaded.len(), 1);
    }

    #[tokio::test]
    async fn sweep_removes_only_old_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ExecutionStore::new(dir.path());

        store.save(&terminal_execution(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Nothing is younger than 1 hour, so nothing goes.
        let removed = store.sweep_older_than(Duration::from_secs(3600)).await;
        assert!(removed.is_empty());

        // Everything is older than 10ms by now.
        let removed = store.sweep_older_than(Duration::from_millis(10)).await;
        assert_eq!(removed, vec!["SN1_wait_1".to_string()]);
        assert!(store.load_all().await.is_empty());
    }
}
