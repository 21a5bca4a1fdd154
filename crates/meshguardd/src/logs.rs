//! Append-only persistence for failure injections and pipeline events.
//!
//! Two sinks: a CSV failure log matching the operator tooling's expected
//! column layout, and a JSONL event log for health sweeps and handled
//! incidents. Both serialize writers behind a mutex so concurrent loops
//! never interleave partial lines.

use anyhow::{Context, Result};
use chrono::Utc;
use meshguard_common::{FailureLogEntry, Incident, StatusSnapshot};
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// CSV log of every injection and recovery.
pub struct FailureLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FailureLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry, writing the header first when the file is new.
    pub async fn append(&self, entry: &FailureLogEntry) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let needs_header = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open failure log {}", self.path.display()))?;

        let mut line = String::new();
        if needs_header {
            line.push_str(FailureLogEntry::CSV_HEADER);
            line.push('\n');
        }
        line.push_str(&entry.to_csv_line());
        line.push('\n');

        file.write_all(line.as_bytes())
            .await
            .context("Failed to write failure log entry")?;
        file.flush()
            .await
            .context("Failed to flush failure log entry")?;
        Ok(())
    }

    /// Return up to `limit` most recent entries, oldest first. Lines that no
    /// longer parse (hand-edited logs) are skipped.
    pub async fn tail(&self, limit: usize) -> Result<Vec<FailureLogEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read failure log {}", self.path.display())
                })
            }
        };

        let entries: Vec<FailureLogEntry> = content
            .lines()
            .skip(1)
            .filter_map(FailureLogEntry::parse_csv_line)
            .collect();

        let start = entries.len().saturating_sub(limit);
        Ok(entries[start..].to_vec())
    }
}

/// JSONL log of health sweeps and handled incidents.
pub struct EventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    async fn append_line(&self, value: &serde_json::Value) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open event log {}", self.path.display()))?;

        let mut line = serde_json::to_string(value).context("Failed to serialize event")?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .await
            .context("Failed to write event log entry")?;
        file.flush()
            .await
            .context("Failed to flush event log entry")?;
        Ok(())
    }

    /// Record the result of one health sweep.
    pub async fn append_health(&self, snapshot: &StatusSnapshot) -> Result<()> {
        self.append_line(&json!({
            "event": "health_sweep",
            "timestamp": Utc::now(),
            "services": snapshot,
        }))
        .await
    }

    /// Record a fully handled (or failed) incident.
    pub async fn append_incident(&self, incident: &Incident) -> Result<()> {
        self.append_line(&json!({
            "event": "incident_handled",
            "timestamp": Utc::now(),
            "incident": incident,
        }))
        .await
    }
}
