//! Per-run trace of orchestrator states.
//!
//! The collector is created by the caller and handed to the orchestrator, so
//! every trace is scoped to one delegation and can be inspected in tests.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::Stage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceOutcome {
    Success,
    Failed { message: String },
}

/// Timing and outcome of one state execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub session_id: String,
    pub stage: Stage,
    /// RFC 3339 start time.
    pub started_at: String,
    pub duration_ms: u64,
    pub outcome: TraceOutcome,
}

/// A state execution in progress; see [`TraceCollector::start`].
#[derive(Debug)]
pub struct StageTimer {
    stage: Stage,
    started_at: DateTime<Utc>,
    started: Instant,
}

#[derive(Debug)]
pub struct TraceCollector {
    session_id: String,
    records: Mutex<Vec<TraceRecord>>,
}

impl TraceCollector {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn start(&self, stage: Stage) -> StageTimer {
        StageTimer {
            stage,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn finish(&self, timer: StageTimer, outcome: TraceOutcome) {
        let duration_ms = u64::try_from(timer.started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.record(TraceRecord {
            session_id: self.session_id.clone(),
            stage: timer.stage,
            started_at: timer.started_at.to_rfc3339(),
            duration_ms,
            outcome,
        });
    }

    pub fn record(&self, record: TraceRecord) {
        debug!(stage = %record.stage, duration_ms = record.duration_ms, "trace record");
        self.lock().push(record);
    }

    /// Snapshot of the records so far.
    pub fn records(&self) -> Vec<TraceRecord> {
        self.lock().clone()
    }

    /// Take all records, leaving the collector empty.
    pub fn drain(&self) -> Vec<TraceRecord> {
        std::mem::take(&mut *self.lock())
    }

    /// Append the records to a JSON Lines file.
    pub fn write_jsonl(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create trace dir {}", parent.display()))?;
        }
        let mut buf = String::new();
        for record in self.lock().iter() {
            buf.push_str(&serde_json::to_string(record).context("serialize trace record")?);
            buf.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open trace {}", path.display()))?;
        file.write_all(buf.as_bytes())
            .with_context(|| format!("write trace {}", path.display()))?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TraceRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
