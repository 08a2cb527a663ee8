//! Observability sink for query and generation observations.
//!
//! The agent receives an [`ObservationSink`] at construction instead of
//! reaching for a process-wide client, so tests can inject a recording or
//! failing sink.  Work is wrapped in an [`ObservationScope`], which closes
//! its observation in `Drop` on every exit path.
//!
//! [`TracingSink`] is the production sink: each closed observation is
//! emitted as a `tracing` event and buffered; [`ObservationSink::flush`]
//! appends the buffer to an optional JSON-lines export file.  The buffer
//! never holds more than `flush_at` records: with an export file it is
//! flushed when it fills, without one the oldest records are dropped.

use std::collections::{HashMap, VecDeque};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub type ObservationId = u64;

/// Default buffer bound for [`TracingSink`].
pub const DEFAULT_FLUSH_AT: usize = 100;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry sink is shut down")]
    Closed,
    #[error("unknown observation id {0}")]
    UnknownObservation(ObservationId),
    #[error("telemetry state lock poisoned")]
    Poisoned,
    #[error("telemetry export failed: {0}")]
    Export(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationKind {
    Span,
    Generation,
}

/// One observation as recorded by [`TracingSink`].
#[derive(Debug, Clone, Serialize)]
pub struct ObservationRecord {
    pub id: ObservationId,
    pub name: String,
    pub kind: ObservationKind,
    pub input: Option<Value>,
    pub metadata: Value,
    pub output: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

pub trait ObservationSink: Send + Sync {
    fn open(
        &self,
        name: &str,
        kind: ObservationKind,
        input: Option<Value>,
        metadata: Value,
    ) -> Result<ObservationId, TelemetryError>;

    /// Set the output of a still-open observation.
    fn update(&self, id: ObservationId, output: Option<Value>) -> Result<(), TelemetryError>;

    fn close(&self, id: ObservationId) -> Result<(), TelemetryError>;

    /// Deliver buffered observations.
    fn flush(&self) -> Result<(), TelemetryError>;

    /// Flush, then refuse new observations.
    fn shutdown(&self) -> Result<(), TelemetryError>;
}

// ── Scope guard ───────────────────────────────────────────────────────────────

/// Open observation that is closed when the guard is dropped.
pub struct ObservationScope<'a> {
    sink: &'a dyn ObservationSink,
    id: ObservationId,
}

impl<'a> ObservationScope<'a> {
    pub fn open(
        sink: &'a dyn ObservationSink,
        name: &str,
        kind: ObservationKind,
        input: Option<Value>,
        metadata: Value,
    ) -> Result<Self, TelemetryError> {
        let id = sink.open(name, kind, input, metadata)?;
        Ok(Self { sink, id })
    }

    pub fn id(&self) -> ObservationId {
        self.id
    }

    pub fn update(&self, output: Option<Value>) -> Result<(), TelemetryError> {
        self.sink.update(self.id, output)
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.sink.close(self.id) {
            debug!(id = self.id, error = %e, "failed to close observation");
        }
    }
}

// ── Sinks ─────────────────────────────────────────────────────────────────────

/// Sink used when telemetry is disabled.
#[derive(Debug, Default)]
pub struct NoopSink;

impl ObservationSink for NoopSink {
    fn open(
        &self,
        _: &str,
        _: ObservationKind,
        _: Option<Value>,
        _: Value,
    ) -> Result<ObservationId, TelemetryError> {
        Ok(0)
    }
    fn update(&self, _: ObservationId, _: Option<Value>) -> Result<(), TelemetryError> {
        Ok(())
    }
    fn close(&self, _: ObservationId) -> Result<(), TelemetryError> {
        Ok(())
    }
    fn flush(&self) -> Result<(), TelemetryError> {
        Ok(())
    }
    fn shutdown(&self) -> Result<(), TelemetryError> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SinkState {
    next_id: ObservationId,
    open: HashMap<ObservationId, ObservationRecord>,
    /// Closed, not yet flushed.  Oldest first.
    buffer: VecDeque<ObservationRecord>,
    shut_down: bool,
}

#[derive(Debug)]
pub struct TracingSink {
    export_path: Option<PathBuf>,
    flush_at: usize,
    state: Mutex<SinkState>,
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new(None)
    }
}

impl TracingSink {
    pub fn new(export_path: Option<PathBuf>) -> Self {
        Self {
            export_path,
            flush_at: DEFAULT_FLUSH_AT,
            state: Mutex::new(SinkState::default()),
        }
    }

    /// Bound the buffer to `flush_at` records (at least one).
    pub fn with_flush_at(mut self, flush_at: usize) -> Self {
        self.flush_at = flush_at.max(1);
        self
    }

    /// Closed observations awaiting flush, oldest first.
    pub fn buffered(&self) -> Vec<ObservationRecord> {
        self.state
            .lock()
            .map(|s| s.buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop the oldest records beyond `flush_at`.
    fn trim(&self, buffer: &mut VecDeque<ObservationRecord>) {
        let excess = buffer.len().saturating_sub(self.flush_at);
        if excess > 0 {
            buffer.drain(..excess);
            debug!(dropped = excess, "observation buffer full; oldest records dropped");
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SinkState>, TelemetryError> {
        self.state.lock().map_err(|_| TelemetryError::Poisoned)
    }

    fn export(&self, records: &VecDeque<ObservationRecord>) -> Result<(), TelemetryError> {
        let Some(path) = &self.export_path else {
            return Ok(());
        };
        if records.is_empty() {
            return Ok(());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| TelemetryError::Export(format!("{}: {e}", parent.display())))?;
        }
        let mut out = String::new();
        for r in records {
            let line = serde_json::to_string(r)
                .map_err(|e| TelemetryError::Export(format!("serialise observation: {e}")))?;
            out.push_str(&line);
            out.push('\n');
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| f.write_all(out.as_bytes()))
            .map_err(|e| TelemetryError::Export(format!("{}: {e}", path.display())))
    }
}

impl ObservationSink for TracingSink {
    fn open(
        &self,
        name: &str,
        kind: ObservationKind,
        input: Option<Value>,
        metadata: Value,
    ) -> Result<ObservationId, TelemetryError> {
        let mut state = self.lock()?;
        if state.shut_down {
            return Err(TelemetryError::Closed);
        }
        state.next_id += 1;
        let id = state.next_id;
        state.open.insert(
            id,
            ObservationRecord {
                id,
                name: name.to_string(),
                kind,
                input,
                metadata,
                output: None,
                started_at: Utc::now(),
                ended_at: None,
            },
        );
        debug!(id, observation = name, ?kind, "observation opened");
        Ok(id)
    }

    fn update(&self, id: ObservationId, output: Option<Value>) -> Result<(), TelemetryError> {
        let mut state = self.lock()?;
        let record = state
            .open
            .get_mut(&id)
            .ok_or(TelemetryError::UnknownObservation(id))?;
        record.output = output;
        Ok(())
    }

    fn close(&self, id: ObservationId) -> Result<(), TelemetryError> {
        let mut state = self.lock()?;
        let mut record = state
            .open
            .remove(&id)
            .ok_or(TelemetryError::UnknownObservation(id))?;
        let ended = Utc::now();
        record.ended_at = Some(ended);
        info!(
            id,
            observation = %record.name,
            kind = ?record.kind,
            duration_ms = (ended - record.started_at).num_milliseconds(),
            metadata = %record.metadata,
            "observation closed"
        );
        state.buffer.push_back(record);
        if state.buffer.len() < self.flush_at {
            return Ok(());
        }
        if self.export_path.is_none() {
            self.trim(&mut state.buffer);
            return Ok(());
        }
        drop(state);
        if let Err(e) = self.flush() {
            warn!(error = %e, "automatic observation flush failed");
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), TelemetryError> {
        let records = std::mem::take(&mut self.lock()?.buffer);
        let count = records.len();
        if let Err(e) = self.export(&records) {
            // Put them back so a later flush can retry.
            let mut state = self.lock()?;
            let newer = std::mem::replace(&mut state.buffer, records);
            state.buffer.extend(newer);
            self.trim(&mut state.buffer);
            return Err(e);
        }
        debug!(count, "observations flushed");
        Ok(())
    }

    fn shutdown(&self) -> Result<(), TelemetryError> {
        self.lock()?.shut_down = true;
        self.flush()
    }
}
