//! `NotesAgent`: note management plus question answering.
//!
//! Answer resolution:
//!
//! ```text
//! query ─┬─ no notes ─────────────────────────────────────────► NoNotes
//!        └─ compose prompt ─┬─ capability Unavailable ────────► FallbackAnswered
//!                           └─ GenerationAttempt ─┬─ ok ──────► GenerationSucceeded
//!                                                 └─ error ───► GenerationFailed
//!                                                                 └─► FallbackAnswered
//! ```
//!
//! Nothing here returns an error to the caller of `query` or the note
//! mutators; failures end in a fallback answer, a `bool`, or a log line.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error};

use crate::config::Config;
use crate::llm::{
    GenerationCapability, GenerationParams, ProviderError, TextGenerator, normalize_output,
};
use crate::notes::{NoteStore, Notes, StoreError, context, fallback};
use crate::telemetry::{NoopSink, ObservationKind, ObservationScope, ObservationSink, TracingSink};

pub const NO_NOTES_MESSAGE: &str = "You have no notes yet.";
pub const DEFAULT_MAX_NEW_TOKENS: usize = 150;

const QUERY_OBSERVATION: &str = "notes-agent.query";
const GENERATION_OBSERVATION: &str = "notes-agent.model-generation";
const ERROR_OBSERVATION: &str = "notes-agent.query-error";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    NoNotes,
    GenerationAttempt,
    GenerationSucceeded,
    GenerationFailed,
    FallbackAnswered,
}

/// Answer text plus the states the query passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub path: Vec<QueryState>,
}

impl Answer {
    fn new(text: impl Into<String>, path: &[QueryState]) -> Self {
        Self {
            text: text.into(),
            path: path.to_vec(),
        }
    }

    /// Terminal state.
    pub fn state(&self) -> QueryState {
        self.path.last().copied().unwrap_or(QueryState::NoNotes)
    }

    pub fn used_fallback(&self) -> bool {
        self.state() == QueryState::FallbackAnswered
    }
}

pub struct NotesAgent {
    store: NoteStore,
    generation: GenerationCapability,
    telemetry: Arc<dyn ObservationSink>,
    max_context_chars: Option<usize>,
}

impl NotesAgent {
    pub fn new(
        store: NoteStore,
        generation: GenerationCapability,
        telemetry: Arc<dyn ObservationSink>,
    ) -> Self {
        Self {
            store,
            generation,
            telemetry,
            max_context_chars: None,
        }
    }

    /// Wire up store, backend and sink from resolved config.
    pub fn from_config(config: &Config) -> Self {
        let store = match &config.persist_path {
            Some(path) => NoteStore::open(path),
            None => NoteStore::in_memory(),
        };
        debug!(notes = store.len(), path = ?store.path(), "note store ready");
        let generation = GenerationCapability::load(&config.llm, config.llm_api_key.clone());
        let telemetry: Arc<dyn ObservationSink> = if config.telemetry.enabled {
            Arc::new(
                TracingSink::new(config.telemetry.export_path.clone())
                    .with_flush_at(config.telemetry.flush_at),
            )
        } else {
            Arc::new(NoopSink)
        };
        Self::new(store, generation, telemetry).with_context_limit(config.max_context_chars)
    }

    /// Bound the prompt context to `max_chars` (sum of note line lengths).
    pub fn with_context_limit(mut self, max_chars: Option<usize>) -> Self {
        self.max_context_chars = max_chars;
        self
    }

    pub fn telemetry(&self) -> &Arc<dyn ObservationSink> {
        &self.telemetry
    }

    pub fn generation(&self) -> &GenerationCapability {
        &self.generation
    }

    // ── Notes ─────────────────────────────────────────────────────────

    pub fn list_notes(&self) -> Notes {
        self.store.list()
    }

    pub fn get_note(&self, key: &str) -> Option<&str> {
        self.store.get(key)
    }

    /// Notes file, or `None` for an in-memory store.
    pub fn notes_path(&self) -> Option<&Path> {
        self.store.path()
    }

    pub fn add_note(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.store.add(key, text);
    }

    pub fn update_note(&mut self, key: &str, text: impl Into<String>) -> bool {
        self.store.update(key, text)
    }

    pub fn remove_note(&mut self, key: &str) -> bool {
        self.store.remove(key)
    }

    /// Explicit save; unlike autosave, write failures are returned.
    pub fn save_notes(&self) -> Result<(), StoreError> {
        self.store.persist()
    }

    /// Re-read the notes file, replacing the in-memory notes on success.
    pub fn reload_notes(&mut self) -> Result<usize, StoreError> {
        self.store.reload()
    }

    // ── Questions ─────────────────────────────────────────────────────

    pub fn query(&self, question: &str, max_new_tokens: usize) -> String {
        self.query_detailed(question, max_new_tokens).text
    }

    pub fn query_detailed(&self, question: &str, max_new_tokens: usize) -> Answer {
        let scope = ObservationScope::open(
            self.telemetry.as_ref(),
            QUERY_OBSERVATION,
            ObservationKind::Span,
            Some(json!({ "question": question })),
            json!({}),
        )
        .inspect_err(|e| debug!(error = %e, "query observation not recorded"))
        .ok();

        let answer = self.resolve(question, max_new_tokens);
        debug!(path = ?answer.path, "query resolved");

        if let Some(scope) = &scope {
            let output = json!({ "answer": answer.text, "state": format!("{:?}", answer.state()) });
            if let Err(e) = scope.update(Some(output)) {
                debug!(error = %e, "query observation output dropped");
            }
        }
        answer
    }

    fn resolve(&self, question: &str, max_new_tokens: usize) -> Answer {
        use QueryState::*;

        if self.store.is_empty() {
            return Answer::new(NO_NOTES_MESSAGE, &[NoNotes]);
        }

        let prompt = context::compose(question, self.store.notes(), self.max_context_chars);

        let generator = match &self.generation {
            GenerationCapability::Ready(g) => g.as_ref(),
            GenerationCapability::Unavailable(reason) => {
                debug!(reason = %reason, "generation unavailable; using keyword fallback");
                return Answer::new(self.fallback(question), &[FallbackAnswered]);
            }
        };

        match self.generate(generator, &prompt, max_new_tokens) {
            Ok(text) => Answer::new(text, &[GenerationAttempt, GenerationSucceeded]),
            Err(e) => {
                error!(
                    model = generator.model_id(),
                    error = %e,
                    detail = ?e,
                    "generation failed; using keyword fallback"
                );
                self.report_generation_error(&e);
                Answer::new(
                    self.fallback(question),
                    &[GenerationAttempt, GenerationFailed, FallbackAnswered],
                )
            }
        }
    }

    fn generate(
        &self,
        generator: &dyn TextGenerator,
        prompt: &str,
        max_new_tokens: usize,
    ) -> Result<String, ProviderError> {
        let scope = ObservationScope::open(
            self.telemetry.as_ref(),
            GENERATION_OBSERVATION,
            ObservationKind::Generation,
            Some(json!({ "prompt": prompt })),
            json!({
                "model": generator.model_id(),
                "generation_start_time": Utc::now().to_rfc3339(),
                "max_new_tokens": max_new_tokens,
            }),
        )
        .inspect_err(|e| debug!(error = %e, "generation observation not recorded"))
        .ok();

        let params = GenerationParams::deterministic(max_new_tokens);
        let raw = panic::catch_unwind(AssertUnwindSafe(|| generator.generate(prompt, &params)))
            .map_err(|payload| ProviderError::Panicked(panic_message(payload.as_ref())))??;
        let text = normalize_output(&raw);

        if let Some(scope) = &scope {
            if let Err(e) = scope.update(Some(json!({ "text": text }))) {
                debug!(error = %e, "generation observation output dropped");
            }
        }
        Ok(text.trim().to_string())
    }

    /// Best-effort error observation; its own failure is only logged.
    fn report_generation_error(&self, err: &ProviderError) {
        let reported = ObservationScope::open(
            self.telemetry.as_ref(),
            ERROR_OBSERVATION,
            ObservationKind::Span,
            None,
            json!({ "error": err.to_string() }),
        )
        .and_then(|scope| scope.update(None));
        if let Err(e) = reported {
            debug!(error = %e, "generation error not reported to telemetry");
        }
    }

    fn fallback(&self, question: &str) -> String {
        fallback::resolve(question, self.store.notes())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
