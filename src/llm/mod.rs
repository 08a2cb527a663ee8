//! Text-generation capability.
//!
//! Backends implement [`TextGenerator`] and return their raw, backend-shaped
//! result as JSON.  [`normalize_output`] is the one place that turns those
//! shapes into plain text, so the agent only ever sees a `String`.
//!
//! [`GenerationCapability`] is decided once at startup: a backend that fails
//! to construct leaves the capability `Unavailable` for the process lifetime.

pub mod providers;

use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::LlmConfig;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned an unusable response: {0}")]
    Response(String),
    #[error("provider panicked: {0}")]
    Panicked(String),
}

// ── Generator seam ────────────────────────────────────────────────────────────

/// Decoding parameters for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationParams {
    pub max_new_tokens: usize,
    /// Always `false` from the agent: answers must be reproducible.
    pub do_sample: bool,
}

impl GenerationParams {
    pub fn deterministic(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens,
            do_sample: false,
        }
    }
}

pub trait TextGenerator: Send + Sync {
    /// Model identifier recorded on observations.
    fn model_id(&self) -> &str;

    /// One blocking generation call.  The result shape is backend-specific.
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Value, ProviderError>;
}

/// Canonical text from a backend result.
///
/// Only an array whose first element is an object is unwrapped: that object
/// yields a non-empty string `generated_text`, else a non-empty string
/// `text`, else its JSON text.  A bare string is returned as-is; anything
/// else (including an array of strings) is the JSON text of the whole result.
pub fn normalize_output(raw: &Value) -> String {
    match raw {
        Value::Array(items) => match items.first() {
            Some(Value::Object(map)) => ["generated_text", "text"]
                .iter()
                .find_map(|field| match map.get(*field) {
                    Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
                    _ => None,
                })
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
            _ => raw.to_string(),
        },
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ── Capability handle ─────────────────────────────────────────────────────────

pub enum GenerationCapability {
    Ready(Box<dyn TextGenerator>),
    Unavailable(String),
}

impl GenerationCapability {
    /// Build the configured backend; any failure becomes `Unavailable`.
    pub fn load(config: &LlmConfig, api_key: Option<String>) -> Self {
        match providers::build(config, api_key) {
            Ok(generator) => {
                info!(
                    provider = %config.provider,
                    model = generator.model_id(),
                    device = config.device,
                    task = %config.task,
                    "generation backend ready"
                );
                Self::Ready(generator)
            }
            Err(e) => {
                warn!(
                    provider = %config.provider,
                    error = %e,
                    "generation unavailable; answering from notes only"
                );
                Self::Unavailable(e.to_string())
            }
        }
    }

    pub fn ready(generator: impl TextGenerator + 'static) -> Self {
        Self::Ready(Box::new(generator))
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn model_id(&self) -> Option<&str> {
        match self {
            Self::Ready(g) => Some(g.model_id()),
            Self::Unavailable(_) => None,
        }
    }
}

impl std::fmt::Debug for GenerationCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(g) => f.debug_tuple("Ready").field(&g.model_id()).finish(),
            Self::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
        }
    }
}
