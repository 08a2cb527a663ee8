//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory
//! when it exists (built-in defaults otherwise), then applies `MODEL_NAME`,
//! `PERSIST_PATH`, `NOTES_LOG_LEVEL` and `NOTES_LLM_PROVIDER` overrides.
//! `LLM_API_KEY` is only ever read from the environment.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// OpenAI-compatible HTTP backend configuration (`[llm.openai]`).
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// Base URL up to and including `/v1`; endpoint paths are appended.
    pub api_base_url: String,
    /// Per-request HTTP timeout in seconds.
    pub timeout_seconds: u64,
    /// Probe the endpoint once at startup; failure marks generation unavailable.
    pub probe_on_load: bool,
}

/// Generation backend configuration (`[llm]`).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Active backend: `"openai"`, `"dummy"` or `"none"`.
    pub provider: String,
    /// Model identifier passed to the backend and recorded on observations.
    pub model: Option<String>,
    /// Compute device selector (`-1` = CPU). Logged at startup; HTTP servers pick their own device.
    pub device: i32,
    /// `"text-generation"` or `"chat-completion"`.
    pub task: String,
    pub openai: OpenAiConfig,
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// JSON-lines file that buffered observations are appended to on flush.
    pub export_path: Option<PathBuf>,
    /// Buffered observations before an automatic flush (or, with no export
    /// file, before the oldest are dropped).
    pub flush_at: usize,
}

/// Fully-resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Append log output here instead of stderr.
    pub log_file: Option<PathBuf>,
    /// Notes file (already expanded, no `~`).  `None` keeps notes in memory.
    pub persist_path: Option<PathBuf>,
    pub max_new_tokens: usize,
    /// Optional character bound applied when composing the prompt context.
    pub max_context_chars: Option<usize>,
    pub llm: LlmConfig,
    /// API key from `LLM_API_KEY` env var; `None` for keyless local servers.
    pub llm_api_key: Option<String>,
    pub telemetry: TelemetryConfig,
}

/// Env-sourced overrides, split out so tests can pass them explicitly.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub model_name: Option<String>,
    pub persist_path: Option<String>,
    pub log_level: Option<String>,
    pub provider: Option<String>,
    pub api_key: Option<String>,
}

impl Overrides {
    pub fn from_env() -> Self {
        Self {
            model_name: env::var("MODEL_NAME").ok(),
            persist_path: env::var("PERSIST_PATH").ok(),
            log_level: env::var("NOTES_LOG_LEVEL").ok(),
            provider: env::var("NOTES_LLM_PROVIDER").ok(),
            api_key: env::var("LLM_API_KEY").ok(),
        }
    }
}

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    agent: RawAgent,
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    telemetry: RawTelemetry,
}

#[derive(Deserialize)]
struct RawAgent {
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
    #[serde(default)]
    persist_path: Option<String>,
    #[serde(default = "default_max_new_tokens")]
    max_new_tokens: usize,
    #[serde(default)]
    max_context_chars: Option<usize>,
}

impl Default for RawAgent {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: None,
            persist_path: None,
            max_new_tokens: default_max_new_tokens(),
            max_context_chars: None,
        }
    }
}

#[derive(Deserialize)]
struct RawLlm {
    /// Maps to `default = "..."` in `[llm]`.
    #[serde(rename = "default", default = "default_llm_provider")]
    provider: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default = "default_device")]
    device: i32,
    #[serde(default = "default_task")]
    task: String,
    #[serde(default)]
    openai: RawOpenAiConfig,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            device: default_device(),
            task: default_task(),
            openai: RawOpenAiConfig::default(),
        }
    }
}

#[derive(Deserialize)]
struct RawOpenAiConfig {
    #[serde(default = "default_openai_api_base_url")]
    api_base_url: String,
    #[serde(default = "default_openai_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default = "default_true")]
    probe_on_load: bool,
}

impl Default for RawOpenAiConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_openai_api_base_url(),
            timeout_seconds: default_openai_timeout_seconds(),
            probe_on_load: true,
        }
    }
}

#[derive(Deserialize)]
struct RawTelemetry {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    export_path: Option<String>,
    #[serde(default = "default_flush_at")]
    flush_at: usize,
}

impl Default for RawTelemetry {
    fn default() -> Self {
        Self {
            enabled: true,
            export_path: None,
            flush_at: default_flush_at(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_max_new_tokens() -> usize { 150 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_device() -> i32 { -1 }
fn default_task() -> String { "text-generation".to_string() }
fn default_openai_api_base_url() -> String { "http://127.0.0.1:8080/v1".to_string() }
fn default_openai_timeout_seconds() -> u64 { 120 }
fn default_flush_at() -> usize { crate::telemetry::DEFAULT_FLUSH_AT }
fn default_true() -> bool { true }

/// Load config from `config/default.toml` (if present), then apply env overrides.
pub fn load() -> Result<Config, AppError> {
    let overrides = Overrides::from_env();
    let path = Path::new(DEFAULT_CONFIG_PATH);
    if path.exists() {
        load_from(path, overrides)
    } else {
        tracing::debug!(path = DEFAULT_CONFIG_PATH, "no config file; using defaults");
        resolve(RawConfig::default(), overrides)
    }
}

/// Internal loader with an explicit path and overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, overrides: Overrides) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    resolve(parsed, overrides)
}

fn resolve(parsed: RawConfig, overrides: Overrides) -> Result<Config, AppError> {
    let a = parsed.agent;
    let l = parsed.llm;

    if a.max_new_tokens == 0 {
        return Err(AppError::Config("agent.max_new_tokens must be > 0".into()));
    }
    if parsed.telemetry.flush_at == 0 {
        return Err(AppError::Config("telemetry.flush_at must be > 0".into()));
    }

    let persist_path = overrides
        .persist_path
        .or(a.persist_path)
        .filter(|p| !p.trim().is_empty())
        .map(|p| expand_home(&p));

    let model = overrides
        .model_name
        .or(l.model)
        .filter(|m| !m.trim().is_empty());

    Ok(Config {
        log_level: overrides.log_level.unwrap_or(a.log_level),
        log_file: a.log_file.filter(|p| !p.trim().is_empty()).map(|p| expand_home(&p)),
        persist_path,
        max_new_tokens: a.max_new_tokens,
        max_context_chars: a.max_context_chars,
        llm: LlmConfig {
            provider: overrides.provider.unwrap_or(l.provider),
            model,
            device: l.device,
            task: l.task,
            openai: OpenAiConfig {
                api_base_url: l.openai.api_base_url,
                timeout_seconds: l.openai.timeout_seconds,
                probe_on_load: l.openai.probe_on_load,
            },
        },
        llm_api_key: overrides.api_key,
        telemetry: TelemetryConfig {
            enabled: parsed.telemetry.enabled,
            export_path: parsed.telemetry.export_path.map(|p| expand_home(&p)),
            flush_at: parsed.telemetry.flush_at,
        },
    })
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests: dummy backend, no persistence, no export.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            log_level: "info".into(),
            log_file: None,
            persist_path: None,
            max_new_tokens: 32,
            max_context_chars: None,
            llm: LlmConfig {
                provider: "dummy".into(),
                model: Some("test-model".into()),
                device: -1,
                task: default_task(),
                openai: OpenAiConfig {
                    api_base_url: "http://localhost:0/v1".into(),
                    timeout_seconds: 1,
                    probe_on_load: false,
                },
            },
            llm_api_key: None,
            telemetry: TelemetryConfig {
                enabled: false,
                export_path: None,
                flush_at: crate::telemetry::DEFAULT_FLUSH_AT,
            },
        }
    }
}
