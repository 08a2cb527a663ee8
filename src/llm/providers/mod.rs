//! Generation backends.
//!
//! `build(config, api_key)` is the factory, called once at startup.
//! Adding a new backend = new module + new match arm.

pub mod dummy;
pub mod openai_compatible;

use crate::config::LlmConfig;
use crate::llm::{ProviderError, TextGenerator};

/// Construct the configured backend.
///
/// `api_key` is sourced from `LLM_API_KEY` env (never TOML) and is `None`
/// for keyless local servers.
pub fn build(
    config: &LlmConfig,
    api_key: Option<String>,
) -> Result<Box<dyn TextGenerator>, ProviderError> {
    match config.provider.as_str() {
        "none" => Err(ProviderError::Unavailable("no generation backend configured".into())),
        "dummy" => {
            let model = config.model.clone().unwrap_or_else(|| "dummy".to_string());
            Ok(Box::new(dummy::DummyProvider::new(model)))
        }
        "openai" | "openai-compatible" => {
            let model = config
                .model
                .clone()
                .ok_or_else(|| ProviderError::Unavailable("no model name configured".into()))?;
            let task = openai_compatible::Task::parse(&config.task)?;
            let oai = &config.openai;
            let p = openai_compatible::OpenAiCompatibleProvider::new(
                oai.api_base_url.clone(),
                model,
                task,
                oai.timeout_seconds,
                api_key,
            )?;
            if oai.probe_on_load {
                p.ping()?;
            }
            Ok(Box::new(p))
        }
        _ => Err(ProviderError::UnknownProvider(config.provider.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn none_is_unavailable() {
        let mut cfg = Config::test_default().llm;
        cfg.provider = "none".into();
        assert!(matches!(build(&cfg, None), Err(ProviderError::Unavailable(_))));
    }

    #[test]
    fn openai_without_model_is_unavailable() {
        let mut cfg = Config::test_default().llm;
        cfg.provider = "openai".into();
        cfg.model = None;
        assert!(matches!(build(&cfg, None), Err(ProviderError::Unavailable(_))));
    }

    #[test]
    fn openai_with_bad_task_errors() {
        let mut cfg = Config::test_default().llm;
        cfg.provider = "openai".into();
        cfg.task = "summarization".into();
        assert!(matches!(build(&cfg, None), Err(ProviderError::Unavailable(_))));
    }

    #[test]
    fn openai_without_probe_builds() {
        let mut cfg = Config::test_default().llm;
        cfg.provider = "openai".into();
        let g = build(&cfg, Some("sk-test".into())).unwrap();
        assert_eq!(g.model_id(), "test-model");
    }

    #[test]
    fn unknown_provider_errors() {
        let mut cfg = Config::test_default().llm;
        cfg.provider = "mystery".into();
        assert!(matches!(
            build(&cfg, None),
            Err(ProviderError::UnknownProvider(p)) if p == "mystery"
        ));
    }
}
