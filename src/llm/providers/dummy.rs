//! Dummy backend — echoes the prompt back prefixed with `[echo]`.
//! Lets the whole answer pipeline run offline.

use serde_json::{Value, json};

use crate::llm::{GenerationParams, ProviderError, TextGenerator};

#[derive(Debug, Clone)]
pub struct DummyProvider {
    model: String,
}

impl DummyProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }
}

impl TextGenerator for DummyProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<Value, ProviderError> {
        Ok(json!([{ "generated_text": format!("[echo] {prompt}") }]))
    }
}
