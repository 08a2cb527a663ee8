//! OpenAI-compatible backend (`/v1/completions` or `/v1/chat/completions`).
//!
//! Blocking HTTP via `reqwest::blocking`; a query waits for its answer.  All
//! wire types are private to this module; `generate` hands back the
//! `choices` array so text extraction stays in
//! [`normalize_output`](crate::llm::normalize_output).
//!
//! Covers local inference servers (vLLM, llama.cpp server, TGI's OpenAI
//! route, Ollama) as well as hosted endpoints.

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, trace};

use crate::llm::{GenerationParams, ProviderError, TextGenerator};

/// Longest error body kept in a `ProviderError`.
const MAX_ERROR_BODY: usize = 512;

/// Request shape selected by `llm.task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Raw prompt completion (`/completions`).
    TextGeneration,
    /// Prompt sent as a single user message (`/chat/completions`).
    ChatCompletion,
}

impl Task {
    pub fn parse(s: &str) -> Result<Self, ProviderError> {
        match s {
            "text-generation" => Ok(Self::TextGeneration),
            "chat-completion" | "chat" => Ok(Self::ChatCompletion),
            other => Err(ProviderError::Unavailable(format!("unsupported task '{other}'"))),
        }
    }

    fn path(self) -> &'static str {
        match self {
            Self::TextGeneration => "completions",
            Self::ChatCompletion => "chat/completions",
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCompatibleProvider {
    client: Client,
    api_base_url: String,
    model: String,
    task: Task,
    api_key: Option<String>,
}

impl OpenAiCompatibleProvider {
    /// Build a provider from config values and an optional API key.
    ///
    /// `api_key` is `None` for keyless local servers. When present it is sent
    /// as `Authorization: Bearer <key>` on every request.
    pub fn new(
        api_base_url: String,
        model: String,
        task: Task,
        timeout_seconds: u64,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            model,
            task,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/{}", self.api_base_url, self.task.path())
    }

    /// Lightweight reachability probe against `{base}/models`.
    ///
    /// Any HTTP response (including 4xx) means the server is reachable.
    /// Only a transport-level failure is treated as unavailable.
    pub fn ping(&self) -> Result<(), ProviderError> {
        let mut req = self
            .client
            .get(format!("{}/models", self.api_base_url))
            .timeout(Duration::from_secs(5));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req.send()
            .map(|_| ())
            .map_err(|e| ProviderError::Unavailable(format!("unreachable: {e}")))
    }

    fn request_body(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<Value, ProviderError> {
        // Greedy decoding: temperature 0 unless sampling was asked for.
        let temperature = if params.do_sample { None } else { Some(0.0) };
        let body = match self.task {
            Task::TextGeneration => serde_json::to_value(CompletionRequest {
                model: &self.model,
                prompt,
                max_tokens: params.max_new_tokens,
                temperature,
            }),
            Task::ChatCompletion => serde_json::to_value(ChatCompletionRequest {
                model: &self.model,
                messages: vec![Message {
                    role: "user",
                    content: prompt,
                }],
                max_tokens: params.max_new_tokens,
                temperature,
            }),
        };
        body.map_err(|e| ProviderError::Request(format!("failed to serialise request: {e}")))
    }
}

impl TextGenerator for OpenAiCompatibleProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<Value, ProviderError> {
        let payload = self.request_body(prompt, params)?;
        let url = self.endpoint();

        debug!(
            model = %self.model,
            url = %url,
            max_new_tokens = params.max_new_tokens,
            prompt_len = prompt.len(),
            "sending generation request"
        );
        trace!(payload = %payload, "full generation request payload");

        let mut req = self.client.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().map_err(|e| {
            error!(url = %url, error = %e, "generation request failed (transport)");
            ProviderError::Request(e.to_string())
        })?;
        let response = check_status(response)?;

        let parsed: CompletionResponse = response.json().map_err(|e| {
            ProviderError::Response(format!("failed to parse response body: {e}"))
        })?;
        debug!(choices = parsed.choices.len(), "received generation response");

        if parsed.choices.is_empty() {
            return Err(ProviderError::Response("no choices in response".into()));
        }

        match self.task {
            Task::TextGeneration => Ok(Value::Array(parsed.choices)),
            Task::ChatCompletion => chat_choices(parsed.choices),
        }
    }
}

/// Chat choices as `[{"generated_text": content}]`.  A choice without string
/// message content is an unusable response.
fn chat_choices(choices: Vec<Value>) -> Result<Value, ProviderError> {
    choices
        .into_iter()
        .map(|c| match c.pointer("/message/content") {
            Some(Value::String(content)) => Ok(json!({ "generated_text": content })),
            other => Err(ProviderError::Response(format!(
                "chat choice without text content: {}",
                other.unwrap_or(&Value::Null)
            ))),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
}

// ── Private wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// Both endpoints share the `choices` envelope; choice bodies differ.
#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Value>,
}

// Error envelope used by OpenAI and compatible APIs.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Return the response if successful, or a structured error.
fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .unwrap_or_else(|_| "<failed to read error body>".to_string());

    let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(env) => format!("HTTP {status}: {}", env.error.message),
        Err(_) => format!("HTTP {status}: {}", truncate(&body, MAX_ERROR_BODY)),
    };

    error!(%status, %message, "generation request returned HTTP error");
    Err(ProviderError::Response(message))
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(task: Task) -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::new(
            "http://127.0.0.1:8080/v1/".to_string(),
            "qwen2.5-0.5b-instruct".to_string(),
            task,
            5,
            None,
        )
        .unwrap()
    }

    #[test]
    fn task_parses_known_names() {
        assert_eq!(Task::parse("text-generation").unwrap(), Task::TextGeneration);
        assert_eq!(Task::parse("chat-completion").unwrap(), Task::ChatCompletion);
        assert!(Task::parse("fill-mask").is_err());
    }

    #[test]
    fn endpoint_follows_task() {
        assert_eq!(
            provider(Task::TextGeneration).endpoint(),
            "http://127.0.0.1:8080/v1/completions"
        );
        assert_eq!(
            provider(Task::ChatCompletion).endpoint(),
            "http://127.0.0.1:8080/v1/chat/completions"
        );
    }

    #[test]
    fn completion_body_is_greedy() {
        let body = provider(Task::TextGeneration)
            .request_body("hi", &GenerationParams::deterministic(150))
            .unwrap();
        assert_eq!(body["prompt"], "hi");
        assert_eq!(body["max_tokens"], 150);
        assert_eq!(body["temperature"], 0.0);
        assert!(body.get("messages").is_none());
    }

    #[test]
    fn chat_body_wraps_prompt_as_user_message() {
        let body = provider(Task::ChatCompletion)
            .request_body("hi", &GenerationParams::deterministic(10))
            .unwrap();
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["model"], "qwen2.5-0.5b-instruct");
    }

    #[test]
    fn sampling_omits_temperature() {
        let params = GenerationParams {
            max_new_tokens: 4,
            do_sample: true,
        };
        let body = provider(Task::TextGeneration).request_body("hi", &params).unwrap();
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn unreachable_server_fails_request() {
        // Port 9 (discard) on localhost is not an HTTP server.
        let p = OpenAiCompatibleProvider::new(
            "http://127.0.0.1:9/v1".to_string(),
            "m".to_string(),
            Task::TextGeneration,
            1,
            None,
        )
        .unwrap();
        assert!(p.generate("x", &GenerationParams::deterministic(1)).is_err());
        assert!(matches!(p.ping(), Err(ProviderError::Unavailable(_))));
    }

    #[test]
    fn chat_choices_map_message_content() {
        let choices = vec![json!({ "message": { "role": "assistant", "content": "milk" } })];
        assert_eq!(chat_choices(choices).unwrap(), json!([{ "generated_text": "milk" }]));
    }

    #[test]
    fn chat_choice_without_content_is_unusable() {
        for choice in [
            json!({ "message": { "role": "assistant", "content": null } }),
            json!({ "message": { "role": "assistant" } }),
            json!({ "finish_reason": "length" }),
        ] {
            assert!(matches!(chat_choices(vec![choice]), Err(ProviderError::Response(_))));
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("привет", 3), "при");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
