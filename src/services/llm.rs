use crate::core::config::{LlmConfig, OllamaConfig, OpenAIConfig};
use crate::core::error::AppError;
use crate::services::prompt::Prompt;
use crate::services::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// How the model is asked to shape its answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Text,
    JsonObject,
}

#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, prompt: &Prompt, format: ResponseFormat) -> Result<String, AppError>;
}

pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, AppError> {
    let retry = RetryPolicy::new(config.retry_count, config.retry_delay_ms);
    let timeout = Duration::from_secs(config.timeout_seconds);
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAIClient::new(&config.openai, retry, timeout)?)),
        "ollama" => {
            let cfg = config
                .ollama
                .as_ref()
                .ok_or_else(|| AppError::configuration("Ollama config missing"))?;
            Ok(Arc::new(OllamaClient::new(cfg, retry, timeout)?))
        }
        other => Err(AppError::configuration(format!("Unknown LLM provider: {}", other))),
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::configuration(format!("Failed to build HTTP client: {}", e)))
}

/// Pulls a readable message out of an error body, `{"error":{"message":..}}` or `{"error":".."}`.
fn upstream_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ErrorDetail {
        Object { message: String },
        Text(String),
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            error: ErrorDetail::Object { message },
        }) => message,
        Ok(ErrorBody {
            error: ErrorDetail::Text(message),
        }) => message,
        Err(_) => "Unknown error".to_string(),
    }
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(cfg: &OpenAIConfig, retry: RetryPolicy, timeout: Duration) -> Result<Self, AppError> {
        if cfg.api_key.trim().is_empty() {
            return Err(AppError::configuration("OpenAI API key is not configured"));
        }
        Ok(Self {
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            base_url: cfg
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            retry,
            client: build_http_client(timeout)?,
        })
    }

    async fn send(&self, body: &OpenAIRequest<'_>) -> Result<String, AppError> {
        let url = format!("{}/chat/completions", self.base_url);

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::from_reqwest("OpenAI", e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AppError::from_reqwest("OpenAI", e))?;

        if !status.is_success() {
            return Err(AppError::upstream_status(
                "OpenAI",
                status.as_u16(),
                upstream_message(&text),
            ));
        }

        let result: OpenAIResponse = serde_json::from_str(&text).map_err(|e| {
            AppError::parse(format!("Failed to parse OpenAI response: {}", e), &text)
        })?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::parse("OpenAI response empty or missing content", &text))
    }
}

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAIResponseFormat>,
}

#[derive(Serialize)]
struct OpenAIMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, prompt: &Prompt, format: ResponseFormat) -> Result<String, AppError> {
        let body = OpenAIRequest {
            model: &self.model,
            messages: vec![
                OpenAIMessage { role: "system", content: &prompt.system },
                OpenAIMessage { role: "user", content: &prompt.user },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: match format {
                ResponseFormat::JsonObject => Some(OpenAIResponseFormat { kind: "json_object" }),
                ResponseFormat::Text => None,
            },
        };

        debug!("OpenAI chat completion with model {}", self.model);
        with_retry("OpenAI chat completion", &self.retry, || self.send(&body)).await
    }
}

// --- Ollama ---

#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    model: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(cfg: &OllamaConfig, retry: RetryPolicy, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            retry,
            client: build_http_client(timeout)?,
        })
    }

    async fn send(&self, body: &OllamaRequest<'_>) -> Result<String, AppError> {
        let url = format!("{}/api/chat", self.base_url);

        let resp = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::from_reqwest("Ollama", e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AppError::from_reqwest("Ollama", e))?;

        if !status.is_success() {
            return Err(AppError::upstream_status(
                "Ollama",
                status.as_u16(),
                upstream_message(&text),
            ));
        }

        let result: OllamaResponse = serde_json::from_str(&text).map_err(|e| {
            AppError::parse(format!("Failed to parse Ollama response: {}", e), &text)
        })?;
        Ok(result.message.content)
    }
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAIMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, prompt: &Prompt, format: ResponseFormat) -> Result<String, AppError> {
        let body = OllamaRequest {
            model: &self.model,
            messages: vec![
                OpenAIMessage { role: "system", content: &prompt.system },
                OpenAIMessage { role: "user", content: &prompt.user },
            ],
            stream: false,
            format: match format {
                ResponseFormat::JsonObject => Some("json"),
                ResponseFormat::Text => None,
            },
        };

        with_retry("Ollama chat", &self.retry, || self.send(&body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn openai_config(server: &MockServer) -> LlmConfig {
        LlmConfig {
            retry_count: 1,
            retry_delay_ms: 0,
            timeout_seconds: 5,
            openai: OpenAIConfig {
                api_key: "sk-test".to_string(),
                base_url: Some(format!("{}/v1", server.uri())),
                ..OpenAIConfig::default()
            },
            ..LlmConfig::default()
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "sys".to_string(),
            user: "user".to_string(),
        }
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    #[test]
    fn test_openai_response_parsing_success() {
        let json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1677652288,
            "model": "gpt-3.5-turbo-0613",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Hello there, how may I assist you today?"
                },
                "logprobs": null,
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": 9,
                "completion_tokens": 12,
                "total_tokens": 21
            }
        }"#;

        let result: OpenAIResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            result.choices[0].message.content.as_deref(),
            Some("Hello there, how may I assist you today?")
        );
    }

    #[test]
    fn test_upstream_message_extraction() {
        assert_eq!(
            upstream_message(
                r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#
            ),
            "Incorrect API key provided"
        );
        assert_eq!(upstream_message(r#"{"error":"model not found"}"#), "model not found");
        assert_eq!(upstream_message("<html>502</html>"), "Unknown error");
    }

    #[test]
    fn test_missing_api_key_is_a_configuration_error() {
        let err = create_llm(&LlmConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::Configuration(ref m) if m.contains("OpenAI API key")));
    }

    #[test]
    fn test_unknown_provider_and_missing_ollama() {
        let mut config = LlmConfig {
            provider: "carrier-pigeon".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(create_llm(&config), Err(AppError::Configuration(_))));

        config.provider = "ollama".to_string();
        assert!(matches!(create_llm(&config), Err(AppError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_openai_chat_sends_json_hint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4",
                "response_format": { "type": "json_object" },
                "messages": [
                    { "role": "system", "content": "sys" },
                    { "role": "user", "content": "user" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"tasks\":[]}")))
            .expect(1)
            .mount(&server)
            .await;

        let llm = create_llm(&openai_config(&server)).unwrap();
        let text = llm.chat(&prompt(), ResponseFormat::JsonObject).await.unwrap();
        assert_eq!(text, "{\"tasks\":[]}");
    }

    #[tokio::test]
    async fn test_openai_retries_server_errors_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .with_priority(2)
            .mount(&server)
            .await;

        let llm = create_llm(&openai_config(&server)).unwrap();
        let text = llm.chat(&prompt(), ResponseFormat::Text).await.unwrap();
        assert_eq!(text, "ok");
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_openai_does_not_retry_client_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "Incorrect API key provided" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let llm = create_llm(&openai_config(&server)).unwrap();
        let err = llm.chat(&prompt(), ResponseFormat::Text).await.unwrap_err();
        match err {
            AppError::Upstream { status, message, transient, .. } => {
                assert_eq!(status, Some(401));
                assert_eq!(message, "Incorrect API key provided");
                assert!(!transient);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_openai_timeout_is_transient_and_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("late"))
                    .set_delay(Duration::from_secs(3)),
            )
            .expect(2)
            .mount(&server)
            .await;

        let mut config = openai_config(&server);
        config.timeout_seconds = 1;
        let llm = create_llm(&config).unwrap();
        let err = llm.chat(&prompt(), ResponseFormat::Text).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_ollama_chat() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({ "stream": false, "format": "json" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "llama3",
                "message": { "role": "assistant", "content": "{\"tasks\":[]}" },
                "done": true
            })))
            .mount(&server)
            .await;

        let config = LlmConfig {
            provider: "ollama".to_string(),
            retry_count: 0,
            ollama: Some(OllamaConfig {
                base_url: format!("{}/", server.uri()),
                model: "llama3".to_string(),
            }),
            ..LlmConfig::default()
        };
        let llm = create_llm(&config).unwrap();
        let text = llm.chat(&prompt(), ResponseFormat::JsonObject).await.unwrap();
        assert_eq!(text, "{\"tasks\":[]}");
    }
}
