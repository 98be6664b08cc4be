//! Client for OpenAI-compatible chat-completion and embedding endpoints.

use std::time::Duration;

use async_trait::async_trait;
use engage_core::AppConfig;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::LlmError;
use crate::model::{CompletionRequest, LanguageModel};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";

/// Client for an OpenAI-compatible API.
///
/// Use [`OpenAiClient::new`] for production or
/// [`OpenAiClient::with_base_url`] to point at a mock server in tests.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: Url,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &"[redacted]")
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
    refusal: Option<String>,
}

impl OpenAiClient {
    /// Creates a client pointed at the public OpenAI API.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] if the underlying `reqwest::Client` cannot
    /// be constructed.
    pub fn new(api_key: &str, timeout_secs: u64) -> Result<Self, LlmError> {
        Self::with_base_url(api_key, timeout_secs, DEFAULT_BASE_URL)
    }

    /// Creates a client from the application config's key, timeout and base URL.
    ///
    /// # Errors
    ///
    /// See [`OpenAiClient::with_base_url`].
    pub fn from_app_config(config: &AppConfig) -> Result<Self, LlmError> {
        Self::with_base_url(&config.llm_api_key, config.http_timeout_secs, &config.llm_base_url)
    }

    /// Creates a client with a custom base URL (any OpenAI-compatible
    /// provider, or wiremock in tests).
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] if the `reqwest::Client` cannot be
    /// constructed, or [`LlmError::InvalidBaseUrl`] if `base_url` is invalid.
    pub fn with_base_url(api_key: &str, timeout_secs: u64, base_url: &str) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised)
            .map_err(|e| LlmError::InvalidBaseUrl(format!("'{base_url}': {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.to_owned(),
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, LlmError> {
        self.base_url
            .join(path)
            .map_err(|e| LlmError::InvalidBaseUrl(format!("{path}: {e}")))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<String, LlmError> {
        let url = self.endpoint(path)?;
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }
}

fn chat_body(request: &CompletionRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": request.user },
        ],
    });

    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }

    if let Some(schema) = &request.response_schema {
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": schema.name,
                "strict": true,
                "schema": schema.schema,
            }
        });
    }

    body
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        let start = std::time::Instant::now();
        let body = self.post_json("chat/completions", &chat_body(&request)).await?;

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|source| LlmError::Deserialize {
                context: "chat/completions".to_string(),
                source,
            })?;

        let message = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or(LlmError::EmptyResponse)?;

        if let Some(refusal) = message.refusal {
            return Err(LlmError::Refused(refusal));
        }

        let content = message
            .content
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        tracing::debug!(
            model = %request.model,
            duration_ms = start.elapsed().as_millis(),
            "LLM chat completion"
        );

        Ok(content)
    }

    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = serde_json::to_value(EmbeddingRequest { model, input: inputs })
            .map_err(|source| LlmError::Deserialize {
                context: "embeddings request".to_string(),
                source,
            })?;
        let body = self.post_json("embeddings", &request).await?;

        let mut parsed: EmbeddingResponse =
            serde_json::from_str(&body).map_err(|source| LlmError::Deserialize {
                context: "embeddings".to_string(),
                source,
            })?;

        if parsed.data.len() != inputs.len() {
            return Err(LlmError::EmptyResponse);
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

async fn check_status(response: Response) -> Result<String, LlmError> {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let body = response.text().await?;
    if status.is_success() {
        return Ok(body);
    }

    tracing::warn!(status = %status, "LLM provider error");
    Err(LlmError::Status {
        status: status.as_u16(),
        body: body.chars().take(300).collect(),
        retry_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_body_includes_strict_schema_when_requested() {
        #[derive(serde::Deserialize, schemars::JsonSchema)]
        #[allow(dead_code)]
        struct Reply {
            text: String,
        }

        let request = CompletionRequest::new("gpt-4o-mini", "be brief", "hello").structured::<Reply>();
        let body = chat_body(&request);

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["strict"], true);
        assert_eq!(body["response_format"]["json_schema"]["name"], "Reply");
    }

    #[test]
    fn chat_body_omits_optional_fields() {
        let body = chat_body(&CompletionRequest::new("m", "s", "u"));
        assert!(body.get("response_format").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn debug_redacts_api_key() {
        let client = OpenAiClient::with_base_url("sk-secret", 5, "http://localhost:1").unwrap();
        assert!(!format!("{client:?}").contains("sk-secret"));
    }
}
