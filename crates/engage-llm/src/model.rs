use async_trait::async_trait;
use serde_json::Value;

use crate::error::LlmError;
use crate::schema::StructuredOutput;

/// A JSON schema the response must conform to.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: String,
    pub schema: Value,
}

/// One chat completion: a system prompt, a user message and, optionally, a
/// strict response schema.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: Option<f32>,
    pub response_schema: Option<ResponseSchema>,
}

impl CompletionRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            user: user.into(),
            temperature: None,
            response_schema: None,
        }
    }

    #[must_use]
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Requests strict structured output shaped like `T`.
    #[must_use]
    pub fn structured<T: StructuredOutput>(mut self) -> Self {
        self.response_schema = Some(ResponseSchema {
            name: T::output_name(),
            schema: T::openai_schema(),
        });
        self
    }
}

/// The language-model operations the pipeline needs.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Returns the raw text content of the first choice.
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError>;

    /// Embeds each input, returning vectors in input order.
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;
}

/// Runs a structured completion and deserializes the content as `T`.
///
/// # Errors
///
/// Returns [`LlmError::Deserialize`] if the content is not valid `T`, or
/// whatever error the underlying model call produced.
pub async fn complete_structured<T: StructuredOutput>(
    llm: &dyn LanguageModel,
    request: CompletionRequest,
) -> Result<T, LlmError> {
    let context = format!("{} ({})", T::output_name(), request.model);
    let content = llm.complete(request.structured::<T>()).await?;
    serde_json::from_str(&content).map_err(|source| LlmError::Deserialize { context, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use std::sync::Mutex;

    #[derive(Debug, Deserialize, JsonSchema, PartialEq)]
    struct Verdict {
        keep: bool,
    }

    struct CannedModel {
        reply: String,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LanguageModel for CannedModel {
        async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(request);
            Ok(self.reply.clone())
        }

        async fn embed(&self, _model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
            Ok(inputs.iter().map(|_| vec![0.0]).collect())
        }
    }

    #[tokio::test]
    async fn structured_completion_attaches_schema_and_parses() {
        let model = CannedModel {
            reply: r#"{"keep": true}"#.to_string(),
            seen: Mutex::new(Vec::new()),
        };

        let verdict: Verdict =
            complete_structured(&model, CompletionRequest::new("m", "sys", "user"))
                .await
                .expect("parses");

        assert_eq!(verdict, Verdict { keep: true });
        let seen = model.seen.lock().unwrap();
        let schema = seen[0].response_schema.as_ref().expect("schema attached");
        assert_eq!(schema.name, "Verdict");
    }

    #[tokio::test]
    async fn malformed_content_is_deserialize_error() {
        let model = CannedModel {
            reply: "not json".to_string(),
            seen: Mutex::new(Vec::new()),
        };

        let err = complete_structured::<Verdict>(&model, CompletionRequest::new("m", "s", "u"))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Deserialize { .. }));
    }
}
