//! Language-model access for scoring, reply generation and lead analysis.
//!
//! [`LanguageModel`] is the seam the pipeline depends on; [`OpenAiClient`]
//! implements it against any OpenAI-compatible `/chat/completions` and
//! `/embeddings` endpoint. Structured responses are requested with a JSON
//! schema generated from the Rust response type.

pub mod client;
pub mod error;
pub mod model;
pub mod schema;

pub use client::OpenAiClient;
pub use error::LlmError;
pub use model::{complete_structured, CompletionRequest, LanguageModel, ResponseSchema};
pub use schema::StructuredOutput;
