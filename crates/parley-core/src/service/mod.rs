//! The language-model service boundary.
//!
//! The chat session only sees [`ModelService`]; the Ollama client is one
//! implementation, and tests substitute stubs.

pub mod ollama;

use async_trait::async_trait;
use thiserror::Error;

use crate::availability::Availability;

pub use ollama::OllamaService;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("request to model service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model service returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("model returned an empty reply")]
    EmptyReply,

    #[error("model service is not available ({0})")]
    Unavailable(&'static str),
}

#[async_trait]
pub trait ModelService: Send + Sync {
    /// The last observed availability signal. Must be cheap; no I/O.
    fn availability(&self) -> Availability;

    /// One request/response round trip.
    async fn respond(&self, prompt: &str) -> Result<String, ServiceError>;

    /// Re-probe the backing runtime and update [`ModelService::availability`].
    async fn refresh(&self) {}
}
