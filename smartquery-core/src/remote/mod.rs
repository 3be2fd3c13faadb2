//! Model-assisted resolution: prompt construction, provider clients, and the
//! repair/validation of whatever text comes back.

mod gemini;
mod openai;
pub mod prompt;
pub mod repair;
mod resolver;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;
pub use resolver::RemoteResolver;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use smartquery_common::ResolutionError;
use std::time::Duration;

/// A text-completion backend: prompt in, free-form text out.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One request, no retries. Transient quota failures come back as
    /// [`ResolutionError::RateLimited`].
    async fn complete(&self, prompt: &str) -> Result<String, ResolutionError>;
}

/// Map a failed call to the resolution taxonomy.
pub fn classify_failure(status: Option<StatusCode>, message: &str) -> ResolutionError {
    let lowered = message.to_ascii_lowercase();
    if status == Some(StatusCode::TOO_MANY_REQUESTS)
        || lowered.contains("quota")
        || lowered.contains("resource_exhausted")
        || message.contains("429")
    {
        return ResolutionError::RateLimited(message.to_string());
    }
    match status {
        Some(StatusCode::UNAUTHORIZED) | Some(StatusCode::FORBIDDEN) => {
            ResolutionError::Provider(format!("authentication failed: {message}"))
        }
        Some(code) => ResolutionError::Provider(format!("API error ({code}): {message}")),
        None => ResolutionError::Provider(message.to_string()),
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<Client, ResolutionError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ResolutionError::Provider(format!("failed to create HTTP client: {e}")))
}

pub(crate) fn transport_failure(e: reqwest::Error) -> ResolutionError {
    if e.is_timeout() {
        ResolutionError::Provider("request timed out".into())
    } else if e.is_connect() {
        ResolutionError::Provider(format!("connection failed: {e}"))
    } else {
        classify_failure(e.status(), &e.to_string())
    }
}

/// Pass successful responses through; turn the rest into a classified error
/// carrying the body text.
pub(crate) async fn check_status(response: Response) -> Result<Response, ResolutionError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(classify_failure(Some(status), &body))
}
