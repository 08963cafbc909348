//! Embedding provider for OpenAI-compatible `/v1/embeddings` endpoints.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::semantic::retry::RetryPolicy;

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbedDatum {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
    retry: RetryPolicy,
}

impl fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .field("retry", &self.retry)
            .finish()
    }
}

impl OpenAiEmbedder {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: String,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key,
            retry,
        })
    }

    /// Build from config, reading the API key from the configured environment variable.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => key.trim().to_string(),
            _ => {
                return Err(EmbeddingError::InitFailed(format!(
                    "{} is not set; export the embedding service API key",
                    config.api_key_env
                )))
            }
        };

        Self::new(
            &config.endpoint,
            &config.model,
            api_key,
            Duration::from_secs(config.request_timeout_secs),
            config.retry_policy(),
        )
    }

    fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(classify_status(status, &detail));
        }

        let parsed: EmbedResponse = response
            .json()
            .map_err(|e| EmbeddingError::Permanent(format!("Failed to parse embedding response: {e}")))?;

        reorder(parsed, texts.len())
    }
}

impl EmbeddingProvider for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        log::debug!("Requesting {} embeddings from {}", texts.len(), self.endpoint);
        self.retry
            .run("embedding request", || self.request_once(texts))
    }
}

/// Map a non-success HTTP status to a transient or permanent error.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> EmbeddingError {
    let detail: String = body.chars().take(200).collect();
    let message = format!("HTTP {status}: {detail}");

    let transient = status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::CONFLICT
        || status.is_server_error();

    if transient {
        EmbeddingError::Transient(message)
    } else {
        EmbeddingError::Permanent(message)
    }
}

fn classify_transport_error(err: reqwest::Error) -> EmbeddingError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        EmbeddingError::Transient(format!("Transport error: {err}"))
    } else {
        EmbeddingError::Permanent(format!("Request failed: {err}"))
    }
}

/// Put response vectors back in input order using their `index` field.
fn reorder(response: EmbedResponse, expected: usize) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if response.data.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            got: response.data.len(),
        });
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for datum in response.data {
        match slots.get_mut(datum.index) {
            Some(slot) if slot.is_none() => *slot = Some(datum.embedding),
            _ => {
                return Err(EmbeddingError::Permanent(format!(
                    "Embedding response has invalid or repeated index {}",
                    datum.index
                )))
            }
        }
    }

    slots
        .into_iter()
        .map(|v| v.ok_or_else(|| EmbeddingError::Permanent("Embedding response is missing an index".into())))
        .collect()
}
