//! OpenAI-compatible embeddings endpoint.

use super::Embed;
use crate::error::{Error, Result};
use rand::{Rng, rng};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{instrument, warn};

/// Async client for `POST {base_url}/embeddings`.
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    max_retries: usize,
}

impl OpenAiEmbedder {
    /// Build a client for `{base_url}/embeddings`.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Bearer token
    /// * `base_url` - API root, e.g. `https://api.openai.com/v1`
    /// * `model` - Embedding model name
    /// * `dimensions` - Requested output width, for models that support it
    /// * `timeout` - Per-request timeout
    /// * `max_retries` - Attempts per batch on 429, 5xx and transport errors
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a blank key or model name.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimensions: Option<usize>,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config("missing embedding API key".to_string()));
        }
        if model.trim().is_empty() {
            return Err(Error::Config("missing embedding model name".to_string()));
        }
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| Error::Config("invalid embedding API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimensions,
            max_retries: max_retries.max(1),
        })
    }
}

impl Embed for OpenAiEmbedder {
    #[instrument(level = "info", skip_all, fields(inputs = inputs.len(), model = %self.model))]
    async fn embed_batch(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0usize;
        loop {
            let request = EmbeddingRequest {
                model: &self.model,
                input: inputs,
                dimensions: self.dimensions,
            };
            match self.client.post(&self.endpoint).json(&request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let mut parsed: EmbeddingResponse = resp.json().await?;
                        parsed.data.sort_by_key(|entry| entry.index);
                        if parsed.data.len() != inputs.len() {
                            return Err(Error::Embedding(format!(
                                "returned {} embeddings for {} inputs",
                                parsed.data.len(),
                                inputs.len()
                            )));
                        }
                        return Ok(parsed.data.into_iter().map(|d| d.embedding).collect());
                    }

                    let body = resp
                        .text()
                        .await
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        let delay = retry_backoff(attempt);
                        warn!(attempt, %status, ?delay, "Embedding request rejected; backing off");
                        sleep(delay).await;
                        continue;
                    }
                    return Err(Error::Embedding(format!("request failed ({status}): {body}")));
                }
                Err(err) => {
                    if is_retryable(&err) && attempt + 1 < self.max_retries {
                        attempt += 1;
                        let delay = retry_backoff(attempt);
                        warn!(
                            attempt,
                            error = %err,
                            ?delay,
                            "Embedding request errored; backing off"
                        );
                        sleep(delay).await;
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

/// 1s, 2s, 4s, ... capped at 32s, plus up to 250ms of jitter.
fn retry_backoff(attempt: usize) -> Duration {
    let capped = attempt.saturating_sub(1).min(5) as u32;
    let jitter_ms: u64 = rng().random_range(0..=250);
    Duration::from_millis(1_000 * (1 << capped) + jitter_ms)
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let inputs = ["a", "b"];
        let body = serde_json::to_value(EmbeddingRequest {
            model: "text-embedding-3-small",
            input: &inputs,
            dimensions: None,
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"model": "text-embedding-3-small", "input": ["a", "b"]})
        );
    }

    #[test]
    fn test_response_parses_out_of_order() {
        let raw = r#"{"data":[
            {"embedding":[0.5],"index":1},
            {"embedding":[0.25],"index":0}
        ],"model":"m"}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(raw).unwrap();
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![0.25]);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        assert!(retry_backoff(1) >= Duration::from_secs(1));
        assert!(retry_backoff(1) <= Duration::from_millis(1_250));
        assert!(retry_backoff(3) >= Duration::from_secs(4));
        assert!(retry_backoff(50) <= Duration::from_millis(32_250));
    }

    #[test]
    fn test_requires_api_key() {
        let err = OpenAiEmbedder::new(
            " ",
            "https://api.openai.com/v1",
            "m",
            None,
            Duration::from_secs(1),
            1,
        );
        assert!(matches!(err, Err(Error::Config(_))));
    }
}
