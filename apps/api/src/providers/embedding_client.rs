//! HTTP client for OpenAI-compatible `/embeddings` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EmbeddingProvider, ExternalServiceError, ServiceErrorKind};

const SERVICE: &str = "embedding";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

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
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    client: Client,
    url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(url: String, api_key: String, model: String) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingClient {
    async fn create_embeddings(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, ExternalServiceError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(ExternalServiceError::from_status(
                SERVICE,
                status.as_u16(),
                message,
            ));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ExternalServiceError::from_reqwest(SERVICE, e))?;

        into_ordered_vectors(parsed, texts.len())
    }
}

/// Reorders by the `index` field and checks one non-empty vector per input.
fn into_ordered_vectors(
    mut response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ExternalServiceError> {
    if response.data.len() != expected {
        return Err(ExternalServiceError::new(
            SERVICE,
            ServiceErrorKind::EmptyResponse,
            format!(
                "expected {expected} embeddings, provider returned {}",
                response.data.len()
            ),
        ));
    }

    response.data.sort_by_key(|d| d.index);
    let vectors: Vec<Vec<f32>> = response.data.into_iter().map(|d| d.embedding).collect();

    if vectors.iter().any(|v| v.is_empty()) {
        return Err(ExternalServiceError::new(
            SERVICE,
            ServiceErrorKind::EmptyResponse,
            "provider returned an empty embedding vector",
        ));
    }

    debug!("Embedding call succeeded: {} vectors", vectors.len());
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vectors_are_reordered_by_index() {
        let response: EmbeddingResponse = serde_json::from_str(
            r#"{"data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]}"#,
        )
        .unwrap();
        let vectors = into_ordered_vectors(response, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_count_mismatch_is_empty_response() {
        let response: EmbeddingResponse = serde_json::from_str(r#"{"data": []}"#).unwrap();
        let err = into_ordered_vectors(response, 1).unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::EmptyResponse);
    }

    #[test]
    fn test_empty_vector_is_empty_response() {
        let response: EmbeddingResponse =
            serde_json::from_str(r#"{"data": [{"index": 0, "embedding": []}]}"#).unwrap();
        let err = into_ordered_vectors(response, 1).unwrap_err();
        assert_eq!(err.kind, ServiceErrorKind::EmptyResponse);
    }
}
