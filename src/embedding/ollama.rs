//! Ollama HTTP embedding provider.
//!
//! Calls `POST {endpoint}/api/embed` with `{"model", "input": [...]}` and
//! reads back `{"embeddings": [[...], ...]}`. Every request is bounded by the
//! configured timeout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;

pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dimensions: usize,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            url: format!("{}/api/embed", config.endpoint.trim_end_matches('/')),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .context("embedding response was empty")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let response = self
            .client
            .post(&self.url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .with_context(|| format!("embedding request to {} failed", self.url))?;

        anyhow::ensure!(
            response.status().is_success(),
            "embedding request failed with HTTP {}",
            response.status()
        );

        let body: EmbedResponse = response
            .json()
            .await
            .context("invalid embedding response")?;

        anyhow::ensure!(
            body.embeddings.len() == texts.len(),
            "expected {} embeddings, got {}",
            texts.len(),
            body.embeddings.len()
        );
        if let Some(bad) = body.embeddings.iter().find(|e| e.len() != self.dimensions) {
            anyhow::bail!(
                "model {} returned {} dimensions, configured for {}",
                self.model,
                bad.len(),
                self.dimensions
            );
        }

        tracing::trace!(model = %self.model, count = texts.len(), "embedded batch");
        Ok(body.embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    /// Serve a fake `/api/embed` that answers with `dims`-long vectors.
    async fn fake_ollama(dims: usize) -> String {
        let app = Router::new().route(
            "/api/embed",
            post(move |Json(body): Json<Value>| async move {
                let n = body["input"].as_array().map(Vec::len).unwrap_or(0);
                let embeddings: Vec<Vec<f32>> =
                    (0..n).map(|i| vec![i as f32; dims]).collect();
                Json(json!({ "model": body["model"], "embeddings": embeddings }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config(endpoint: String, dimensions: usize) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "ollama".into(),
            endpoint,
            dimensions,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn embeds_batches_over_http() {
        let endpoint = fake_ollama(4).await;
        let provider = OllamaProvider::new(&config(endpoint, 4)).unwrap();

        let vectors = provider
            .embed_batch(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.0; 4], vec![1.0; 4]]);
        assert_eq!(provider.embed("x").await.unwrap().len(), 4);
        assert_eq!(provider.model_id(), "nomic-embed-text");
    }

    #[tokio::test]
    async fn rejects_wrong_dimensionality() {
        let endpoint = fake_ollama(3).await;
        let provider = OllamaProvider::new(&config(endpoint, 4)).unwrap();
        let err = provider.embed("x").await.unwrap_err();
        assert!(err.to_string().contains("3 dimensions"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let provider =
            OllamaProvider::new(&config("http://127.0.0.1:9".into(), 4)).unwrap();
        assert!(provider.embed("x").await.is_err());
    }
}
