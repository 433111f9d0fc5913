//! Text-to-vector embedding.
//!
//! Provides the [`EmbeddingProvider`] trait and two implementations: an
//! Ollama HTTP client for a real embedding model and a deterministic
//! feature-hashing embedder that needs no model at all. The provider is
//! created via [`create_provider`] from configuration and injected wherever
//! embeddings are needed.

pub mod hashing;
pub mod ollama;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;

/// Trait for embedding text into vectors.
///
/// Implementations produce vectors of exactly [`dimensions`](Self::dimensions)
/// components for every input.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize;

    /// Identifier of the underlying model, recorded next to stored vectors.
    fn model_id(&self) -> &str;
}

/// Create an embedding provider from config.
///
/// Supported providers: `"ollama"` (HTTP) and `"hash"` (offline feature hashing).
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(ollama::OllamaProvider::new(config)?)),
        "hash" => Ok(Arc::new(hashing::HashingProvider::new(config.dimensions))),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: ollama, hash"),
    }
}

/// Scale a vector to unit length in place. Zero vectors stay zero.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
