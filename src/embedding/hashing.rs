//! Offline embedding by feature hashing.
//!
//! Each lower-cased word and each of its character trigrams is hashed into a
//! signed bucket; the bucket vector is L2-normalized. Texts sharing words or
//! word fragments land close together under cosine distance. No model, no
//! network, fully deterministic.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{l2_normalize, EmbeddingProvider};

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

pub struct HashingProvider {
    dimensions: usize,
    model_id: String,
}

impl HashingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            model_id: format!("feature-hash-{dimensions}"),
        }
    }

    /// Synchronous embedding; the trait methods delegate here.
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimensions];
        if self.dimensions == 0 {
            return v;
        }

        let lower = text.to_lowercase();
        for word in lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            self.add_feature(&mut v, word, WORD_WEIGHT);

            let padded: Vec<char> = format!("#{word}#").chars().collect();
            for gram in padded.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut v, &gram, TRIGRAM_WEIGHT);
            }
        }

        l2_normalize(&mut v);
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &str, weight: f32) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&digest[..8]);
        let idx = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign * weight;
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
