//! Embedding provider seam (spec.md §4.9: "hybrid lexical+vector recall").
//!
//! A single HTTP-based provider talking to an Ollama-compatible
//! `/api/embeddings` endpoint. Batched, and tolerant of individual failures —
//! one bad chunk shouldn't sink indexing of the rest of a source.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one piece of text, returning `None` if the provider couldn't
    /// produce a vector for it (caller should skip, not fail the batch).
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>>;

    /// Embed a batch, one slot per input, preserving order. Individual
    /// failures collapse to `None` rather than aborting the whole batch.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            match self.embed(text).await {
                Ok(v) => out.push(v),
                Err(e) => {
                    warn!(error = %e, "embedding failed for chunk, will rely on FTS only");
                    out.push(None);
                }
            }
        }
        out
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Talks to an Ollama-style `POST {base_url}/api/embeddings` endpoint.
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddingProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "embedding provider unreachable");
                return Ok(None);
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, body, "embedding provider returned an error");
            return Ok(None);
        }

        let parsed: EmbedResponse = resp.json().await.map_err(|e| {
            crate::error::RecallError::Embedding(format!("malformed embedding response: {e}"))
        })?;
        Ok(Some(parsed.embedding))
    }
}

/// Packs a float32 vector into the little-endian byte layout stored in the
/// `embeddings.vector` BLOB column and `chunks_vec`'s `vec0` rows.
pub fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na * nb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_byte_roundtrip() {
        let v = vec![1.0_f32, -2.5, 0.0, 3.25];
        let bytes = vector_to_bytes(&v);
        assert_eq!(bytes_to_vector(&bytes), v);
    }

    #[test]
    fn identical_vectors_are_maximally_similar() {
        let v = vec![0.1_f32, 0.2, 0.3];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_zero_similarity() {
        let a = vec![1.0_f32, 0.0];
        let b = vec![0.0_f32, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }
}
