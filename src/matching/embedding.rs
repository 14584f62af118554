//! Embedding-service client for vector generation.
//!
//! The service is a black box: text in, fixed-length float vector out.
//! Latency is nondeterministic and transient failures are expected, so
//! callers go through [`super::cache::EmbeddingRetriever`] rather than
//! hitting this client directly.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Anything that can turn text into an embedding vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [&'a str],
}

/// HTTP embedding client (TEI-style `POST {base}/embed`).
pub struct HttpEmbedder {
    client: reqwest::Client,
    url: String,
}

impl HttpEmbedder {
    /// Create a client for the embedding service at `base_url`.
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("{}/embed", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbedRequest { inputs: &[text] };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("embedding request to {} failed", self.url))?;

        if !response.status().is_success() {
            bail!("embedding service returned status {}", response.status());
        }

        let mut embeddings: Vec<Vec<f32>> = response
            .json()
            .await
            .context("embedding response parse error")?;

        if embeddings.len() != 1 {
            bail!("embedding service returned {} vectors for 1 input", embeddings.len());
        }

        Ok(embeddings.remove(0))
    }
}
