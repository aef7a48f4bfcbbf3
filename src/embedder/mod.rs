/// Embedder trait for turning text into vectors.
///
/// Implementations must be deterministic and keep the same dimensionality
/// for a given model configuration; indices and queries rely on it.
pub mod http;
pub mod mock;

use async_trait::async_trait;

pub use crate::error::EmbedderError;

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Embed multiple text strings into vectors, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedderError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    /// Model identifier, recorded in logs.
    fn model_name(&self) -> &str;
}
