use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::embedder::Embedder;
use crate::error::{CapabilityError, ConfigError, IndexError};
use crate::index::{ScoredUnit, VectorIndex};
use crate::models::RetrievableUnit;

/// Embeds a query and searches one index with it.
///
/// Deterministic as long as the embedder is: the same query against the same
/// index always yields the same ranked units.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    timeout: Option<Duration>,
}

impl Retriever {
    /// Fails when the embedder's dimensionality differs from the index's.
    pub fn new(index: Arc<VectorIndex>, embedder: Arc<dyn Embedder>) -> Result<Self, ConfigError> {
        if embedder.dimensions() != index.dimensions() {
            return Err(ConfigError::DimensionMismatch {
                expected: index.dimensions(),
                actual: embedder.dimensions(),
            });
        }
        Ok(Self {
            index,
            embedder,
            timeout: None,
        })
    }

    /// Bound each query embedding call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, CapabilityError> {
        let call = self.embedder.embed(query);
        let vector = match self.timeout {
            Some(after) => tokio::time::timeout(after, call)
                .await
                .map_err(|_| CapabilityError::Timeout {
                    capability: "embedding",
                    after,
                })??,
            None => call.await?,
        };
        Ok(vector)
    }

    /// Top `k` units with their similarity scores, best first.
    pub async fn retrieve_scored(&self, query: &str, k: usize) -> Result<Vec<ScoredUnit>, IndexError> {
        let vector = self.embed_query(query).await?;
        let hits = self.index.search(&vector, k)?;
        debug!(
            "Retrieved {} of {} units for query ({} chars)",
            hits.len(),
            self.index.len(),
            query.len()
        );
        Ok(hits)
    }

    /// Top `k` units, best first.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievableUnit>, IndexError> {
        Ok(self
            .retrieve_scored(query, k)
            .await?
            .into_iter()
            .map(|hit| hit.unit)
            .collect())
    }
}
