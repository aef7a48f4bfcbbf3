//! In-memory vector index over the units of one repository.
//!
//! An index is built once from a full unit set and is read-only afterwards, so
//! any number of sessions can search it through an `Arc` without locking.
pub mod catalog;
pub mod persist;

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use indicatif::ProgressBar;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::embedder::Embedder;
use crate::error::{CapabilityError, ConfigError, IndexError};
use crate::models::RetrievableUnit;

pub use catalog::IndexCatalog;

/// Similarity used for ranking. Recorded with the index so a reload ranks the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    InnerProduct,
}

impl DistanceMetric {
    /// Higher is more similar.
    #[must_use]
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            Self::InnerProduct => dot,
            Self::Cosine => {
                let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    return 0.0;
                }
                dot / (norm_a * norm_b)
            }
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::InnerProduct => "inner_product",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cosine" => Some(Self::Cosine),
            "inner_product" => Some(Self::InnerProduct),
            _ => None,
        }
    }
}

/// A unit and its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub unit: RetrievableUnit,
    pub vector: Vec<f32>,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredUnit {
    pub unit: RetrievableUnit,
    pub score: f32,
}

/// Knobs for [`VectorIndex::build`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub batch_size: usize,
    pub concurrency: usize,
    pub metric: DistanceMetric,
    /// Bound on each embedding call; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from(&IndexConfig::default())
    }
}

impl From<&IndexConfig> for BuildOptions {
    fn from(config: &IndexConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            concurrency: config.concurrency,
            metric: config.metric,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    pub(crate) repository_id: String,
    pub(crate) dimensions: usize,
    pub(crate) metric: DistanceMetric,
    pub(crate) document_count: usize,
    pub(crate) description: Option<String>,
    pub(crate) built_at: DateTime<Utc>,
    pub(crate) entries: Vec<IndexEntry>,
}

/// Text handed to the embedder for a unit: the path header gives the vector
/// some signal about where the code lives.
fn embedding_text(unit: &RetrievableUnit) -> String {
    format!("# {}\n{}", unit.source_path, unit.text)
}

impl VectorIndex {
    /// An index with no units. Searching it always returns nothing.
    pub fn new(repository_id: impl Into<String>, dimensions: usize, metric: DistanceMetric) -> Self {
        Self {
            repository_id: repository_id.into(),
            dimensions,
            metric,
            document_count: 0,
            description: None,
            built_at: Utc::now(),
            entries: Vec::new(),
        }
    }

    /// Embed every unit and assemble the index.
    ///
    /// All-or-nothing: any embedding failure, timeout or malformed vector fails
    /// the whole build and nothing is returned. Batches run up to
    /// `options.concurrency` at a time; insertion order follows `units`.
    pub async fn build<E: Embedder + ?Sized>(
        repository_id: &str,
        units: Vec<RetrievableUnit>,
        embedder: &E,
        options: &BuildOptions,
        progress: Option<&ProgressBar>,
    ) -> Result<Self, IndexError> {
        if units.is_empty() {
            return Err(ConfigError::EmptyRepository {
                repository_id: repository_id.to_string(),
            }
            .into());
        }
        if options.batch_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "index.batch_size",
            }
            .into());
        }
        if options.concurrency == 0 {
            return Err(ConfigError::NotPositive {
                field: "index.concurrency",
            }
            .into());
        }

        let mut seen = HashSet::with_capacity(units.len());
        for unit in &units {
            if unit.repository_id != repository_id {
                return Err(ConfigError::Invalid(format!(
                    "unit {} belongs to repository {}, not {repository_id}",
                    unit.source_path, unit.repository_id
                ))
                .into());
            }
            if !seen.insert(unit.id()) {
                return Err(ConfigError::DuplicateUnit {
                    repository_id: repository_id.to_string(),
                    path: unit.source_path.clone(),
                    start_offset: unit.start_offset,
                }
                .into());
            }
        }

        let dimensions = embedder.dimensions();
        info!(
            "Building index for {repository_id}: {} units, {dimensions} dims, model {}",
            units.len(),
            embedder.model_name()
        );

        let batches: Vec<Vec<String>> = units
            .chunks(options.batch_size)
            .map(|batch| batch.iter().map(embedding_text).collect())
            .collect();

        let vectors: Vec<Vec<Vec<f32>>> = stream::iter(batches)
            .map(|batch| async move {
                let vectors = embed_with_timeout(embedder, &batch, options.timeout).await?;
                if vectors.len() != batch.len() {
                    return Err(IndexError::Corruption(format!(
                        "embedder returned {} vectors for {} texts",
                        vectors.len(),
                        batch.len()
                    )));
                }
                if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
                    return Err(ConfigError::DimensionMismatch {
                        expected: dimensions,
                        actual: bad.len(),
                    }
                    .into());
                }
                if let Some(pb) = progress {
                    pb.inc(batch.len() as u64);
                }
                debug!("Embedded batch of {}", batch.len());
                Ok::<_, IndexError>(vectors)
            })
            .buffered(options.concurrency)
            .try_collect()
            .await?;

        let entries: Vec<IndexEntry> = units
            .into_iter()
            .zip(vectors.into_iter().flatten())
            .map(|(unit, vector)| IndexEntry { unit, vector })
            .collect();

        info!("Built index for {repository_id} with {} units", entries.len());

        Ok(Self {
            repository_id: repository_id.to_string(),
            dimensions,
            metric: options.metric,
            document_count: 0,
            description: None,
            built_at: Utc::now(),
            entries,
        })
    }

    #[must_use]
    pub fn with_document_count(mut self, document_count: usize) -> Self {
        self.document_count = document_count;
        self
    }

    /// Free-text summary of the repository, shown in every grounded request.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Rank all units against `query` and return the best `k`.
    ///
    /// Returns `min(k, len)` hits, best first; equal scores keep insertion
    /// order. An empty index yields an empty result for any query.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredUnit>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimensions {
            return Err(ConfigError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            }
            .into());
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let score = self.metric.score(query, &entry.vector);
                (i, if score.is_nan() { f32::NEG_INFINITY } else { score })
            })
            .collect();

        // sort_by is stable, so ties stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredUnit {
                unit: self.entries[i].unit.clone(),
                score,
            })
            .collect())
    }

    #[must_use]
    pub fn repository_id(&self) -> &str {
        &self.repository_id
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    #[must_use]
    pub fn document_count(&self) -> usize {
        self.document_count
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn units(&self) -> impl Iterator<Item = &RetrievableUnit> {
        self.entries.iter().map(|e| &e.unit)
    }
}

async fn embed_with_timeout<E: Embedder + ?Sized>(
    embedder: &E,
    texts: &[String],
    timeout: Option<Duration>,
) -> Result<Vec<Vec<f32>>, IndexError> {
    let call = embedder.embed_batch(texts);
    let vectors = match timeout {
        Some(after) => tokio::time::timeout(after, call)
            .await
            .map_err(|_| CapabilityError::Timeout {
                capability: "embedding",
                after,
            })?,
        None => call.await,
    }?;
    Ok(vectors)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::embedder::mock::MockEmbedder;

    pub(crate) fn unit(repo: &str, path: &str, start: usize, text: &str) -> RetrievableUnit {
        RetrievableUnit {
            text: text.to_string(),
            source_path: path.to_string(),
            start_offset: start,
            end_offset: start + text.len(),
            start_line: 1,
            end_line: 1,
            repository_id: repo.to_string(),
        }
    }

    pub(crate) fn sample_units() -> Vec<RetrievableUnit> {
        vec![
            unit("repo", "src/config.rs", 0, "fn parse_config(path: &str) -> Config { read config file }"),
            unit("repo", "src/server.rs", 0, "async fn serve(listener: TcpListener) { accept connections }"),
            unit("repo", "src/error.rs", 0, "enum Error { Io, Parse } error handling for config parsing"),
        ]
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = DistanceMetric::Cosine.score(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_and_zero() {
        assert!(DistanceMetric::Cosine.score(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(DistanceMetric::Cosine.score(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_inner_product_keeps_magnitude() {
        assert_eq!(DistanceMetric::InnerProduct.score(&[2.0, 0.0], &[3.0, 0.0]), 6.0);
    }

    #[test]
    fn test_metric_names_round_trip() {
        for metric in [DistanceMetric::Cosine, DistanceMetric::InnerProduct] {
            assert_eq!(DistanceMetric::parse(metric.as_str()), Some(metric));
        }
        assert_eq!(DistanceMetric::parse("l2"), None);
    }

    #[tokio::test]
    async fn test_build_and_search() {
        let embedder = MockEmbedder::new(512);
        let index = VectorIndex::build("repo", sample_units(), &embedder, &BuildOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.dimensions(), 512);

        let query = embedder.embed("parse_config config file").await.unwrap();
        let hits = index.search(&query, 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].unit.source_path, "src/config.rs");
    }

    #[tokio::test]
    async fn test_k_larger_than_index() {
        let embedder = MockEmbedder::new(32);
        let index = VectorIndex::build("repo", sample_units(), &embedder, &BuildOptions::default(), None)
            .await
            .unwrap();
        let query = embedder.embed("anything").await.unwrap();
        assert_eq!(index.search(&query, 6).unwrap().len(), 3);
        assert!(index.search(&query, 0).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = VectorIndex::new("repo", 2, DistanceMetric::InnerProduct);
        for (i, path) in ["a.rs", "b.rs", "c.rs"].into_iter().enumerate() {
            index.entries.push(IndexEntry {
                unit: unit("repo", path, i, "same"),
                vector: vec![1.0, 0.0],
            });
        }
        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let paths: Vec<&str> = hits.iter().map(|h| h.unit.source_path.as_str()).collect();
        assert_eq!(paths, vec!["a.rs", "b.rs", "c.rs"]);
    }

    #[test]
    fn test_empty_index_search_is_empty() {
        let index = VectorIndex::new("repo", 8, DistanceMetric::Cosine);
        assert!(index.search(&[1.0; 3], 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_dimension_mismatch() {
        let embedder = MockEmbedder::new(16);
        let index = VectorIndex::build("repo", sample_units(), &embedder, &BuildOptions::default(), None)
            .await
            .unwrap();
        assert!(matches!(
            index.search(&[0.5; 8], 3),
            Err(IndexError::Config(ConfigError::DimensionMismatch {
                expected: 16,
                actual: 8
            }))
        ));
    }

    #[tokio::test]
    async fn test_build_rejects_empty_and_duplicates() {
        let embedder = MockEmbedder::new(16);
        let empty = VectorIndex::build("repo", vec![], &embedder, &BuildOptions::default(), None).await;
        assert!(matches!(
            empty,
            Err(IndexError::Config(ConfigError::EmptyRepository { .. }))
        ));

        let mut units = sample_units();
        units.push(units[0].clone());
        let dup = VectorIndex::build("repo", units, &embedder, &BuildOptions::default(), None).await;
        assert!(matches!(
            dup,
            Err(IndexError::Config(ConfigError::DuplicateUnit { .. }))
        ));
    }

    #[tokio::test]
    async fn test_build_fails_whole_on_one_bad_unit() {
        let embedder = MockEmbedder::new(16).failing_on("TcpListener");
        let options = BuildOptions {
            batch_size: 1,
            ..BuildOptions::default()
        };
        let result = VectorIndex::build("repo", sample_units(), &embedder, &options, None).await;
        assert!(matches!(
            result,
            Err(IndexError::Capability(CapabilityError::Embedding(_)))
        ));
    }

    #[tokio::test]
    async fn test_build_timeout() {
        let embedder = MockEmbedder::new(16).with_delay(Duration::from_millis(200));
        let options = BuildOptions {
            timeout: Some(Duration::from_millis(10)),
            ..BuildOptions::default()
        };
        let result = VectorIndex::build("repo", sample_units(), &embedder, &options, None).await;
        assert!(matches!(
            result,
            Err(IndexError::Capability(CapabilityError::Timeout { .. }))
        ));
    }

    #[tokio::test]
    async fn test_batched_build_matches_single_batch() {
        let embedder = MockEmbedder::new(32);
        let one = VectorIndex::build("repo", sample_units(), &embedder, &BuildOptions::default(), None)
            .await
            .unwrap();
        let options = BuildOptions {
            batch_size: 1,
            concurrency: 3,
            ..BuildOptions::default()
        };
        let many = VectorIndex::build("repo", sample_units(), &embedder, &options, None)
            .await
            .unwrap();
        assert_eq!(one.entries, many.entries);
    }
}
