use indicatif::ProgressBar;
use tracing::{debug, info};

use crate::config::{ChunkerConfig, Config};
use crate::embedder::Embedder;
use crate::error::{ConfigError, IndexError};
use crate::index::{BuildOptions, IndexCatalog, VectorIndex};
use crate::indexer::chunker::Chunker;
use crate::indexer::source::DocumentSource;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub documents: usize,
    /// Documents that produced no units (empty or whitespace only).
    pub empty_documents: usize,
    pub units: usize,
    pub dimensions: usize,
}

/// Source → chunker → embedder → [`VectorIndex`].
pub struct Indexer<'a, E: Embedder + ?Sized> {
    pub embedder: &'a E,
    chunking: ChunkerConfig,
    options: BuildOptions,
    progress: Option<ProgressBar>,
    description: Option<String>,
}

impl<'a, E: Embedder + ?Sized> Indexer<'a, E> {
    /// Validates the chunking and index settings up front.
    pub fn new(config: &Config, embedder: &'a E) -> Result<Self, ConfigError> {
        config.chunking.validate()?;
        if config.embedding.dimensions != embedder.dimensions() {
            return Err(ConfigError::DimensionMismatch {
                expected: config.embedding.dimensions,
                actual: embedder.dimensions(),
            });
        }
        let mut options = BuildOptions::from(&config.index);
        options.timeout = Some(config.session.capability_timeout());
        if options.batch_size == 0 {
            return Err(ConfigError::NotPositive {
                field: "index.batch_size",
            });
        }
        if options.concurrency == 0 {
            return Err(ConfigError::NotPositive {
                field: "index.concurrency",
            });
        }
        Ok(Self {
            embedder,
            chunking: config.chunking,
            options,
            progress: None,
            description: None,
        })
    }

    /// Report embedding progress on `bar`. Its length is set once the unit
    /// count is known.
    #[must_use]
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = Some(bar);
        self
    }

    /// Store `description` with the index.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Drain `source` and build a fresh index for `repository_id`.
    pub async fn build<S: DocumentSource + ?Sized>(
        &self,
        repository_id: &str,
        source: &mut S,
    ) -> Result<(VectorIndex, IndexStats), IndexError> {
        let chunker = Chunker::new(repository_id, self.chunking)?;
        let mut stats = IndexStats {
            dimensions: self.embedder.dimensions(),
            ..IndexStats::default()
        };

        let mut units = Vec::new();
        while let Some(document) = source.next_document() {
            stats.documents += 1;
            let chunks = chunker.chunk(&document);
            if chunks.is_empty() {
                stats.empty_documents += 1;
                debug!("{} produced no units", document.path);
            }
            units.extend(chunks);
        }
        stats.units = units.len();
        info!(
            "Chunked {} documents of {repository_id} into {} units",
            stats.documents, stats.units
        );

        if let Some(bar) = &self.progress {
            bar.set_length(units.len() as u64);
        }
        let index = VectorIndex::build(
            repository_id,
            units,
            self.embedder,
            &self.options,
            self.progress.as_ref(),
        )
        .await?
        .with_document_count(stats.documents);
        let index = match &self.description {
            Some(description) => index.with_description(description.clone()),
            None => index,
        };
        if let Some(bar) = &self.progress {
            bar.finish_and_clear();
        }

        Ok((index, stats))
    }

    /// Build and persist into `catalog`, replacing the previous index only
    /// once the new one is complete.
    pub async fn index_into<S: DocumentSource + ?Sized>(
        &self,
        repository_id: &str,
        source: &mut S,
        catalog: &IndexCatalog,
    ) -> Result<(VectorIndex, IndexStats), IndexError> {
        // Fail before embedding anything if another repository owns the file.
        catalog.claim(repository_id)?;
        let (index, stats) = self.build(repository_id, source).await?;
        let path = catalog.save(&index)?;
        info!("Index for {repository_id} written to {}", path.display());
        Ok((index, stats))
    }
}
