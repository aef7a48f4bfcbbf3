/// Configuration module for repochat.
///
/// Handles loading, validating, and providing default configuration values.
/// Each component receives its own slice of the configuration at construction.
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::composer;
use crate::error::ConfigError;
use crate::index::DistanceMetric;

// ── Default value functions ──────────────────────────────────────────

fn default_max_size() -> usize {
    1000
}

fn default_overlap() -> usize {
    200
}

fn default_top_k() -> usize {
    6
}

fn default_token_budget() -> usize {
    6000
}

fn default_history_turns() -> usize {
    4
}

fn default_dedup_window_turns() -> usize {
    3
}

fn default_max_turns() -> usize {
    20
}

fn default_capability_timeout_secs() -> u64 {
    60
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./vector_stores")
}

fn default_batch_size() -> usize {
    32
}

fn default_concurrency() -> usize {
    4
}

fn default_mock_provider() -> String {
    "mock".to_string()
}

fn default_embedding_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_generation_provider() -> String {
    "openai".to_string()
}

fn default_generation_base_url() -> String {
    "https://api.groq.com/openai/v1".to_string()
}

fn default_generation_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_generation_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

// ── Config structs ───────────────────────────────────────────────────

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkerConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub composer: ComposerConfig,

    #[serde(default)]
    pub conversation: ConversationConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Maximum unit size in chars.
    #[serde(default = "default_max_size")]
    pub max_size: usize,

    /// Chars shared by consecutive units of one document.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ComposerConfig {
    /// Upper bound on the estimated tokens of a composed request.
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Most recent turns considered for the history excerpt.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Recent turns whose citations suppress overlapping retrieved units.
    #[serde(default = "default_dedup_window_turns")]
    pub dedup_window_turns: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct ConversationConfig {
    /// Turns retained before the oldest is evicted.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    #[serde(default = "default_capability_timeout_secs")]
    pub capability_timeout_secs: u64,
}

impl SessionConfig {
    #[must_use]
    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IndexConfig {
    /// Directory holding one index file per repository.
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    /// Units per embedding call during a build.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Embedding batches in flight at once during a build.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub metric: DistanceMetric,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// `mock` or `openai` (any OpenAI-compatible `/embeddings` endpoint).
    #[serde(default = "default_mock_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GenerationConfig {
    /// `mock` or `openai` (any OpenAI-compatible chat completions endpoint).
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    #[serde(default = "default_generation_base_url")]
    pub base_url: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_generation_key_env")]
    pub api_key_env: String,
}

// ── Default impls ────────────────────────────────────────────────────

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            overlap: default_overlap(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            history_turns: default_history_turns(),
            dedup_window_turns: default_dedup_window_turns(),
        }
    }
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            capability_timeout_secs: default_capability_timeout_secs(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            metric: DistanceMetric::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_mock_provider(),
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            dimensions: default_dimensions(),
            api_key_env: default_embedding_key_env(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            base_url: default_generation_base_url(),
            model: default_generation_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key_env: default_generation_key_env(),
        }
    }
}

// ── Validation ───────────────────────────────────────────────────────

fn ensure_positive(value: usize, field: &'static str) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::NotPositive { field });
    }
    Ok(())
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_positive(self.max_size, "chunking.max_size")?;
        if self.overlap >= self.max_size {
            return Err(ConfigError::InvalidChunking {
                max_size: self.max_size,
                overlap: self.overlap,
            });
        }
        Ok(())
    }
}

impl ComposerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let minimum = composer::minimum_token_budget();
        if self.token_budget < minimum {
            return Err(ConfigError::TokenBudgetTooSmall {
                budget: self.token_budget,
                minimum,
            });
        }
        Ok(())
    }
}

// ── Config implementation ────────────────────────────────────────────

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// A missing file yields the defaults. An unreadable or malformed file is an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            info!("{} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let cfg: Config = serde_json::from_str(&data)
            .with_context(|| format!("invalid JSON in config: {}", path.display()))?;

        info!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }

    /// Save configuration to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self).context("failed to marshal config")?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;
        ensure_positive(self.retrieval.top_k, "retrieval.top_k")?;
        self.composer.validate()?;
        ensure_positive(self.conversation.max_turns, "conversation.max_turns")?;
        if self.session.capability_timeout_secs == 0 {
            return Err(ConfigError::NotPositive {
                field: "session.capability_timeout_secs",
            });
        }
        ensure_positive(self.index.batch_size, "index.batch_size")?;
        ensure_positive(self.index.concurrency, "index.concurrency")?;
        ensure_positive(self.embedding.dimensions, "embedding.dimensions")?;
        for (field, provider) in [
            ("embedding.provider", &self.embedding.provider),
            ("generation.provider", &self.generation.provider),
        ] {
            if !matches!(provider.as_str(), "mock" | "openai") {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be \"mock\" or \"openai\", got \"{provider}\""
                )));
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────
