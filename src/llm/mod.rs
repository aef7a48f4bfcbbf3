//! Answer-generation capability.
//!
//! The engine hands a generator one [`GroundedRequest`] and expects text back,
//! optionally with the subset of provided units the answer actually drew on.
pub mod mock;
pub mod openai;

use async_trait::async_trait;

pub use crate::error::GenerationError;
use crate::composer::GroundedRequest;
use crate::models::{RetrievableUnit, UnitId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAnswer {
    pub text: String,
    /// Units the answer cites, when the generator can tell.
    pub used_units: Option<Vec<UnitId>>,
}

impl GeneratedAnswer {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            used_units: None,
        }
    }

    #[must_use]
    pub fn with_used_units(mut self, units: Vec<UnitId>) -> Self {
        self.used_units = Some(units);
        self
    }
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn generate(&self, request: &GroundedRequest) -> Result<GeneratedAnswer, GenerationError>;

    fn name(&self) -> &str;
}

/// Units whose source path occurs in `text`, in the order given.
pub fn units_mentioned(text: &str, units: &[RetrievableUnit]) -> Vec<UnitId> {
    units
        .iter()
        .filter(|u| text.contains(u.source_path.as_str()))
        .map(RetrievableUnit::id)
        .collect()
}
