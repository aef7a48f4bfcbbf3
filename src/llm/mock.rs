//! Scripted generator for tests and offline runs.
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{AnswerGenerator, GeneratedAnswer, GenerationError};
use crate::composer::GroundedRequest;
use crate::models::UnitId;

#[derive(Debug, Clone)]
pub struct MockGenerator {
    responses: Arc<Mutex<Vec<String>>>,
    requests: Arc<Mutex<Vec<GroundedRequest>>>,
    pub default_response: String,
    pub fail: bool,
    pub delay: Option<Duration>,
    /// Reported as the answer's used units when set.
    pub used_units: Option<Vec<UnitId>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock answer".into(),
            fail: false,
            delay: None,
            used_units: None,
        }
    }
}

impl MockGenerator {
    /// Answers in order, then falls back to `default_response`.
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_used_units(mut self, units: Vec<UnitId>) -> Self {
        self.used_units = Some(units);
        self
    }

    /// Every request received so far, oldest first. Shared between clones.
    #[must_use]
    pub fn requests(&self) -> Vec<GroundedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AnswerGenerator for MockGenerator {
    async fn generate(&self, request: &GroundedRequest) -> Result<GeneratedAnswer, GenerationError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(GenerationError::Other("mock generation error".into()));
        }
        let text = {
            let mut responses = self.responses.lock().unwrap_or_else(PoisonError::into_inner);
            if responses.is_empty() {
                self.default_response.clone()
            } else {
                responses.remove(0)
            }
        };
        let answer = GeneratedAnswer::new(text);
        Ok(match &self.used_units {
            Some(units) => answer.with_used_units(units.clone()),
            None => answer,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composer::RepositoryInfo;

    fn request() -> GroundedRequest {
        GroundedRequest {
            repository: RepositoryInfo::default(),
            question: "q".into(),
            history: vec![],
            units: vec![],
            deduplicated: 0,
            truncated: 0,
        }
    }

    #[tokio::test]
    async fn test_responses_then_default() {
        let generator = MockGenerator::with_responses(vec!["first".into()]);
        assert_eq!(generator.generate(&request()).await.unwrap().text, "first");
        assert_eq!(generator.generate(&request()).await.unwrap().text, "mock answer");
        assert_eq!(generator.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_failing() {
        assert!(MockGenerator::failing().generate(&request()).await.is_err());
    }
}
