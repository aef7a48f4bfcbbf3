//! One conversation bound to one repository index.
//!
//! A session runs the question cycle: rewrite, retrieve, compose, generate,
//! append. The conversation lock doubles as the `AwaitingAnswer` gate: it is
//! taken with `try_lock`, so a second question while one is in flight is
//! rejected with [`SessionError::Busy`] instead of interleaving.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::composer::{ContextComposer, RepositoryInfo};
use crate::config::Config;
use crate::conversation::{ConversationState, ConversationTurn, QueryRewriter, TemplateRewriter};
use crate::embedder::Embedder;
use crate::error::{CapabilityError, ConfigError, SessionError};
use crate::index::VectorIndex;
use crate::llm::AnswerGenerator;
use crate::models::{Citation, RetrievableUnit};
use crate::retriever::Retriever;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    AwaitingAnswer,
    Closed,
}

/// A line of user input, with the control words split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Ask(String),
    Clear,
    Quit,
}

impl SessionCommand {
    /// `clear` and `quit` (trimmed, any case) are control signals; anything else is a question.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("clear") {
            Self::Clear
        } else if trimmed.eq_ignore_ascii_case("quit") {
            Self::Quit
        } else {
            Self::Ask(trimmed.to_string())
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Answered(Answer),
    Cleared,
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub question: String,
    pub standalone_query: String,
    pub text: String,
    /// Units the answer cites: the generator's pick when it made one, else all context units.
    pub sources: Vec<RetrievableUnit>,
    /// Units passed to the generator, in rank order.
    pub context_units: Vec<RetrievableUnit>,
    pub estimated_tokens: usize,
}

impl Answer {
    /// Distinct source paths, in citation order.
    #[must_use]
    pub fn source_files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = Vec::new();
        for unit in &self.sources {
            if !files.contains(&unit.source_path.as_str()) {
                files.push(&unit.source_path);
            }
        }
        files
    }
}

pub struct Session {
    retriever: Retriever,
    generator: Arc<dyn AnswerGenerator>,
    composer: ContextComposer,
    rewriter: Arc<dyn QueryRewriter>,
    repository: RepositoryInfo,
    top_k: usize,
    timeout: Duration,
    state: Mutex<ConversationState>,
    closed: AtomicBool,
}

impl Session {
    /// Validate `config` and bind a fresh conversation to `index`.
    ///
    /// Every configuration problem, including an embedder whose dimensionality
    /// does not match the index, surfaces here rather than mid-conversation.
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn AnswerGenerator>,
        config: &Config,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let timeout = config.session.capability_timeout();
        let repository = RepositoryInfo {
            name: index.repository_id().to_string(),
            document_count: index.document_count(),
            unit_count: index.len(),
            description: index.description().map(str::to_string),
        };
        let retriever = Retriever::new(index, embedder)?.with_timeout(timeout);
        info!(
            "Session opened on {} ({} units), generator {}",
            repository.name,
            repository.unit_count,
            generator.name()
        );
        Ok(Self {
            retriever,
            generator,
            composer: ContextComposer::new(config.composer)?,
            rewriter: Arc::new(TemplateRewriter::default()),
            repository,
            top_k: config.retrieval.top_k,
            timeout,
            state: Mutex::new(ConversationState::new(config.conversation.max_turns)?),
            closed: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn with_rewriter(mut self, rewriter: Arc<dyn QueryRewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }

    #[must_use]
    pub fn repository(&self) -> &RepositoryInfo {
        &self.repository
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        if self.closed.load(Ordering::Acquire) {
            SessionPhase::Closed
        } else if self.state.try_lock().is_err() {
            SessionPhase::AwaitingAnswer
        } else {
            SessionPhase::Idle
        }
    }

    /// Handle one line of user input.
    pub async fn submit(&self, input: &str) -> Result<SessionEvent, SessionError> {
        match SessionCommand::parse(input) {
            SessionCommand::Ask(question) => self.ask(&question).await.map(SessionEvent::Answered),
            SessionCommand::Clear => self.clear().map(|()| SessionEvent::Cleared),
            SessionCommand::Quit => {
                self.quit();
                Ok(SessionEvent::Ended)
            }
        }
    }

    pub async fn ask(&self, question: &str) -> Result<Answer, SessionError> {
        self.ask_with_cancel(question, CancellationToken::new()).await
    }

    /// Run one question cycle, abandoning it if `cancel` fires first.
    ///
    /// Exactly one turn is appended unless the cycle is cancelled or rejected
    /// up front: a successful cycle records the answer, a failed one records a
    /// failure placeholder and returns the error.
    pub async fn ask_with_cancel(
        &self,
        question: &str,
        cancel: CancellationToken,
    ) -> Result<Answer, SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        let question = question.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyQuestion);
        }
        let mut state = self.state.try_lock().map_err(|_| SessionError::Busy)?;

        let standalone = self.rewriter.rewrite(question, &state);
        info!("Question: {question}");
        if standalone != question {
            debug!("Rewritten query: {standalone}");
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("Question cancelled, conversation unchanged");
                return Err(SessionError::Cancelled);
            }
            result = self.answer(&state, question, &standalone) => result,
        };

        if self.closed.load(Ordering::Acquire) {
            info!("Session ended while answering, discarding the turn");
            state.clear();
            return Err(SessionError::Closed);
        }

        match result {
            Ok((answer, citations)) => {
                state.push(ConversationTurn::answered(
                    question,
                    &standalone,
                    &answer.text,
                    citations,
                ));
                Ok(answer)
            }
            Err(e) => {
                warn!("Question failed: {e}");
                state.push(ConversationTurn::failed(question, &standalone, e.to_string()));
                Err(e)
            }
        }
    }

    async fn answer(
        &self,
        state: &ConversationState,
        question: &str,
        standalone: &str,
    ) -> Result<(Answer, Vec<Citation>), SessionError> {
        let retrieved = self.retriever.retrieve(standalone, self.top_k).await?;
        let request = self
            .composer
            .compose(retrieved, state, standalone, &self.repository);
        let estimated_tokens = request.estimated_tokens();
        info!(
            "Composed request: {} units, {} history turns, ~{estimated_tokens} tokens",
            request.units.len(),
            request.history.len()
        );

        let generated = tokio::time::timeout(self.timeout, self.generator.generate(&request))
            .await
            .map_err(|_| CapabilityError::Timeout {
                capability: "generation",
                after: self.timeout,
            })?
            .map_err(CapabilityError::from)?;

        let sources = match &generated.used_units {
            Some(used) if !used.is_empty() => request
                .units
                .iter()
                .filter(|u| used.contains(&u.id()))
                .cloned()
                .collect(),
            _ => request.units.clone(),
        };
        let citations = request.units.iter().map(RetrievableUnit::citation).collect();

        let answer = Answer {
            question: question.to_string(),
            standalone_query: standalone.to_string(),
            text: generated.text,
            sources,
            context_units: request.units,
            estimated_tokens,
        };
        Ok((answer, citations))
    }

    /// Forget the conversation. The index is untouched.
    pub fn clear(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        let mut state = self.state.try_lock().map_err(|_| SessionError::Busy)?;
        state.clear();
        info!("Conversation cleared");
        Ok(())
    }

    /// End the session. Later questions fail with [`SessionError::Closed`],
    /// and a question still in flight is discarded when it completes.
    pub fn quit(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut state) = self.state.try_lock() {
            state.clear();
        }
        info!("Session on {} ended", self.repository.name);
    }

    /// Snapshot of the conversation, oldest first.
    pub fn history(&self) -> Result<Vec<ConversationTurn>, SessionError> {
        let state = self.state.try_lock().map_err(|_| SessionError::Busy)?;
        Ok(state.turns().cloned().collect())
    }
}
