//! Grounded request composition under a token budget.
//!
//! A request is a fixed sequence of pieces: template text, repository header,
//! retrieved units, history excerpt and question. Tokens are estimated per
//! piece, and the estimate of a request is the sum over its pieces, which
//! bounds the estimate of the rendered prompt from above.
//!
//! Packing order when space runs out: the question is kept (clipped only if it
//! alone would overflow), then retrieved units in rank order, then history,
//! newest turn first. History therefore always gives way before grounding.
use std::collections::HashSet;

use serde::Serialize;
use tracing::debug;

use crate::config::ComposerConfig;
use crate::conversation::{ConversationState, clip_chars};
use crate::error::ConfigError;
use crate::models::{Citation, RetrievableUnit};

pub const CHARS_PER_TOKEN: usize = 4;

/// Smallest room left for the question in a valid budget.
const MIN_QUESTION_TOKENS: usize = 32;
const MAX_NAME_CHARS: usize = 100;
const MAX_DESCRIPTION_CHARS: usize = 300;

const PREAMBLE: &str = "You are an expert code assistant analyzing a GitHub repository.\n\
Use the following code snippets to answer the user's question. \
Always cite the specific file paths when referencing code.\n\n";
const CONTEXT_HEADER: &str = "Code Context:\n";
const NO_CONTEXT: &str = "No matching code found in the repository for this question.\n\n";
const HISTORY_HEADER: &str = "Chat History:\n";
const NO_HISTORY: &str = "(no previous questions)\n\n";
const QUESTION_PREFIX: &str = "Question: ";
const QUESTION_SUFFIX: &str = "\n\n";
const INSTRUCTIONS: &str = "Instructions:
- Provide accurate, detailed answers based on the code provided
- Always mention specific file paths and line references when possible
- If no code context was found or you're not certain, say so
- Use code snippets to illustrate your points
- Be concise but thorough

Answer:";

/// Rough token count: one token per four chars, rounded up.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Descriptive header for the repository a session is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub document_count: usize,
    pub unit_count: usize,
    pub description: Option<String>,
}

impl RepositoryInfo {
    fn render(&self) -> String {
        let mut out = format!(
            "Repository Information:\nRepository: {}\n",
            clip_chars(&self.name, MAX_NAME_CHARS)
        );
        if let Some(description) = &self.description {
            out.push_str("Description: ");
            out.push_str(clip_chars(description, MAX_DESCRIPTION_CHARS));
            out.push('\n');
        }
        out.push_str(&format!(
            "Total Files: {}\nIndexed Units: {}\n\n",
            self.document_count, self.unit_count
        ));
        out
    }
}

/// A prior turn as shown to the generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub question: String,
    pub answer: String,
}

/// Payload for the answer-generation capability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroundedRequest {
    pub repository: RepositoryInfo,
    pub question: String,
    /// Oldest first.
    pub history: Vec<HistoryEntry>,
    /// Rank order.
    pub units: Vec<RetrievableUnit>,
    /// Retrieved units dropped as repeats of recently cited spans.
    pub deduplicated: usize,
    /// Retrieved units that did not fit the budget.
    pub truncated: usize,
}

fn unit_piece(unit: &RetrievableUnit) -> String {
    format!("--- {} ---\n{}\n\n", unit.label(), unit.text)
}

fn history_piece(entry: &HistoryEntry) -> String {
    format!("Q: {}\nA: {}\n\n", entry.question, entry.answer)
}

fn question_piece(question: &str) -> String {
    format!("{QUESTION_PREFIX}{question}{QUESTION_SUFFIX}")
}

/// Tokens of every piece that does not depend on units, history or question.
/// The empty-section markers are always reserved.
fn overhead_tokens(repository: &RepositoryInfo) -> usize {
    [PREAMBLE, CONTEXT_HEADER, NO_CONTEXT, HISTORY_HEADER, NO_HISTORY, INSTRUCTIONS]
        .iter()
        .map(|p| estimate_tokens(p))
        .sum::<usize>()
        + estimate_tokens(&repository.render())
}

/// Smallest `token_budget` a [`ContextComposer`] accepts.
#[must_use]
pub fn minimum_token_budget() -> usize {
    let widest = RepositoryInfo {
        name: "n".repeat(MAX_NAME_CHARS),
        document_count: usize::MAX,
        unit_count: usize::MAX,
        description: Some("d".repeat(MAX_DESCRIPTION_CHARS)),
    };
    overhead_tokens(&widest) + estimate_tokens(&question_piece("")) + MIN_QUESTION_TOKENS
}

impl GroundedRequest {
    /// The request as an ordered list of prompt fragments.
    #[must_use]
    pub fn pieces(&self) -> Vec<String> {
        let mut pieces = vec![
            PREAMBLE.to_string(),
            self.repository.render(),
            CONTEXT_HEADER.to_string(),
        ];
        if self.units.is_empty() {
            pieces.push(NO_CONTEXT.to_string());
        } else {
            pieces.extend(self.units.iter().map(unit_piece));
        }
        pieces.push(HISTORY_HEADER.to_string());
        if self.history.is_empty() {
            pieces.push(NO_HISTORY.to_string());
        } else {
            pieces.extend(self.history.iter().map(history_piece));
        }
        pieces.push(question_piece(&self.question));
        pieces.push(INSTRUCTIONS.to_string());
        pieces
    }

    /// The full prompt text.
    #[must_use]
    pub fn render(&self) -> String {
        self.pieces().concat()
    }

    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        self.pieces().iter().map(|p| estimate_tokens(p)).sum()
    }

    /// False when retrieval came back empty (or everything was deduplicated).
    #[must_use]
    pub fn has_context(&self) -> bool {
        !self.units.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ContextComposer {
    config: ComposerConfig,
}

impl ContextComposer {
    pub fn new(config: ComposerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Build a request whose [`estimated_tokens`](GroundedRequest::estimated_tokens)
    /// never exceeds the configured budget.
    pub fn compose(
        &self,
        retrieved: Vec<RetrievableUnit>,
        state: &ConversationState,
        question: &str,
        repository: &RepositoryInfo,
    ) -> GroundedRequest {
        let budget = self.config.token_budget;
        let mut remaining = budget.saturating_sub(overhead_tokens(repository));

        // Question first: clip it to whatever the fixed pieces leave.
        let mut question = question.to_string();
        if estimate_tokens(&question_piece(&question)) > remaining {
            let frame = QUESTION_PREFIX.chars().count() + QUESTION_SUFFIX.chars().count();
            let max_chars = (remaining * CHARS_PER_TOKEN).saturating_sub(frame);
            question = clip_chars(&question, max_chars).to_string();
            debug!("Question clipped to {max_chars} chars");
        }
        remaining = remaining.saturating_sub(estimate_tokens(&question_piece(&question)));

        let recent: Vec<&Citation> = state
            .recent(self.config.dedup_window_turns)
            .flat_map(|t| t.cited_units.iter())
            .collect();
        let mut seen = HashSet::new();
        let mut deduplicated = 0;
        let candidates: Vec<RetrievableUnit> = retrieved
            .into_iter()
            .filter(|unit| {
                let fresh = seen.insert(unit.id()) && !recent.iter().any(|c| c.overlaps(unit));
                if !fresh {
                    deduplicated += 1;
                }
                fresh
            })
            .collect();

        let total = candidates.len();
        let mut units = Vec::with_capacity(total);
        for unit in candidates {
            let cost = estimate_tokens(&unit_piece(&unit));
            if cost > remaining {
                break;
            }
            remaining -= cost;
            units.push(unit);
        }
        let truncated = total - units.len();

        let mut history = Vec::new();
        for turn in state
            .recent(state.len())
            .filter(|t| t.is_answered())
            .take(self.config.history_turns)
        {
            let entry = HistoryEntry {
                question: turn.question.clone(),
                answer: turn.answer.clone(),
            };
            let cost = estimate_tokens(&history_piece(&entry));
            if cost > remaining {
                break;
            }
            remaining -= cost;
            history.push(entry);
        }
        history.reverse();

        debug!(
            "Composed {} units ({deduplicated} deduplicated, {truncated} over budget), {} history turns",
            units.len(),
            history.len()
        );

        GroundedRequest {
            repository: repository.clone(),
            question,
            history,
            units,
            deduplicated,
            truncated,
        }
    }
}
