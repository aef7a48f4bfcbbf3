//! Conversation log and follow-up rewriting.
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::models::Citation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    Answered,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// The question as the user typed it.
    pub question: String,
    /// What was actually sent to retrieval.
    pub standalone_query: String,
    pub answer: String,
    /// Units passed to composition, in rank order. Empty for failed turns.
    pub cited_units: Vec<Citation>,
    pub timestamp: DateTime<Utc>,
    pub outcome: TurnOutcome,
}

impl ConversationTurn {
    pub fn answered(
        question: impl Into<String>,
        standalone_query: impl Into<String>,
        answer: impl Into<String>,
        cited_units: Vec<Citation>,
    ) -> Self {
        Self {
            question: question.into(),
            standalone_query: standalone_query.into(),
            answer: answer.into(),
            cited_units,
            timestamp: Utc::now(),
            outcome: TurnOutcome::Answered,
        }
    }

    /// Placeholder turn recorded when a question could not be answered.
    pub fn failed(
        question: impl Into<String>,
        standalone_query: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let reason = reason.into();
        Self {
            question: question.into(),
            standalone_query: standalone_query.into(),
            answer: format!("[no answer: {reason}]"),
            cited_units: Vec::new(),
            timestamp: Utc::now(),
            outcome: TurnOutcome::Failed { reason },
        }
    }

    #[must_use]
    pub fn is_answered(&self) -> bool {
        self.outcome == TurnOutcome::Answered
    }
}

/// Append-only log of the last `max_turns` turns; the oldest is evicted on overflow.
#[derive(Debug, Clone)]
pub struct ConversationState {
    turns: VecDeque<ConversationTurn>,
    max_turns: usize,
    appended: u64,
}

impl ConversationState {
    pub fn new(max_turns: usize) -> Result<Self, ConfigError> {
        if max_turns == 0 {
            return Err(ConfigError::NotPositive {
                field: "conversation.max_turns",
            });
        }
        Ok(Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
            appended: 0,
        })
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        if self.turns.len() == self.max_turns {
            self.turns.pop_front();
        }
        self.turns.push_back(turn);
        self.appended += 1;
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Turns ever appended, evicted ones included. Not reset by [`clear`](Self::clear).
    #[must_use]
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Oldest first.
    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    /// The last `n` turns, newest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter().rev().take(n)
    }

    #[must_use]
    pub fn last_answered(&self) -> Option<&ConversationTurn> {
        self.turns.iter().rev().find(|t| t.is_answered())
    }
}

/// Turns a follow-up into a query answerable without the prior turns.
pub trait QueryRewriter: Send + Sync {
    fn rewrite(&self, question: &str, state: &ConversationState) -> String;
}

const SENTENCE_ENDS: [char; 5] = ['.', '!', '?', '\n', '。'];

/// Prepends the last answered question and a clipped answer summary.
#[derive(Debug, Clone)]
pub struct TemplateRewriter {
    pub summary_chars: usize,
}

impl Default for TemplateRewriter {
    fn default() -> Self {
        Self { summary_chars: 300 }
    }
}

impl TemplateRewriter {
    /// Leading sentences of `answer` within `summary_chars`, whitespace collapsed.
    fn summarize(&self, answer: &str) -> String {
        let answer = answer.trim();
        let clipped = clip_chars(answer, self.summary_chars);
        let summary = if clipped.len() == answer.len() {
            clipped
        } else {
            match clipped
                .char_indices()
                .rev()
                .find(|(_, c)| SENTENCE_ENDS.contains(c))
            {
                Some((i, c)) => &clipped[..i + c.len_utf8()],
                None => clipped,
            }
        };
        summary.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

impl QueryRewriter for TemplateRewriter {
    fn rewrite(&self, question: &str, state: &ConversationState) -> String {
        let Some(previous) = state.last_answered() else {
            return question.to_string();
        };
        format!(
            "Context from previous question: {}\nPrevious answer summary: {}\nFollow-up question: {}",
            previous.question.trim(),
            self.summarize(&previous.answer),
            question
        )
    }
}

/// Longest prefix of `s` with at most `max` chars.
pub(crate) fn clip_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
