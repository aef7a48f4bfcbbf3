//! Boundary-aware sliding-window chunker.
//!
//! Every unit holds at most `max_size` chars and consecutive units of one
//! document share at least `overlap` chars. Each cut lands on the coarsest
//! boundary available near the target position: a blank line, then a line
//! break, then whitespace, and only then a raw char position.
use crate::config::ChunkerConfig;
use crate::error::ConfigError;
use crate::models::{Document, RetrievableUnit};

/// Separator kinds, coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Line,
    Word,
}

impl Boundary {
    const ORDER: [Boundary; 3] = [Boundary::Paragraph, Boundary::Line, Boundary::Word];

    /// Whether a cut right before `chars[pos]` falls on this boundary.
    fn is_cut(self, chars: &[char], pos: usize) -> bool {
        if pos == 0 || pos >= chars.len() {
            return false;
        }
        match self {
            Boundary::Paragraph => pos >= 2 && chars[pos - 1] == '\n' && chars[pos - 2] == '\n',
            Boundary::Line => chars[pos - 1] == '\n',
            Boundary::Word => chars[pos - 1].is_whitespace(),
        }
    }
}

/// Splits documents of one repository into [`RetrievableUnit`]s.
#[derive(Debug, Clone)]
pub struct Chunker {
    repository_id: String,
    config: ChunkerConfig,
}

impl Chunker {
    /// Fails fast on `overlap >= max_size` or `max_size == 0`.
    pub fn new(repository_id: impl Into<String>, config: ChunkerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            repository_id: repository_id.into(),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    /// Split a document. Empty or whitespace-only documents yield no units.
    #[must_use]
    pub fn chunk(&self, document: &Document) -> Vec<RetrievableUnit> {
        let text = document.text.as_str();
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        // byte_at[i] is the byte offset of char i; the extra entry is text.len().
        let byte_at: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let lines = LineIndex::new(text);

        split_spans(&chars, self.config.max_size, self.config.overlap)
            .into_iter()
            .map(|(start, end)| {
                let start_offset = byte_at[start];
                let end_offset = byte_at[end];
                RetrievableUnit {
                    text: text[start_offset..end_offset].to_string(),
                    source_path: document.path.clone(),
                    start_offset,
                    end_offset,
                    start_line: lines.line_of(start_offset),
                    end_line: lines.line_of(end_offset - 1),
                    repository_id: self.repository_id.clone(),
                }
            })
            .collect()
    }
}

/// Char spans `[start, end)` covering `chars`.
fn split_spans(chars: &[char], max_size: usize, overlap: usize) -> Vec<(usize, usize)> {
    let len = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    loop {
        let hard_end = start + max_size;
        if hard_end >= len {
            spans.push((start, len));
            return spans;
        }

        // End no earlier than half a window in, and past the overlap so the
        // next start moves forward.
        let lo = (start + max_size / 2).max(start + overlap + 1);
        let end = latest_cut(chars, lo, hard_end);
        spans.push((start, end));

        let hi = end - overlap;
        let back = (max_size - overlap) / 2;
        let next_lo = hi.saturating_sub(back).max(start + 1);
        start = latest_cut(chars, next_lo, hi);
    }
}

/// Latest position in `lo..=hi` on the coarsest boundary present, else `hi`.
fn latest_cut(chars: &[char], lo: usize, hi: usize) -> usize {
    for boundary in Boundary::ORDER {
        if let Some(pos) = (lo..=hi).rev().find(|&p| boundary.is_cut(chars, p)) {
            return pos;
        }
    }
    hi
}

/// Maps byte offsets to 1-based line numbers.
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(text: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { starts }
    }

    fn line_of(&self, byte: usize) -> usize {
        self.starts.partition_point(|&s| s <= byte)
    }
}
