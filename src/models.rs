use serde::{Deserialize, Serialize};

/// A raw source file handed to the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    pub text: String,
}

impl Document {
    pub fn new(path: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }
}

/// Identity of a unit: `(repository_id, source_path, start_offset)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub repository_id: String,
    pub source_path: String,
    pub start_offset: usize,
}

/// A bounded, citable excerpt of a source file. Immutable once emitted by the chunker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievableUnit {
    pub text: String,
    pub source_path: String,
    /// Byte offset of the first char, inclusive.
    pub start_offset: usize,
    /// Byte offset one past the last char.
    pub end_offset: usize,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub repository_id: String,
}

impl RetrievableUnit {
    #[must_use]
    pub fn id(&self) -> UnitId {
        UnitId {
            repository_id: self.repository_id.clone(),
            source_path: self.source_path.clone(),
            start_offset: self.start_offset,
        }
    }

    #[must_use]
    pub fn citation(&self) -> Citation {
        Citation {
            id: self.id(),
            end_offset: self.end_offset,
        }
    }

    /// `path:start-end` label used in prompts and answers.
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "{}:{}-{}",
            self.source_path, self.start_line, self.end_line
        )
    }
}

/// A unit reference recorded in a conversation turn.
///
/// Carries the end offset next to the identity so later turns can detect
/// overlapping spans without the index at hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub id: UnitId,
    pub end_offset: usize,
}

impl Citation {
    /// True if both spans sit in the same file and share more than half of the
    /// shorter range.
    #[must_use]
    pub fn overlaps(&self, unit: &RetrievableUnit) -> bool {
        if self.id.repository_id != unit.repository_id || self.id.source_path != unit.source_path
        {
            return false;
        }
        let start = self.id.start_offset.max(unit.start_offset);
        let end = self.end_offset.min(unit.end_offset);
        if end <= start {
            return false;
        }
        let shared = end - start;
        let own = self.end_offset.saturating_sub(self.id.start_offset);
        let other = unit.end_offset.saturating_sub(unit.start_offset);
        shared * 2 > own.min(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(path: &str, start: usize, end: usize) -> RetrievableUnit {
        RetrievableUnit {
            text: "x".repeat(end - start),
            source_path: path.to_string(),
            start_offset: start,
            end_offset: end,
            start_line: 1,
            end_line: 1,
            repository_id: "repo".to_string(),
        }
    }

    #[test]
    fn identity_ignores_text_and_end() {
        let a = unit("src/lib.rs", 0, 100);
        let mut b = a.clone();
        b.end_offset = 90;
        b.text = "other".into();
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn overlap_more_than_half() {
        let cited = unit("src/lib.rs", 0, 100).citation();
        assert!(cited.overlaps(&unit("src/lib.rs", 40, 140)));
        assert!(!cited.overlaps(&unit("src/lib.rs", 50, 150)));
        assert!(!cited.overlaps(&unit("src/main.rs", 0, 100)));
        assert!(!cited.overlaps(&unit("src/lib.rs", 100, 200)));
    }

    #[test]
    fn label_uses_lines() {
        let mut u = unit("src/lib.rs", 0, 10);
        u.start_line = 3;
        u.end_line = 9;
        assert_eq!(u.label(), "src/lib.rs:3-9");
    }
}
