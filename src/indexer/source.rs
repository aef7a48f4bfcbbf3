use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use ignore::{Walk, WalkBuilder};
use tracing::{debug, warn};

use crate::models::Document;

/// Extensions indexed by [`FsSource`].
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "js", "jsx", "ts", "tsx", "java", "cpp", "c", "h", "cs", "rb", "go", "rs", "php",
    "swift", "kt", "scala", "md", "txt", "json", "yaml", "yml", "toml", "xml",
];

/// Directory names never descended into by [`FsSource`].
pub const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "__pycache__",
    "venv",
    "env",
    ".venv",
    "dist",
    "build",
    ".next",
    "target",
    "vendor",
];

/// A single-pass supply of documents for one repository.
///
/// The chunker only sees what this yields; how documents are produced is
/// up to the implementation.
pub trait DocumentSource {
    fn next_document(&mut self) -> Option<Document>;
}

/// In-memory source, mainly for tests and embedding callers.
#[derive(Debug, Default)]
pub struct VecSource {
    docs: VecDeque<Document>,
}

impl VecSource {
    pub fn new(docs: impl IntoIterator<Item = Document>) -> Self {
        Self {
            docs: docs.into_iter().collect(),
        }
    }
}

impl DocumentSource for VecSource {
    fn next_document(&mut self) -> Option<Document> {
        self.docs.pop_front()
    }
}

/// Walks a checked-out repository on disk.
///
/// Respects `.gitignore`, skips hidden entries and [`SKIP_DIRS`], keeps only
/// [`SOURCE_EXTENSIONS`], and drops unreadable or non-UTF-8 files with a warning.
/// Paths are reported relative to the root with `/` separators, in file-name order.
pub struct FsSource {
    root: PathBuf,
    walker: Walk,
}

impl FsSource {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        let walker = WalkBuilder::new(&root)
            .filter_entry(|entry| {
                let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                !(is_dir && entry.depth() > 0 && is_skipped_dir(entry.file_name()))
            })
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();
        Self { root, walker }
    }

    fn relative_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.to_string_lossy().replace('\\', "/")
    }
}

fn is_skipped_dir(name: &OsStr) -> bool {
    name.to_str().is_some_and(|n| SKIP_DIRS.contains(&n))
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

impl DocumentSource for FsSource {
    fn next_document(&mut self) -> Option<Document> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {e}");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_some_and(|t| t.is_file()) || !has_source_extension(path) {
                continue;
            }
            match std::fs::read_to_string(path) {
                Ok(text) => {
                    let rel = self.relative_path(path);
                    debug!("Read {rel} ({} bytes)", text.len());
                    return Some(Document::new(rel, text));
                }
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                }
            }
        }
    }
}
