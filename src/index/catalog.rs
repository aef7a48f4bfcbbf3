use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::VectorIndex;
use crate::error::IndexError;

const INDEX_EXTENSION: &str = "db";

/// Directory of saved indices, one `<repository>.db` file each.
#[derive(Debug, Clone)]
pub struct IndexCatalog {
    root: PathBuf,
}

impl IndexCatalog {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File holding the index of `repository_id`. Characters outside
    /// `[A-Za-z0-9._-]` are replaced, so distinct ids can share a file name;
    /// the id stored inside the file settles which repository owns it.
    #[must_use]
    pub fn path_for(&self, repository_id: &str) -> PathBuf {
        let name: String = repository_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{name}.{INDEX_EXTENSION}"))
    }

    #[must_use]
    pub fn exists(&self, repository_id: &str) -> bool {
        VectorIndex::stored_repository_id(self.path_for(repository_id))
            .is_ok_and(|stored| stored == repository_id)
    }

    /// Repository ids with a saved index, sorted. A missing store directory
    /// simply holds nothing; unreadable files are skipped with a warning.
    pub fn list(&self) -> Result<Vec<String>, IndexError> {
        if !self.root.is_dir() {
            debug!("Store dir {} does not exist", self.root.display());
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(INDEX_EXTENSION) {
                continue;
            }
            match VectorIndex::stored_repository_id(&path) {
                Ok(id) => names.push(id),
                Err(e) => warn!("Skipping {}: {e}", path.display()),
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn open(&self, repository_id: &str) -> Result<VectorIndex, IndexError> {
        let path = self.path_for(repository_id);
        if !path.is_file() {
            return Err(IndexError::NotFound(repository_id.to_string()));
        }
        let index = VectorIndex::load(&path)?;
        if index.repository_id() != repository_id {
            return Err(mismatch(&path, repository_id, index.repository_id()));
        }
        Ok(index)
    }

    /// Path `repository_id` would be saved to, provided no other repository
    /// already owns it. A file whose id cannot be read may be replaced.
    pub fn claim(&self, repository_id: &str) -> Result<PathBuf, IndexError> {
        let path = self.path_for(repository_id);
        if !path.is_file() {
            return Ok(path);
        }
        match VectorIndex::stored_repository_id(&path) {
            Ok(stored) if stored != repository_id => Err(mismatch(&path, repository_id, &stored)),
            Ok(_) => Ok(path),
            Err(e) => {
                warn!("Replacing unreadable index {}: {e}", path.display());
                Ok(path)
            }
        }
    }

    /// Save `index` under its own repository id, replacing a previous index
    /// of the same repository.
    pub fn save(&self, index: &VectorIndex) -> Result<PathBuf, IndexError> {
        let path = self.claim(index.repository_id())?;
        index.save(&path)?;
        Ok(path)
    }
}

fn mismatch(path: &Path, requested: &str, stored: &str) -> IndexError {
    IndexError::RepositoryMismatch {
        path: path.display().to_string(),
        requested: requested.to_string(),
        stored: stored.to_string(),
    }
}
