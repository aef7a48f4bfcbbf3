//! SQLite file format for a [`VectorIndex`].
//!
//! One file per index. `save` writes a sibling temp file and renames it into
//! place, so a reader opening the path sees either the previous index or the
//! new one. `load` opens the file read-only and validates it completely before
//! handing anything out.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, params};
use tracing::{debug, info, warn};

use super::{DistanceMetric, IndexEntry, VectorIndex};
use crate::error::IndexError;
use crate::models::RetrievableUnit;

const FORMAT_VERSION: &str = "1";

const SCHEMA_SQL: &str = r#"
CREATE TABLE index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE units (
    position INTEGER PRIMARY KEY,
    repository_id TEXT NOT NULL,
    source_path TEXT NOT NULL,
    start_offset INTEGER NOT NULL,
    end_offset INTEGER NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL
);
"#;

/// Helper to serialize a float32 vector into little-endian bytes
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Inverse of [`serialize_vector`]. Trailing bytes that don't form a float are ignored.
pub fn deserialize_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn corrupt(msg: impl Into<String>) -> IndexError {
    IndexError::Corruption(msg.into())
}

impl VectorIndex {
    /// Persist the index to `path`, replacing any existing file atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), IndexError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = temp_path(path);
        if tmp.exists() {
            std::fs::remove_file(&tmp)?;
        }

        if let Err(e) = self.write_to(&tmp) {
            if let Err(cleanup) = std::fs::remove_file(&tmp) {
                warn!("Failed to remove {}: {cleanup}", tmp.display());
            }
            return Err(e);
        }
        std::fs::rename(&tmp, path)?;

        info!(
            "Saved index for {} ({} units) to {}",
            self.repository_id,
            self.entries.len(),
            path.display()
        );
        Ok(())
    }

    fn write_to(&self, path: &Path) -> Result<(), IndexError> {
        let mut conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;

        let tx = conn.transaction()?;
        {
            let mut meta = tx.prepare("INSERT INTO index_meta (key, value) VALUES (?, ?)")?;
            let built_at = self.built_at.to_rfc3339_opts(SecondsFormat::Nanos, true);
            for (key, value) in [
                ("format_version", FORMAT_VERSION.to_string()),
                ("repository_id", self.repository_id.clone()),
                ("dimensions", self.dimensions.to_string()),
                ("metric", self.metric.as_str().to_string()),
                ("unit_count", self.entries.len().to_string()),
                ("document_count", self.document_count.to_string()),
                ("built_at", built_at),
            ] {
                meta.execute(params![key, value])?;
            }
            if let Some(description) = &self.description {
                meta.execute(params!["description", description])?;
            }

            let mut insert = tx.prepare(
                r#"
                INSERT INTO units (position, repository_id, source_path, start_offset,
                                   end_offset, start_line, end_line, text, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )?;
            for (position, entry) in self.entries.iter().enumerate() {
                let unit = &entry.unit;
                insert.execute(params![
                    position as i64,
                    unit.repository_id,
                    unit.source_path,
                    unit.start_offset as i64,
                    unit.end_offset as i64,
                    unit.start_line as i64,
                    unit.end_line as i64,
                    unit.text,
                    serialize_vector(&entry.vector),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Load an index saved by [`VectorIndex::save`].
    ///
    /// A missing file is [`IndexError::NotFound`]; anything that does not
    /// decode into a consistent index is [`IndexError::Corruption`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, IndexError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(IndexError::NotFound(path.display().to_string()));
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let index = read_index(&conn)?;
        info!(
            "Loaded index for {} ({} units, {} dims) from {}",
            index.repository_id,
            index.entries.len(),
            index.dimensions,
            path.display()
        );
        Ok(index)
    }

    /// Repository id recorded in the file at `path`, without reading its units.
    pub fn stored_repository_id<P: AsRef<Path>>(path: P) -> Result<String, IndexError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(IndexError::NotFound(path.display().to_string()));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let meta = read_meta(&conn)?;
        Ok(meta_field(&meta, "repository_id")?.to_string())
    }
}

fn read_meta(conn: &Connection) -> Result<HashMap<String, String>, IndexError> {
    let query = || -> rusqlite::Result<HashMap<String, String>> {
        let mut stmt = conn.prepare("SELECT key, value FROM index_meta")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect()
    };
    query().map_err(|e| corrupt(format!("unreadable metadata: {e}")))
}

fn meta_field<'a>(meta: &'a HashMap<String, String>, key: &str) -> Result<&'a str, IndexError> {
    meta.get(key)
        .map(String::as_str)
        .ok_or_else(|| corrupt(format!("missing metadata field {key}")))
}

fn meta_usize(meta: &HashMap<String, String>, key: &str) -> Result<usize, IndexError> {
    let raw = meta_field(meta, key)?;
    raw.parse()
        .map_err(|_| corrupt(format!("metadata field {key} is not a count: {raw:?}")))
}

fn to_usize(value: i64, column: &str, position: usize) -> Result<usize, IndexError> {
    usize::try_from(value)
        .map_err(|_| corrupt(format!("unit {position}: negative {column} ({value})")))
}

struct UnitRow {
    position: i64,
    repository_id: String,
    source_path: String,
    start_offset: i64,
    end_offset: i64,
    start_line: i64,
    end_line: i64,
    text: String,
    embedding: Vec<u8>,
}

fn read_index(conn: &Connection) -> Result<VectorIndex, IndexError> {
    let meta = read_meta(conn)?;

    let version = meta_field(&meta, "format_version")?;
    if version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }
    let repository_id = meta_field(&meta, "repository_id")?.to_string();
    let dimensions = meta_usize(&meta, "dimensions")?;
    if dimensions == 0 {
        return Err(corrupt("dimensions must be positive"));
    }
    let metric_name = meta_field(&meta, "metric")?;
    let metric = DistanceMetric::parse(metric_name)
        .ok_or_else(|| corrupt(format!("unknown metric {metric_name:?}")))?;
    let unit_count = meta_usize(&meta, "unit_count")?;
    let document_count = meta_usize(&meta, "document_count")?;
    let description = meta.get("description").cloned();
    let built_at = DateTime::parse_from_rfc3339(meta_field(&meta, "built_at")?)
        .map_err(|e| corrupt(format!("invalid built_at: {e}")))?
        .with_timezone(&Utc);

    let rows = (|| -> rusqlite::Result<Vec<UnitRow>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT position, repository_id, source_path, start_offset, end_offset,
                   start_line, end_line, text, embedding
            FROM units ORDER BY position
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UnitRow {
                position: row.get(0)?,
                repository_id: row.get(1)?,
                source_path: row.get(2)?,
                start_offset: row.get(3)?,
                end_offset: row.get(4)?,
                start_line: row.get(5)?,
                end_line: row.get(6)?,
                text: row.get(7)?,
                embedding: row.get(8)?,
            })
        })?;
        rows.collect()
    })()
    .map_err(|e| corrupt(format!("unreadable units: {e}")))?;

    if rows.len() != unit_count {
        return Err(corrupt(format!(
            "metadata records {unit_count} units, file holds {}",
            rows.len()
        )));
    }

    let mut entries = Vec::with_capacity(rows.len());
    for (expected, row) in rows.into_iter().enumerate() {
        if row.position != expected as i64 {
            return Err(corrupt(format!(
                "unit positions not contiguous: expected {expected}, found {}",
                row.position
            )));
        }
        if row.repository_id != repository_id {
            return Err(corrupt(format!(
                "unit {expected} belongs to {}, index is {repository_id}",
                row.repository_id
            )));
        }
        if row.embedding.len() != dimensions * 4 {
            return Err(corrupt(format!(
                "unit {expected}: embedding has {} bytes, expected {}",
                row.embedding.len(),
                dimensions * 4
            )));
        }
        let start_offset = to_usize(row.start_offset, "start_offset", expected)?;
        let end_offset = to_usize(row.end_offset, "end_offset", expected)?;
        if end_offset < start_offset || end_offset - start_offset != row.text.len() {
            return Err(corrupt(format!(
                "unit {expected}: span {start_offset}..{end_offset} does not match its text"
            )));
        }
        entries.push(IndexEntry {
            unit: RetrievableUnit {
                text: row.text,
                source_path: row.source_path,
                start_offset,
                end_offset,
                start_line: to_usize(row.start_line, "start_line", expected)?,
                end_line: to_usize(row.end_line, "end_line", expected)?,
                repository_id: row.repository_id,
            },
            vector: deserialize_vector(&row.embedding),
        });
    }
    debug!("Validated {} units", entries.len());

    Ok(VectorIndex {
        repository_id,
        dimensions,
        metric,
        document_count,
        description,
        built_at,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::Embedder;
    use crate::embedder::mock::MockEmbedder;
    use crate::index::BuildOptions;
    use crate::index::tests::sample_units;
    use tempfile::tempdir;

    async fn built() -> VectorIndex {
        VectorIndex::build(
            "repo",
            sample_units(),
            &MockEmbedder::new(32),
            &BuildOptions::default(),
            None,
        )
        .await
        .unwrap()
        .with_document_count(3)
    }

    #[test]
    fn test_serialize_vector() {
        let vec = vec![1.0, 2.0, -3.5];
        let bytes = serialize_vector(&vec);
        assert_eq!(bytes.len(), 12);

        // 1.0f32 in hex: 0x3f800000 -> little endian: 00 00 80 3f
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        // -3.5f32 in hex: 0xc0600000 -> little endian: 00 00 60 c0
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
        assert_eq!(deserialize_vector(&bytes), vec);
    }

    #[tokio::test]
    async fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repo.db");
        let index = built().await;
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert!(!temp_path(&path).exists());

        let query = MockEmbedder::new(32).embed("error handling").await.unwrap();
        assert_eq!(loaded.search(&query, 3).unwrap(), index.search(&query, 3).unwrap());
    }

    #[tokio::test]
    async fn test_empty_index_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.db");
        let index = VectorIndex::new("empty", 8, DistanceMetric::InnerProduct);
        index.save(&path).unwrap();
        assert_eq!(VectorIndex::load(&path).unwrap(), index);
    }

    #[tokio::test]
    async fn test_description_and_stored_id() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repo.db");
        let index = built().await.with_description("Config parsing and a TCP server");
        index.save(&path).unwrap();

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.description(), Some("Config parsing and a TCP server"));
        assert_eq!(VectorIndex::stored_repository_id(&path).unwrap(), "repo");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            VectorIndex::load(dir.path().join("nope.db")),
            Err(IndexError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_garbage_file_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, b"definitely not a sqlite database, just bytes").unwrap();
        assert!(matches!(
            VectorIndex::load(&path),
            Err(IndexError::Corruption(_))
        ));
    }

    #[tokio::test]
    async fn test_load_rejects_truncated_embedding() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repo.db");
        built().await.save(&path).unwrap();

        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE units SET embedding = ? WHERE position = 1",
            params![vec![0u8; 12]],
        )
        .unwrap();
        drop(conn);

        let err = VectorIndex::load(&path).unwrap_err();
        assert!(matches!(err, IndexError::Corruption(ref msg) if msg.contains("bytes")));
    }

    #[tokio::test]
    async fn test_load_rejects_count_mismatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repo.db");
        built().await.save(&path).unwrap();

        let conn = Connection::open(&path).unwrap();
        conn.execute("DELETE FROM units WHERE position = 2", []).unwrap();
        drop(conn);

        assert!(matches!(
            VectorIndex::load(&path),
            Err(IndexError::Corruption(_))
        ));
    }

    #[tokio::test]
    async fn test_save_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("repo.db");
        VectorIndex::new("repo", 32, DistanceMetric::Cosine).save(&path).unwrap();
        let index = built().await;
        index.save(&path).unwrap();
        assert_eq!(VectorIndex::load(&path).unwrap().len(), 3);
    }
}
