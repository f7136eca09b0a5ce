//! SQLite-backed vector index for workspace files.

use crate::types::{EntryKind, EntryMetadata, IndexEntry, IndexStats};
use crate::vector_index::{EntryFilter, VectorIndex};
use aide_core::{AppError, AppResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// File name of the database inside the storage directory.
pub const INDEX_FILE_NAME: &str = "index.sqlite";

/// Vector index persisted to `<workspace>/<storage_dir>/index.sqlite`.
pub struct SqliteIndex {
    db_path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SqliteIndex {
    /// Index stored at an explicit database path.
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            conn: Mutex::new(None),
        }
    }

    /// Index stored under the workspace's storage directory.
    pub fn for_workspace(workspace: &Path, storage_dir: &str) -> Self {
        Self::new(workspace.join(storage_dir).join(INDEX_FILE_NAME))
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connection>> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` against the open connection, opening an existing database
    /// lazily. Fails if the database was never created.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> AppResult<T>) -> AppResult<T> {
        let mut guard = self.lock();
        if guard.is_none() {
            if !self.db_path.exists() {
                return Err(AppError::Index(format!(
                    "Index has not been created at {:?}",
                    self.db_path
                )));
            }
            *guard = Some(init_index(&self.db_path)?);
        }
        match guard.as_ref() {
            Some(conn) => f(conn),
            None => Err(AppError::Index("Index connection unavailable".to_string())),
        }
    }
}

impl std::fmt::Debug for SqliteIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteIndex")
            .field("db_path", &self.db_path)
            .finish()
    }
}

impl VectorIndex for SqliteIndex {
    fn is_created(&self) -> bool {
        self.db_path.exists()
    }

    fn create(&self) -> AppResult<()> {
        let conn = init_index(&self.db_path)?;
        // Replacing the handle matters when the file was deleted underneath
        // an open connection.
        *self.lock() = Some(conn);
        Ok(())
    }

    fn upsert(&self, entry: &IndexEntry) -> AppResult<()> {
        self.with_conn(|conn| insert_entry(conn, entry))
    }

    fn delete(&self, id: &str) -> AppResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM entries WHERE id = ?1", params![id])
                .map_err(|e| AppError::Index(format!("Failed to delete entry: {}", e)))?;
            Ok(())
        })
    }

    fn get(&self, id: &str) -> AppResult<Option<EntryMetadata>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT filepath, kind, content_hash, indexed_at FROM entries WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| AppError::Index(format!("Failed to read entry: {}", e)))?
            .map(|(filepath, kind, hash, at)| metadata_from_row(filepath, &kind, hash, &at))
            .transpose()
        })
    }

    fn ids(&self) -> AppResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id FROM entries ORDER BY id")
                .map_err(|e| AppError::Index(format!("Failed to prepare query: {}", e)))?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| AppError::Index(format!("Failed to list ids: {}", e)))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AppError::Index(format!("Failed to list ids: {}", e)))?;
            Ok(ids)
        })
    }

    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: EntryFilter<'_>,
    ) -> AppResult<Vec<(IndexEntry, f32)>> {
        self.with_conn(|conn| query_entries(conn, vector, k, filter))
    }

    fn stats(&self) -> AppResult<IndexStats> {
        let size_bytes = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);
        self.with_conn(|conn| {
            let mut stats = get_stats(conn)?;
            stats.size_bytes = size_bytes;
            Ok(stats)
        })
    }
}

/// Open the SQLite database, creating the file and schema as needed.
pub fn init_index(db_path: &Path) -> AppResult<Connection> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::Index(format!("Failed to create index directory: {}", e)))?;
    }

    let conn = Connection::open(db_path)
        .map_err(|e| AppError::Index(format!("Failed to open SQLite index: {}", e)))?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            id TEXT PRIMARY KEY,
            filepath TEXT NOT NULL,
            kind TEXT NOT NULL,
            vector BLOB NOT NULL,
            content_hash TEXT NOT NULL,
            indexed_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entries_kind ON entries(kind);
        "#,
    )
    .map_err(|e| AppError::Index(format!("Failed to create tables: {}", e)))?;

    tracing::debug!("Initialized SQLite index at {:?}", db_path);
    Ok(conn)
}

fn insert_entry(conn: &Connection, entry: &IndexEntry) -> AppResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO entries (id, filepath, kind, vector, content_hash, indexed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.id,
            entry.metadata.filepath,
            entry.metadata.kind.as_str(),
            embedding_to_bytes(&entry.vector),
            entry.metadata.content_hash,
            entry.metadata.indexed_at.to_rfc3339(),
        ],
    )
    .map_err(|e| AppError::Index(format!("Failed to upsert entry: {}", e)))?;

    Ok(())
}

fn query_entries(
    conn: &Connection,
    vector: &[f32],
    k: usize,
    filter: EntryFilter<'_>,
) -> AppResult<Vec<(IndexEntry, f32)>> {
    let mut stmt = conn
        .prepare("SELECT id, filepath, kind, vector, content_hash, indexed_at FROM entries")
        .map_err(|e| AppError::Index(format!("Failed to prepare query: {}", e)))?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })
        .map_err(|e| AppError::Index(format!("Failed to query entries: {}", e)))?;

    let mut results = Vec::new();
    for row in rows {
        let (id, filepath, kind, blob, hash, at) = match row {
            Ok(row) => row,
            Err(e) => {
                tracing::warn!("Skipping unreadable index row: {}", e);
                continue;
            }
        };
        let metadata = match metadata_from_row(filepath, &kind, hash, &at) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!("Skipping index row {}: {}", id, e);
                continue;
            }
        };
        if !filter(&metadata) {
            continue;
        }
        let stored = bytes_to_embedding(&blob)?;
        let score = cosine_similarity(vector, &stored);
        results.push((
            IndexEntry {
                id,
                vector: stored,
                metadata,
            },
            score,
        ));
    }

    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results.truncate(k);

    tracing::debug!("Retrieved {} entries (requested top-{})", results.len(), k);

    Ok(results)
}

fn get_stats(conn: &Connection) -> AppResult<IndexStats> {
    let count = |sql: &str| -> AppResult<u64> {
        conn.query_row(sql, [], |row| row.get::<_, i64>(0))
            .map(|v| v as u64)
            .map_err(|e| AppError::Index(format!("Failed to count entries: {}", e)))
    };

    let last: Option<String> = conn
        .query_row("SELECT MAX(indexed_at) FROM entries", [], |row| row.get(0))
        .map_err(|e| AppError::Index(format!("Failed to read stats: {}", e)))?;

    Ok(IndexStats {
        entries: count("SELECT COUNT(*) FROM entries")?,
        code_entries: count("SELECT COUNT(*) FROM entries WHERE kind = 'CODE'")?,
        doc_entries: count("SELECT COUNT(*) FROM entries WHERE kind = 'DOC'")?,
        size_bytes: 0,
        last_indexed_at: last.and_then(|s| parse_timestamp(&s).ok()),
    })
}

fn metadata_from_row(
    filepath: String,
    kind: &str,
    content_hash: String,
    indexed_at: &str,
) -> AppResult<EntryMetadata> {
    let kind = EntryKind::parse(kind)
        .ok_or_else(|| AppError::Index(format!("Unknown entry kind: {}", kind)))?;
    Ok(EntryMetadata {
        filepath,
        kind,
        content_hash,
        indexed_at: parse_timestamp(indexed_at)?,
    })
}

fn parse_timestamp(value: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::Index(format!("Invalid timestamp {:?}: {}", value, e)))
}

/// Convert embedding vector to little-endian bytes for storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to embedding vector.
fn bytes_to_embedding(bytes: &[u8]) -> AppResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(AppError::Index("Invalid embedding bytes length".to_string()));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Calculate cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: &str, kind: EntryKind, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector,
            metadata: EntryMetadata {
                filepath: id.to_string(),
                kind,
                content_hash: format!("hash-{}", id),
                indexed_at: Utc::now(),
            },
        }
    }

    fn created_index(dir: &TempDir) -> SqliteIndex {
        let index = SqliteIndex::for_workspace(dir.path(), ".embeddings");
        index.create().unwrap();
        index
    }

    #[test]
    fn test_create_makes_storage() {
        let dir = TempDir::new().unwrap();
        let index = SqliteIndex::for_workspace(dir.path(), ".embeddings");
        assert!(!index.is_created());

        index.create().unwrap();
        assert!(index.is_created());
        assert!(dir.path().join(".embeddings/index.sqlite").exists());
    }

    #[test]
    fn test_operations_before_create_fail() {
        let dir = TempDir::new().unwrap();
        let index = SqliteIndex::for_workspace(dir.path(), ".embeddings");
        assert!(index.ids().is_err());
    }

    #[test]
    fn test_upsert_overwrites_and_get() {
        let dir = TempDir::new().unwrap();
        let index = created_index(&dir);

        index.upsert(&entry("src/a.ts", EntryKind::Code, vec![1.0, 0.0])).unwrap();
        let mut updated = entry("src/a.ts", EntryKind::Code, vec![0.0, 1.0]);
        updated.metadata.content_hash = "new".to_string();
        index.upsert(&updated).unwrap();

        assert_eq!(index.ids().unwrap(), vec!["src/a.ts".to_string()]);
        let meta = index.get("src/a.ts").unwrap().unwrap();
        assert_eq!(meta.content_hash, "new");
        assert!(index.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let dir = TempDir::new().unwrap();
        let index = created_index(&dir);
        index.upsert(&entry("a.md", EntryKind::Doc, vec![1.0])).unwrap();

        index.delete("a.md").unwrap();
        index.delete("a.md").unwrap();
        assert!(index.ids().unwrap().is_empty());
    }

    #[test]
    fn test_query_orders_filters_and_truncates() {
        let dir = TempDir::new().unwrap();
        let index = created_index(&dir);

        index.upsert(&entry("near.ts", EntryKind::Code, vec![1.0, 0.1, 0.0])).unwrap();
        index.upsert(&entry("far.ts", EntryKind::Code, vec![0.0, 1.0, 0.0])).unwrap();
        index.upsert(&entry("mid.ts", EntryKind::Code, vec![1.0, 1.0, 0.0])).unwrap();
        index.upsert(&entry("near.md", EntryKind::Doc, vec![1.0, 0.0, 0.0])).unwrap();

        let code_only = |m: &EntryMetadata| m.kind == EntryKind::Code;
        let results = index.query(&[1.0, 0.0, 0.0], 2, &code_only).unwrap();

        let ids: Vec<&str> = results.iter().map(|(e, _)| e.id.as_str()).collect();
        assert_eq!(ids, vec!["near.ts", "mid.ts"]);
        assert!(results[0].1 >= results[1].1);
    }

    #[test]
    fn test_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        {
            let index = created_index(&dir);
            index.upsert(&entry("a.ts", EntryKind::Code, vec![1.0])).unwrap();
        }

        let reopened = SqliteIndex::for_workspace(dir.path(), ".embeddings");
        assert!(reopened.is_created());
        assert_eq!(reopened.ids().unwrap(), vec!["a.ts".to_string()]);
    }

    #[test]
    fn test_create_after_storage_removed_starts_empty() {
        let dir = TempDir::new().unwrap();
        let index = created_index(&dir);
        index.upsert(&entry("a.ts", EntryKind::Code, vec![1.0])).unwrap();

        std::fs::remove_dir_all(dir.path().join(".embeddings")).unwrap();
        assert!(!index.is_created());

        index.create().unwrap();
        assert!(index.is_created());
        assert!(index.ids().unwrap().is_empty());
    }

    #[test]
    fn test_stats_counts_kinds() {
        let dir = TempDir::new().unwrap();
        let index = created_index(&dir);
        index.upsert(&entry("a.ts", EntryKind::Code, vec![1.0])).unwrap();
        index.upsert(&entry("b.ts", EntryKind::Code, vec![1.0])).unwrap();
        index.upsert(&entry("c.md", EntryKind::Doc, vec![1.0])).unwrap();

        let stats = index.stats().unwrap();
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.code_entries, 2);
        assert_eq!(stats.doc_entries, 1);
        assert!(stats.size_bytes > 0);
        assert!(stats.last_indexed_at.is_some());
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![1.0, 0.0, 0.0];
        let d = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&c, &d).abs() < 0.001);

        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }
}
