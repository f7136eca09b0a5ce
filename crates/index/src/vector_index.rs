//! Vector index abstraction for indexed workspace files.
//!
//! Defines a trait for provider-agnostic vector storage and retrieval.
//! Implementations take `&self`: callers share one index behind an `Arc`
//! and serialize writes through the `EmbeddingQueue`.

use crate::types::{EntryMetadata, IndexEntry, IndexStats};
use aide_core::AppResult;

/// Predicate applied to candidate entries before ranking.
pub type EntryFilter<'a> = &'a (dyn Fn(&EntryMetadata) -> bool + Send + Sync);

/// Trait for vector index backends.
pub trait VectorIndex: Send + Sync {
    /// Whether the backing storage exists.
    fn is_created(&self) -> bool;

    /// Create (or re-open) the backing storage.
    fn create(&self) -> AppResult<()>;

    /// Insert or overwrite the entry keyed by `entry.id`.
    fn upsert(&self, entry: &IndexEntry) -> AppResult<()>;

    /// Remove an entry. Removing a missing id is not an error.
    fn delete(&self, id: &str) -> AppResult<()>;

    /// Look up the metadata stored for an id.
    fn get(&self, id: &str) -> AppResult<Option<EntryMetadata>>;

    /// All stored ids.
    fn ids(&self) -> AppResult<Vec<String>>;

    /// Search for the top-k entries most similar to `vector` among those
    /// accepted by `filter`.
    ///
    /// Returns entries ordered by descending similarity score.
    fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: EntryFilter<'_>,
    ) -> AppResult<Vec<(IndexEntry, f32)>>;

    /// Get statistics about the index.
    fn stats(&self) -> AppResult<IndexStats>;
}
