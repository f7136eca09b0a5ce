//! Read-only semantic search over the index.

use crate::types::SearchHit;
use aide_core::AppResult;

/// Embedding search as consumed by tool dispatch.
///
/// Implemented by [`crate::Embedder`]; tests substitute their own.
#[async_trait::async_trait]
pub trait SemanticSearch: Send + Sync {
    /// Files of code kind most similar to `query`.
    async fn search_code_embeddings(&self, query: &str) -> AppResult<Vec<SearchHit>>;

    /// Documentation files most similar to `query`.
    async fn search_doc_embeddings(&self, query: &str) -> AppResult<Vec<SearchHit>>;
}
