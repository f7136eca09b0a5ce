//! Workspace embedding index.
//!
//! Keeps a persistent vector index of a workspace's code and documentation
//! files current as the files change, and answers similarity searches over
//! it. The [`Embedder`] owns the lifecycle; storage sits behind
//! [`VectorIndex`] and vectors come from an [`EmbeddingProvider`].

pub mod embedder;
pub mod embeddings;
pub mod ignore;
pub mod index;
pub mod progress;
pub mod queue;
pub mod search;
pub mod types;
pub mod vector_index;
pub mod watcher;

#[cfg(test)]
mod tests;

// Re-export commonly used types
pub use embedder::{Embedder, EmbedderSettings, EmbedderState};
pub use embeddings::{create_provider, EmbeddingProvider};
pub use ignore::IgnoreRules;
pub use index::SqliteIndex;
pub use progress::{ProgressEvent, ProgressReporter};
pub use queue::{EmbeddingQueue, QueueState};
pub use search::SemanticSearch;
pub use types::{EntryKind, EntryMetadata, IndexEntry, IndexStats, SearchHit};
pub use vector_index::VectorIndex;
