//! Embedding providers.
//!
//! Turns file contents and search queries into vectors for the index.

pub mod provider;
pub mod providers;

pub use provider::{create_provider, EmbeddingProvider};
