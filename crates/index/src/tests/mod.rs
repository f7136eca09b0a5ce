//! Embedder lifecycle tests against a real SQLite index and the offline
//! trigram provider.

mod embedder_lifecycle;
