//! Command handlers for the Aide CLI.
//!
//! This module organizes all CLI commands into separate submodules.

pub mod chat;
pub mod index;
pub mod search;
pub mod stats;
pub mod tool;

// Re-export command types for convenience
pub use chat::ChatCommand;
pub use index::IndexCommand;
pub use search::SearchCommand;
pub use stats::StatsCommand;
pub use tool::ToolCommand;

use aide_core::{config::AppConfig, AppResult};
use aide_index::{create_provider, Embedder, EmbedderSettings, ProgressReporter, SqliteIndex};
use std::sync::Arc;

/// Start an embedder for the configured workspace.
///
/// One-shot commands pass `watch = false`: they only need the index brought
/// up to date once.
pub(crate) async fn open_embedder(
    config: &AppConfig,
    watch: bool,
    progress: ProgressReporter,
) -> AppResult<Embedder> {
    config.validate()?;

    let provider = create_provider(
        &config.embedding,
        config.resolve_api_key(&config.embedding.api_key_env),
    )
    .await?;
    let index = Arc::new(SqliteIndex::for_workspace(
        &config.workspace,
        &config.index.storage_dir,
    ));
    let settings = EmbedderSettings {
        watch,
        ..EmbedderSettings::from_config(config)
    };

    Ok(Embedder::spawn(
        config.workspace.clone(),
        index,
        provider,
        settings,
        progress,
    ))
}

/// Progress lines on stderr, so stdout stays parseable.
pub(crate) fn stderr_progress() -> ProgressReporter {
    ProgressReporter::new(Arc::new(|event| eprintln!("{}", event.format_simple())))
}
