//! Index command handler.
//!
//! Brings the embedding index up to date once and reports what it holds.

use super::{open_embedder, stderr_progress};
use aide_core::{config::AppConfig, AppResult};
use clap::Args;
use std::time::Duration;

/// Build or update the embedding index
#[derive(Args, Debug)]
pub struct IndexCommand {
    /// Seconds to wait for indexing to finish
    #[arg(long, default_value_t = 300)]
    pub wait_secs: u64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl IndexCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing index command");
        tracing::debug!("Index options: {:?}", self);

        let embedder = open_embedder(config, false, stderr_progress()).await?;
        let result = embedder
            .wait_until_ready(Duration::from_secs(self.wait_secs))
            .await;
        let stats = embedder.stats();
        embedder.dispose();

        let state = result?;
        let stats = stats?;
        tracing::info!("Index is {} with {} entries", state, stats.entries);

        if self.json {
            let output = serde_json::json!({
                "state": state.to_string(),
                "entries": stats.entries,
                "codeEntries": stats.code_entries,
                "docEntries": stats.doc_entries,
                "sizeBytes": stats.size_bytes,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!(
                "Indexed {} files ({} code, {} docs)",
                stats.entries, stats.code_entries, stats.doc_entries
            );
        }

        Ok(())
    }
}
