//! Search command handler.

use super::{open_embedder, stderr_progress};
use aide_core::{config::AppConfig, AppResult};
use clap::Args;
use std::time::Duration;

/// Search the embedding index
#[derive(Args, Debug)]
pub struct SearchCommand {
    /// What to look for
    pub query: String,

    /// Search documentation files instead of code
    #[arg(long)]
    pub doc: bool,

    /// Seconds to wait for the index to be ready
    #[arg(long, default_value_t = 300)]
    pub wait_secs: u64,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing search command");
        tracing::debug!("Search options: {:?}", self);

        let embedder = open_embedder(config, false, stderr_progress()).await?;
        let hits = match embedder
            .wait_until_ready(Duration::from_secs(self.wait_secs))
            .await
        {
            Ok(_) if self.doc => embedder.search_doc_embeddings(&self.query).await,
            Ok(_) => embedder.search_code_embeddings(&self.query).await,
            Err(e) => Err(e),
        };
        embedder.dispose();
        let hits = hits?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&hits)?);
        } else if hits.is_empty() {
            println!("No matches");
        } else {
            for hit in &hits {
                println!("{:.3}  {}", hit.score, hit.filepath);
            }
        }

        Ok(())
    }
}
