//! Stats command handler.
//!
//! Shows what the embedding index currently holds without starting an
//! embedder.

use aide_core::{config::AppConfig, AppResult};
use aide_index::{SqliteIndex, VectorIndex};
use clap::Args;

/// Show index statistics
#[derive(Args, Debug)]
pub struct StatsCommand {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatsCommand {
    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing stats command");
        tracing::debug!("Stats options: {:?}", self);

        let index = SqliteIndex::for_workspace(&config.workspace, &config.index.storage_dir);
        if !index.is_created() {
            if self.json {
                println!("{}", serde_json::json!({ "created": false }));
            } else {
                println!(
                    "No index at {:?}. Run `aide index` to build one.",
                    index.db_path()
                );
            }
            return Ok(());
        }

        let stats = index.stats()?;
        if self.json {
            let output = serde_json::json!({
                "created": true,
                "entries": stats.entries,
                "codeEntries": stats.code_entries,
                "docEntries": stats.doc_entries,
                "sizeBytes": stats.size_bytes,
                "lastIndexedAt": stats.last_indexed_at.map(|t| t.to_rfc3339()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("Index: {:?}", index.db_path());
            println!("  Entries: {}", stats.entries);
            println!("  Code:    {}", stats.code_entries);
            println!("  Docs:    {}", stats.doc_entries);
            println!("  Size:    {} bytes", stats.size_bytes);
            match stats.last_indexed_at {
                Some(at) => println!("  Updated: {}", at.to_rfc3339()),
                None => println!("  Updated: never"),
            }
        }

        Ok(())
    }
}
