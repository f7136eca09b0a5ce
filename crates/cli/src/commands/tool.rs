//! Tool command handler.
//!
//! Runs one tool call through the same dispatcher the assistant uses, which
//! makes it easy to check what a model would see.

use super::{open_embedder, stderr_progress};
use aide_core::{config::AppConfig, AppError, AppResult};
use aide_index::{Embedder, EmbedderState, SearchHit, SemanticSearch};
use aide_llm::ToolCall;
use aide_workspace::{AssistantTools, PortDetector, ToolCallStatus};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

/// Run a single tool call locally
#[derive(Args, Debug)]
pub struct ToolCommand {
    /// Tool name, e.g. read_file or run_terminal_command
    pub name: String,

    /// Tool arguments as JSON
    #[arg(default_value = "{}")]
    pub arguments: String,

    /// Seconds to wait for the index before a search tool runs
    #[arg(long, default_value_t = 300)]
    pub wait_secs: u64,
}

/// Stands in for the index when the tool does not search.
struct NoIndex;

#[async_trait::async_trait]
impl SemanticSearch for NoIndex {
    async fn search_code_embeddings(&self, _query: &str) -> AppResult<Vec<SearchHit>> {
        Err(AppError::Index("The index is not started for this tool".to_string()))
    }

    async fn search_doc_embeddings(&self, _query: &str) -> AppResult<Vec<SearchHit>> {
        Err(AppError::Index("The index is not started for this tool".to_string()))
    }
}

impl ToolCommand {
    fn needs_index(&self) -> bool {
        matches!(
            self.name.as_str(),
            "search_code_embeddings" | "search_doc_embeddings"
        )
    }

    /// A ready embedder for search tools, nothing otherwise.
    async fn open_index(&self, config: &AppConfig) -> AppResult<Option<Embedder>> {
        if !self.needs_index() {
            return Ok(None);
        }
        let embedder = open_embedder(config, false, stderr_progress()).await?;
        let state = embedder
            .wait_until_ready(Duration::from_secs(self.wait_secs))
            .await?;
        if state != EmbedderState::Ready {
            tracing::warn!("Searching an index that is {}", state);
        }
        Ok(Some(embedder))
    }

    pub async fn execute(&self, config: &AppConfig) -> AppResult<()> {
        tracing::info!("Executing tool command: {}", self.name);
        tracing::debug!("Tool options: {:?}", self);

        let embedder = self.open_index(config).await?;
        let search: Arc<dyn SemanticSearch> = match &embedder {
            Some(embedder) => Arc::new(embedder.clone()),
            None => Arc::new(NoIndex),
        };

        let tools = AssistantTools::with_parts(
            config.workspace.clone(),
            search,
            config.index.storage_dir.clone(),
            PortDetector::new(),
        );
        let _output = tools.on_terminal_output(|chunk| eprint!("{}", chunk.data));
        let _events = tools.on_tool_call_event(|event| {
            if let ToolCallStatus::Rejected { error } = &event.status {
                tracing::warn!("{} rejected: {}", event.action.name(), error);
            }
        });

        let call = ToolCall::new("cli", self.name.clone(), self.arguments.clone());
        let outputs = tools.handle_tool_calls(std::slice::from_ref(&call)).await;
        tools.dispose();
        if let Some(embedder) = embedder {
            embedder.dispose();
        }

        for output in outputs {
            println!("{}", output.output);
        }

        Ok(())
    }
}
