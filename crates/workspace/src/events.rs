//! Tool-call events published to the host.
//!
//! Every dispatched tool call produces one `Pending` event followed by
//! exactly one `Resolved` or `Rejected` event with the same id. The wire
//! form is flat: `{"id", "status", "type", ...action fields}`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Resolved,
    Rejected { error: String },
}

impl ToolCallStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, ToolCallStatus::Pending)
    }
}

/// What a tool call does, with the arguments worth showing.
///
/// Paths are workspace-relative and `/`-separated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolAction {
    ReadFile {
        path: String,
    },
    WriteFile {
        path: String,
        content: String,
    },
    ReadDirectory {
        path: String,
    },
    DeleteFileOrDirectory {
        path: String,
    },
    SearchCodeEmbeddings {
        query: String,
    },
    SearchDocEmbeddings {
        query: String,
    },
    SearchFilePaths {
        query: String,
    },
    RunTerminalCommand {
        /// Command and arguments as one line
        command: String,
        /// Output so far; complete once the event is settled
        #[serde(default)]
        buffer: String,
    },
    ReadDevelopmentLogs,
    /// The model named an operation that does not exist
    Unsupported {
        name: String,
    },
    /// The arguments of a known operation did not parse
    Malformed {
        name: String,
        arguments: String,
    },
}

impl ToolAction {
    /// Operation name as the model knows it.
    pub fn name(&self) -> &str {
        match self {
            ToolAction::ReadFile { .. } => "read_file",
            ToolAction::WriteFile { .. } => "write_file",
            ToolAction::ReadDirectory { .. } => "read_directory",
            ToolAction::DeleteFileOrDirectory { .. } => "delete_file_or_directory",
            ToolAction::SearchCodeEmbeddings { .. } => "search_code_embeddings",
            ToolAction::SearchDocEmbeddings { .. } => "search_doc_embeddings",
            ToolAction::SearchFilePaths { .. } => "search_file_paths",
            ToolAction::RunTerminalCommand { .. } => "run_terminal_command",
            ToolAction::ReadDevelopmentLogs => "read_development_logs",
            ToolAction::Unsupported { name } | ToolAction::Malformed { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub id: String,
    #[serde(flatten)]
    pub status: ToolCallStatus,
    #[serde(flatten)]
    pub action: ToolAction,
}

impl ToolCallEvent {
    pub fn pending(id: impl Into<String>, action: ToolAction) -> Self {
        Self {
            id: id.into(),
            status: ToolCallStatus::Pending,
            action,
        }
    }

    pub fn resolved(id: impl Into<String>, action: ToolAction) -> Self {
        Self {
            id: id.into(),
            status: ToolCallStatus::Resolved,
            action,
        }
    }

    pub fn rejected(id: impl Into<String>, action: ToolAction, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: ToolCallStatus::Rejected {
                error: error.into(),
            },
            action,
        }
    }
}

/// A chunk of output from a running terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalOutput {
    /// Id of the tool call that started the terminal
    pub id: String,
    pub data: String,
}
