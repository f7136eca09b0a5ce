//! Assistant API data types.
//!
//! These mirror the hosted assistant API's thread/run vocabulary closely
//! enough to deserialize its payloads directly. Unknown fields are ignored.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Cancelling,
    Cancelled,
    Failed,
    Completed,
    Incomplete,
    Expired,
    #[serde(other)]
    Unknown,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Cancelling => "cancelling",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Failed => "failed",
            RunStatus::Completed => "completed",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Expired => "expired",
            RunStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Function name and JSON-encoded arguments of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text as produced by the model; may be malformed
    #[serde(default)]
    pub arguments: String,
}

/// A function tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Output for one tool call, submitted back to the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitToolOutputs {
    pub tool_calls: Vec<ToolCall>,
}

/// What a run is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredAction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_tool_outputs: Option<SubmitToolOutputs>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Snapshot of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_action: Option<RequiredAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RunError>,
}

impl Run {
    pub fn new(id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            id: id.into(),
            status,
            required_action: None,
            last_error: None,
        }
    }

    /// A run paused on the given tool calls.
    pub fn requiring(id: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            required_action: Some(RequiredAction {
                kind: "submit_tool_outputs".to_string(),
                submit_tool_outputs: Some(SubmitToolOutputs { tool_calls }),
            }),
            ..Self::new(id, RunStatus::RequiresAction)
        }
    }

    /// Tool calls to answer, if the run is waiting for tool outputs.
    pub fn pending_tool_calls(&self) -> Option<&[ToolCall]> {
        if self.status != RunStatus::RequiresAction {
            return None;
        }
        let action = self.required_action.as_ref()?;
        if action.kind != "submit_tool_outputs" {
            return None;
        }
        action
            .submit_tool_outputs
            .as_ref()
            .map(|s| s.tool_calls.as_slice())
    }
}

/// One message of a thread, flattened to its text content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub role: String,
    pub text: String,
}

/// Event decoded from a run stream.
#[derive(Debug, Clone, PartialEq)]
pub enum RunStreamEvent {
    /// Incremental assistant text
    TextDelta(String),
    /// The model started a function tool call (arguments may still be empty)
    ToolCallCreated(ToolCall),
    /// The run changed status
    RunUpdated(Run),
}

/// Tool calls a paused run is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredToolCalls {
    pub run_id: String,
    pub tool_calls: Vec<ToolCall>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_deserializes_requires_action() {
        let json = r#"{
            "id": "run_1",
            "object": "thread.run",
            "status": "requires_action",
            "required_action": {
                "type": "submit_tool_outputs",
                "submit_tool_outputs": {
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "read_file", "arguments": "{\"path\":\"a.ts\"}"}
                    }]
                }
            }
        }"#;
        let run: Run = serde_json::from_str(json).unwrap();
        let calls = run.pending_tool_calls().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "read_file");
    }

    #[test]
    fn test_unknown_status_is_tolerated() {
        let run: Run = serde_json::from_str(r#"{"id":"r","status":"paused"}"#).unwrap();
        assert_eq!(run.status, RunStatus::Unknown);
        assert!(run.pending_tool_calls().is_none());
    }

    #[test]
    fn test_completed_run_has_no_pending_calls() {
        let mut run = Run::requiring("r", vec![ToolCall::new("c", "read_file", "{}")]);
        assert!(run.pending_tool_calls().is_some());
        run.status = RunStatus::Completed;
        assert!(run.pending_tool_calls().is_none());
    }
}
