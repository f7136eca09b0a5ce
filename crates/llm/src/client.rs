//! Assistant client abstraction.
//!
//! This module defines the one seam between the assistant thread logic and
//! a hosted assistant API: threads hold messages, and a run streams events
//! until it completes or pauses for tool outputs.

use crate::types::{RunStreamEvent, ThreadMessage, ToolOutput};
use aide_core::AppResult;
use futures::Stream;
use std::pin::Pin;

/// Stream of run events.
pub type RunStream = Pin<Box<dyn Stream<Item = AppResult<RunStreamEvent>> + Send>>;

/// Trait for hosted assistant APIs.
#[async_trait::async_trait]
pub trait AssistantClient: Send + Sync {
    /// Get the provider name (e.g., "openai", "scripted").
    fn provider_name(&self) -> &str;

    /// Create an empty conversation thread and return its id.
    async fn create_thread(&self) -> AppResult<String>;

    /// Append a user message to a thread.
    async fn add_message(&self, thread_id: &str, content: &str) -> AppResult<()>;

    /// Start a streaming run of `assistant_id` on the thread.
    ///
    /// # Arguments
    /// * `thread_id` - Thread to run
    /// * `assistant_id` - Assistant configuration to run with
    /// * `instructions` - Per-run instructions, replacing the assistant's own
    async fn create_run(
        &self,
        thread_id: &str,
        assistant_id: &str,
        instructions: &str,
    ) -> AppResult<RunStream>;

    /// Resume a paused run with tool outputs; streams the continuation.
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolOutput],
    ) -> AppResult<RunStream>;

    /// Messages of a thread, newest first.
    async fn list_messages(&self, thread_id: &str) -> AppResult<Vec<ThreadMessage>>;
}
