//! Assistant integration crate for Aide.
//!
//! This crate provides a provider-agnostic abstraction over hosted assistant
//! APIs (threads, streaming runs, tool-call round trips) and the
//! [`AssistantThread`] that drives one conversation.
//!
//! # Providers
//! - **OpenAI**: Assistants API v2 with server-sent event streaming
//! - **Scripted**: plays back pre-arranged runs; used offline and in tests
//!
//! # Example
//! ```no_run
//! use aide_llm::{AssistantThread, RunOutcome, providers::ScriptedClient};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let thread = AssistantThread::create(Arc::new(ScriptedClient::new()), "asst_123").await?;
//! let _sub = thread.on_message_delta(|text| print!("{}", text));
//! if let RunOutcome::RequiresAction(pending) = thread.add_message("Hello", "").await? {
//!     println!("{} tool call(s) to answer", pending.tool_calls.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod delta;
pub mod factory;
pub mod providers;
pub mod thread;
pub mod types;

// Re-export main types
pub use client::{AssistantClient, RunStream};
pub use delta::LinkBuffer;
pub use factory::create_client;
pub use thread::{AssistantThread, RunOutcome};
pub use types::{
    FunctionCall, RequiredToolCalls, Run, RunStatus, RunStreamEvent, ThreadMessage, ToolCall,
    ToolOutput,
};
