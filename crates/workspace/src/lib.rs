//! Workspace tools and session glue for Aide.
//!
//! This crate gives the assistant its hands:
//! - [`AssistantTools`]: dispatches tool calls against the workspace
//! - [`Terminal`]: child processes started by `run_terminal_command`
//! - [`PortDetector`]: notices servers the assistant starts
//! - [`Assistant`] and [`Session`]: run loop, transcript and wiring

pub mod assistant;
pub mod events;
pub mod ports;
pub mod process;
pub mod session;
pub mod terminal;
pub mod tools;
pub mod transcript;


// Re-export main types
pub use assistant::Assistant;
pub use events::{TerminalOutput, ToolAction, ToolCallEvent, ToolCallStatus};
pub use ports::PortDetector;
pub use session::Session;
pub use terminal::{Terminal, TerminalEvent, TerminalOptions};
pub use tools::{AssistantTools, DevelopmentLog, RuntimeError, RuntimeMessage};
pub use transcript::{ChatMessage, Transcript};
