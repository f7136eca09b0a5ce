//! Assistant API providers.

pub mod openai;
pub mod scripted;
pub mod sse;

pub use openai::OpenAiAssistantClient;
pub use scripted::{ScriptLog, ScriptedClient, ScriptedTurn};
