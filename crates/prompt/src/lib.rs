//! Assistant instructions for Aide.
//!
//! This crate renders the instructions sent with every assistant run:
//! - Handlebars template rendering
//! - Workspace root listing injected as context
//! - Optional per-workspace template override in `.aide/instructions.hbs`

pub mod builder;
pub mod loader;
pub mod types;

// Re-export main types
pub use builder::{build_instructions, render_template};
pub use loader::{load_template, DEFAULT_TEMPLATE};
pub use types::InstructionContext;
