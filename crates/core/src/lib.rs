//! Aide Core Library
//!
//! This crate provides the foundational utilities shared by every Aide crate:
//! - Error handling (`AppError`, `AppResult`)
//! - Logging infrastructure
//! - Configuration management
//! - The `Emitter` observer primitive used for all outward events

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use events::{Emitter, Subscription};
