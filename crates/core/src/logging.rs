//! Logging infrastructure for Aide.
//!
//! Initializes the tracing subscriber. All logs go to stderr so that stdout
//! stays reserved for assistant text and command output.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{AppError, AppResult};

/// Initialize the tracing subscriber with stderr output.
///
/// # Arguments
/// * `log_level` - Optional filter override (e.g., "debug", "aide_index=trace")
/// * `no_color` - Disable colored output
///
/// # Example
/// ```no_run
/// use aide_core::logging::init_logging;
///
/// init_logging(None, false).expect("Failed to initialize logging");
/// ```
pub fn init_logging(log_level: Option<&str>, no_color: bool) -> AppResult<()> {
    let filter_str = resolve_filter(log_level, std::env::var("RUST_LOG").ok());

    let env_filter = EnvFilter::try_new(&filter_str)
        .map_err(|e| AppError::Config(format!("Invalid log filter: {}", e)))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(!no_color && supports_color());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| AppError::Config(format!("Failed to init logging: {}", e)))?;

    Ok(())
}

/// Pick the filter string: explicit level, then `RUST_LOG`, then `info`.
fn resolve_filter(log_level: Option<&str>, rust_log: Option<String>) -> String {
    match log_level {
        Some(level) => level.to_string(),
        None => rust_log.unwrap_or_else(|| "info".to_string()),
    }
}

fn supports_color() -> bool {
    std::env::var("NO_COLOR").is_err()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_filter_precedence() {
        assert_eq!(resolve_filter(Some("debug"), Some("warn".into())), "debug");
        assert_eq!(resolve_filter(None, Some("warn".into())), "warn");
        assert_eq!(resolve_filter(None, None), "info");
    }

    #[test]
    fn test_invalid_filter_is_config_error() {
        let result = init_logging(Some("aide=notalevel"), true);
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
