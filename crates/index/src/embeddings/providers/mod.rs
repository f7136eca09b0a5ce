//! Concrete embedding providers.

pub mod mock;
pub mod ollama;
pub mod openai;

use aide_core::{AppError, AppResult};
use std::future::Future;
use std::time::Duration;

/// Maximum attempts for a failed embedding request
pub(crate) const MAX_RETRIES: u32 = 3;

/// Initial backoff duration in milliseconds
pub(crate) const INITIAL_BACKOFF_MS: u64 = 100;

/// Run `op` up to [`MAX_RETRIES`] times with exponential backoff.
pub(crate) async fn with_retries<T, F, Fut>(provider: &str, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 0;
    let mut last_error = None;

    while attempt < MAX_RETRIES {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt < MAX_RETRIES {
                    let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt);
                    tracing::warn!(
                        "{} embedding failed (attempt {}/{}): {}; retrying in {}ms",
                        provider,
                        attempt,
                        MAX_RETRIES,
                        e,
                        backoff_ms
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| AppError::Llm("Unknown embedding error".to_string())))
}
