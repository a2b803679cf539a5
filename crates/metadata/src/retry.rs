//! Re-running find-or-create operations on retryable conflicts.

use crate::error::MetadataResult;
use std::future::Future;

/// Run `op` until it succeeds, fails with a non-retryable error, or has been
/// attempted `max_attempts` times (at least once). The last error is returned.
pub async fn safe_find_or_create<T, F, Fut>(max_attempts: u32, mut op: F) -> MetadataResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MetadataResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::debug!(attempt, max_attempts, error = %err, "retrying after conflict");
                attempt += 1;
            }
            result => return result,
        }
    }
}
