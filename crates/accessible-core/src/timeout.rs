//! Bounded waits on the rendering engine.

use std::future::Future;
use std::time::Duration;

use crate::error::{AccessibleError, Result};

/// Run `fut`, failing with [`AccessibleError::PageTimeout`] after `seconds`.
///
/// A limit of zero disables the bound.
pub async fn with_timeout<F, T>(seconds: u64, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if seconds == 0 {
        return fut.await;
    }
    match tokio::time::timeout(Duration::from_secs(seconds), fut).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!("{} timed out after {}s", operation, seconds);
            Err(AccessibleError::PageTimeout {
                operation: operation.to_string(),
                seconds,
            })
        }
    }
}
