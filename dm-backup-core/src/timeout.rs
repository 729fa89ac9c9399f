use std::future::Future;
use std::time::Duration;

use crate::contract::UpstreamError;
use crate::error::{BackupError, Result};

/// Awaits an upstream call for at most `after`.
///
/// An elapsed deadline becomes [`BackupError::Timeout`]; an upstream failure becomes
/// [`BackupError::Upstream`]. Both carry `operation` for the log line.
pub async fn with_timeout<T, F>(operation: &'static str, after: Duration, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, UpstreamError>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(BackupError::upstream(operation, source)),
        Err(_) => Err(BackupError::Timeout { operation, after }),
    }
}
