//! Cancellation and deadlines for storage operations.
//!
//! Every storage operation is a future, so dropping it abandons any in-flight
//! request and releases held permits. These helpers turn an external
//! cancellation signal or a deadline into [`Error::Cancelled`] instead of a
//! silently dropped result.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Run `fut` until it completes or `token` is cancelled.
pub async fn cancellable<F, T>(token: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Error::Cancelled),
        res = fut => res,
    }
}

/// Run `fut` with a deadline.
pub async fn with_deadline<F, T>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Cancelled),
    }
}
