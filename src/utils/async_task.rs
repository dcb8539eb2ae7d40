use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::warn;

use crate::Error;
use crate::NetworkError;
use crate::Result;

/// Runs `task` until it succeeds, each attempt bounded by `timeout_duration`,
/// doubling `delay_duration` between attempts.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, T, P>(
    task: F,
    max_retries: usize,
    delay_duration: Duration,
    timeout_duration: Duration,
) -> Result<P>
where
    F: Fn() -> T,
    T: std::future::Future<Output = Result<P>>,
{
    let mut retries = 0;
    let mut delay = delay_duration;
    let mut last_error: Error = NetworkError::RetryExhausted(max_retries).into();
    while retries < max_retries {
        match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(error)) => {
                warn!("failed with error: {:?}", &error);
                last_error = error;
            }
            Err(_) => {
                warn!("attempt timed out after {:?}", timeout_duration);
                last_error = NetworkError::Timeout {
                    peer: "task".to_string(),
                    duration: timeout_duration,
                }
                .into();
            }
        };

        retries += 1;
        if retries < max_retries {
            sleep(delay).await;
            delay *= 2;
        } else {
            warn!("Task failed after {} retries", retries);
        }
    }
    Err(last_error)
}
