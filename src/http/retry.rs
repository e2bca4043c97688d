//! Retry engine (C3): exponential back-off with full jitter, built on the
//! `backoff` crate — the same crate the sibling Querent/Quester workspace in
//! this pack depends on for retry/back-off.

use crate::config::RetryConfig;
use crate::error::TransferError;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `op` under the configured retry policy. Retries on errors that
/// `TransferError::is_retryable` accepts, with full-jitter exponential
/// back-off, until `retry_max_count` attempts or the `retry_max` elapsed
/// budget is exhausted — whichever comes first. On a non-retryable error
/// or budget exhaustion, the last error is returned to the caller, which
/// is expected to forward it to `TransferController::notify_error`.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, mut op: F) -> Result<T, TransferError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransferError>>,
{
    if !config.enabled {
        return op().await;
    }

    let mut backoff = ExponentialBackoff {
        initial_interval: config.retry_interval,
        max_elapsed_time: Some(config.retry_max),
        ..ExponentialBackoff::default()
    };

    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                let exhausted_count = config
                    .retry_max_count
                    .map(|max| attempt >= max)
                    .unwrap_or(false);

                if !err.is_retryable(config.retry_all_errors) || exhausted_count {
                    return Err(err);
                }

                let Some(base_delay) = backoff.next_backoff() else {
                    return Err(err);
                };

                let jittered = full_jitter(base_delay);
                warn!(attempt, delay_ms = jittered.as_millis() as u64, error = %err, "retrying transfer part");
                tokio::time::sleep(jittered).await;
            }
        }
    }
}

/// "Full jitter": a uniformly random delay in `[0, base_delay]`.
fn full_jitter(base_delay: Duration) -> Duration {
    let millis = base_delay.as_millis().min(u128::from(u64::MAX)) as u64;
    if millis == 0 {
        return Duration::from_millis(0);
    }
    let jittered = rand::thread_rng().gen_range(0..=millis);
    Duration::from_millis(jittered)
}
