//! Retry loop: run a closure until success or policy says stop.

use super::classify;
use super::policy::{RetryDecision, RetryPolicy};
use crate::error::TransferError;

/// Runs a closure until it succeeds or the retry policy says to stop.
/// On retryable failure, sleeps for the backoff duration then tries again.
/// Returns the final result together with the number of attempts made, so
/// the caller can record it in the task outcome.
pub fn run_with_retry<T, F>(policy: &RetryPolicy, mut f: F) -> (Result<T, TransferError>, u32)
where
    F: FnMut() -> Result<T, TransferError>,
{
    let mut attempt = 1u32;
    loop {
        match f() {
            Ok(v) => return (Ok(v), attempt),
            Err(e) => {
                let kind = classify::classify(&e);
                match policy.decide(attempt, kind) {
                    RetryDecision::NoRetry => return (Err(e), attempt),
                    RetryDecision::RetryAfter(d) => {
                        tracing::debug!(attempt, delay_ms = d.as_millis() as u64, error = %e, "retrying transfer");
                        std::thread::sleep(d);
                        attempt += 1;
                    }
                }
            }
        }
    }
}
