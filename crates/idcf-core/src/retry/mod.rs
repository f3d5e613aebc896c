//! Retry and backoff policy for series transfers.
//!
//! Encapsulates error classification (timeouts, throttling, connection
//! failures vs terminal errors like missing locators) and exponential
//! backoff decisions so the orchestrator applies one consistent policy.

mod classify;
mod policy;
mod run;

pub use classify::{classify, classify_curl_error, classify_http_status};
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
