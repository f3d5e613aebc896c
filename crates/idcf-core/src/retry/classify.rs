//! Classify transfer errors into retry policy error kinds.

use crate::error::TransferError;
use crate::retry::policy::ErrorKind;

/// Classify an HTTP status code for retry decisions.
pub fn classify_http_status(code: u32) -> ErrorKind {
    match code {
        429 | 503 => ErrorKind::Throttled,
        500..=599 => ErrorKind::Http5xx(code as u16),
        _ => ErrorKind::Other,
    }
}

/// Classify a curl error for retry decisions.
pub fn classify_curl_error(e: &curl::Error) -> ErrorKind {
    if e.is_operation_timedout() {
        return ErrorKind::Timeout;
    }
    if e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
    {
        return ErrorKind::Connection;
    }
    ErrorKind::Other
}

/// Classify a transfer error into an ErrorKind.
///
/// Missing locators and storage failures are terminal: retrying cannot fix a
/// 404 or a full disk. Short bodies are treated as connection failures so an
/// interrupted object-store read is retried.
pub fn classify(e: &TransferError) -> ErrorKind {
    match e {
        TransferError::Curl(ce) => classify_curl_error(ce),
        TransferError::Http(code) => classify_http_status(*code),
        TransferError::NotFound(_) => ErrorKind::Other,
        TransferError::UnsupportedLocator(_) => ErrorKind::Other,
        TransferError::PartialTransfer { .. } => ErrorKind::Connection,
        TransferError::Storage(_) => ErrorKind::Other,
    }
}
