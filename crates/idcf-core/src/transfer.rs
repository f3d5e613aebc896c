//! Object-store transfer boundary.
//!
//! The orchestrator moves bytes only through the `Transfer` trait; the
//! provided `HttpTransfer` implements it for HTTP(S) locators with a single
//! blocking GET per object. Tests substitute their own implementations.

use crate::error::TransferError;
use crate::storage::PartFile;
use std::path::Path;
use std::time::Duration;

/// Transfer primitive: fetch the object behind `source_locator` into
/// `destination_dir`, returning the number of bytes written. Implementations
/// must leave no partially-written file under a final name.
pub trait Transfer: Send + Sync {
    fn transfer(&self, source_locator: &str, destination_dir: &Path) -> Result<u64, TransferError>;
}

/// HTTP(S) transfer on curl. One blocking Easy handle per call; the
/// orchestrator runs these on its blocking worker pool.
pub struct HttpTransfer {
    connect_timeout: Duration,
    transfer_timeout: Duration,
}

impl Default for HttpTransfer {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            transfer_timeout: Duration::from_secs(3600),
        }
    }
}

impl HttpTransfer {
    pub fn new(connect_timeout: Duration, transfer_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            transfer_timeout,
        }
    }
}

/// Filename for the fetched object: trailing path segment of the locator,
/// or a fixed name when the locator ends in a slash.
fn object_filename(locator: &str) -> String {
    let no_query = locator.split(['?', '#']).next().unwrap_or(locator);
    let tail = no_query.trim_end_matches('/').rsplit('/').next().unwrap_or("");
    if tail.is_empty() || tail.contains("://") {
        "object.bin".to_string()
    } else {
        tail.to_string()
    }
}

impl Transfer for HttpTransfer {
    fn transfer(&self, source_locator: &str, destination_dir: &Path) -> Result<u64, TransferError> {
        if !source_locator.starts_with("http://") && !source_locator.starts_with("https://") {
            return Err(TransferError::UnsupportedLocator(
                source_locator.split("://").next().unwrap_or("").to_string(),
            ));
        }

        let final_path = destination_dir.join(object_filename(source_locator));
        let mut part = PartFile::create(&final_path).map_err(TransferError::Storage)?;

        let mut easy = curl::easy::Easy::new();
        easy.url(source_locator)?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.fail_on_error(false)?;
        easy.connect_timeout(self.connect_timeout)?;
        easy.timeout(self.transfer_timeout)?;
        easy.low_speed_limit(1024)?;
        easy.low_speed_time(Duration::from_secs(60))?;

        let mut write_err: Option<std::io::Error> = None;
        let perform_result = {
            let mut transfer = easy.transfer();
            transfer.write_function(|data| match part.append(data) {
                Ok(()) => Ok(data.len()),
                Err(e) => {
                    write_err = Some(e);
                    Ok(0) // abort transfer
                }
            })?;
            transfer.perform()
        };

        if let Some(e) = write_err {
            part.discard();
            return Err(TransferError::Storage(e));
        }
        if let Err(e) = perform_result {
            part.discard();
            return Err(TransferError::Curl(e));
        }

        let code = easy.response_code()?;
        if code == 404 || code == 410 {
            part.discard();
            return Err(TransferError::NotFound(code));
        }
        if !(200..300).contains(&code) {
            part.discard();
            return Err(TransferError::Http(code));
        }

        // Content-Length mismatch means the server closed early; surface it
        // as retryable instead of finalizing a short file.
        if let Ok(len) = easy.content_length_download() {
            if len >= 0.0 && (len as u64) != part.bytes_written() {
                let expected = len as u64;
                let received = part.bytes_written();
                part.discard();
                return Err(TransferError::PartialTransfer { expected, received });
            }
        }

        part.finalize(&final_path).map_err(TransferError::Storage)
    }
}
