//! CLI command handlers, one per file.

mod download;
mod validate;

pub use download::{run_download, DownloadArgs};
pub use validate::{run_validate, ValidateArgs};
