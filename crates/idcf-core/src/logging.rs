//! Tracing setup for long-running download sessions.
//!
//! A bulk download can run for hours from a terminal that also shows the
//! progress line, so records go to a file under the XDG state directory and
//! the terminal stays readable. `init_logging` fails when the state
//! directory cannot be used; the caller then falls back to
//! `init_logging_stderr`.

use anyhow::Result;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "info,idcf=debug";

/// Path of the run log: `$XDG_STATE_HOME/idcf/idcf.log`.
pub fn log_path() -> Result<PathBuf> {
    let dirs = xdg::BaseDirectories::with_prefix("idcf")?;
    Ok(dirs.place_state_file("idcf.log")?)
}

/// Per-record sink. Stderr stands in when the file handle cannot be cloned.
enum Sink {
    File(File),
    Stderr,
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::File(f) => f.write(buf),
            Sink::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::File(f) => f.flush(),
            Sink::Stderr => io::stderr().lock().flush(),
        }
    }
}

struct LogFile(File);

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = Sink;

    fn make_writer(&'a self) -> Sink {
        self.0.try_clone().map(Sink::File).unwrap_or(Sink::Stderr)
    }
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Initialize file logging, appending across invocations so one log covers
/// an interrupted run and its resume.
pub fn init_logging() -> Result<()> {
    let path = log_path()?;
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(LogFile(file))
        .with_ansi(false)
        .init();

    tracing::info!("logging to {}", path.display());
    Ok(())
}

/// Stderr-only setup for when the state directory is unusable.
pub fn init_logging_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}
