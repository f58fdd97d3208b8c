//! Logging init: file under the XDG state dir, or stderr as a fallback.

use anyhow::Result;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Path of the log file: `~/.local/state/sdm/sdm.log`. Parent directories
/// are created as needed.
pub fn log_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("sdm")?;
    Ok(xdg_dirs.place_state_file("sdm.log")?)
}

/// Shared log writer over the opened log file. Each event writes through a
/// cloned handle; if cloning ever fails the event goes to stderr instead of
/// being dropped.
struct LogFile(File);

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = Box<dyn io::Write>;

    fn make_writer(&'a self) -> Self::Writer {
        match self.0.try_clone() {
            Ok(file) => Box::new(file),
            Err(_) => Box::new(io::stderr()),
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sdm=debug"))
}

fn init_with_writer(writer: BoxMakeWriter) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .init();
}

/// Initialize structured logging to the file at [`log_path`].
/// Returns Err when the log file cannot be opened (state dir unwritable)
/// so the caller can fall back to [`init_logging_stderr`].
pub fn init_logging() -> Result<()> {
    let path = log_path()?;
    let file = File::options().create(true).append(true).open(&path)?;

    init_with_writer(BoxMakeWriter::new(LogFile(file)));
    tracing::info!("sdm logging initialized at {}", path.display());
    Ok(())
}

/// Initialize logging to stderr only. Use when [`init_logging`] fails so
/// the CLI still gets diagnostics.
pub fn init_logging_stderr() {
    init_with_writer(BoxMakeWriter::new(io::stderr));
}
