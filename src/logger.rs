//! Session logger — routes `tracing` output to a single file in the OS data
//! directory.
//!
//! The file is **truncated (overwritten) at each launch**, so it only ever
//! contains output from the most-recent session.
//!
//! Log location:
//!   Windows:  `%APPDATA%\discolour\discolour.log`
//!   Linux:    `~/.local/share/discolour/discolour.log`
//!   macOS:    `~/Library/Application Support/discolour/discolour.log`
//!
//! The filter is read from `DISCOLOUR_LOG` (same syntax as `RUST_LOG`) and
//! defaults to `discolour=info`, or `discolour=debug` with `--verbose`.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const FILTER_ENV: &str = "DISCOLOUR_LOG";

/// Initialise logging. Call once before anything logs; later calls are
/// ignored.
///
/// * Creates (or truncates) the log file.
/// * Mirrors output to stderr when `verbose`.
/// * Installs a panic hook that writes the panic message to the log before
///   running the default handler.
pub fn init(verbose: bool) {
    let default_filter = if verbose { "discolour=debug" } else { "discolour=info" };
    let filter = EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));

    let path = log_file_path();
    let file_layer = match open_log(&path) {
        Ok(file) => {
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        Err(e) => {
            // Can't open log file — not fatal, just skip
            eprintln!("[logger] Failed to open log file {:?}: {}", path, e);
            None
        }
    };
    let stderr_layer = verbose.then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));

    if tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_err()
    {
        return;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log = %path.display(),
        "discolour session started"
    );

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("PANIC: {}", info);
        prev(info);
    }));
}

fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).write(true).truncate(true).open(path)
}

fn log_file_path() -> PathBuf {
    data_dir().join("discolour").join("discolour.log")
}

/// Platform data directory (without the app sub-folder).
fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    // Linux / fallback
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort: current working directory
    PathBuf::from(".")
}
