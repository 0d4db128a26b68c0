use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::Local;
use tracing_appender::non_blocking::WorkerGuard;

use crate::config::Config;

/// The transcript file for this session. Created once at first init.
static LOG_PATH: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Set up tracing-subscriber to write to studio.log in `dir`.
/// The returned guard flushes buffered lines when dropped.
pub fn init_tracing(dir: &Path, level: &str) -> Option<WorkerGuard> {
    fs::create_dir_all(dir).ok()?;
    let file_appender = tracing_appender::rolling::never(dir, "studio.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);
    let level: tracing::Level = level.parse().unwrap_or(tracing::Level::INFO);
    let subscriber = tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok()?;
    Some(guard)
}

/// Initialize the transcript file based on the current time.
/// Call once at startup; later calls are no-ops.
pub fn init_session_log(config: &Config) {
    let _ = LOG_PATH.get_or_init(|| {
        if !config.logging.enabled {
            return None;
        }

        let dir = config.log_directory();
        fs::create_dir_all(&dir).ok()?;

        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        let path = dir.join(format!("session_{timestamp}.txt"));

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path)
            .ok()?;

        let header = format!(
            "=== Studio - Session Log ===\nModel: {}\nDate: {}\n============================\n\n",
            config.api.model,
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        file.write_all(header.as_bytes()).ok()?;

        Some(path)
    });
}

/// Append a user+model message pair to the transcript.
pub fn log_exchange(user_msg: &str, model_msg: &str) {
    let Some(Some(path)) = LOG_PATH.get() else { return };

    let mut file = match OpenOptions::new().append(true).open(path) {
        Ok(f) => f,
        Err(_) => return,
    };

    let now = Local::now().format("%H:%M:%S");
    let entry = format!("[{now}] You:\n{user_msg}\n\n[{now}] Model:\n{model_msg}\n\n");

    let _ = file.write_all(entry.as_bytes());
}
