//! Logging for mptrack
//!
//! Files roll daily under `$XDG_STATE_HOME/mptrack/` as
//! `mptrack.log.YYYY-MM-DD`. Hosts that never call [`init`] get no logging;
//! the tracker only emits `tracing` events.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};

/// File name prefix; the appender adds `.YYYY-MM-DD`
pub const LOG_FILE_PREFIX: &str = "mptrack.log";

/// Install the file subscriber
///
/// `RUST_LOG` wins over the configured level. Keep the returned guard alive
/// for as long as logs should be flushed.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let (writer, guard) = tracing_appender::non_blocking(appender(&log_dir, config.max_files)?);

    tracing_subscriber::registry()
        .with(level_filter(&config.level))
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install log subscriber: {}", e)))?;

    tracing::info!(
        log_file = %log_file_path(chrono::Utc::now().date_naive()).display(),
        level = %config.level,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

fn appender(dir: &Path, max_files: usize) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(max_files.max(1))
        .build(dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))
}

fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Flushes pending log lines when dropped
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// File the appender writes to on `date` (UTC)
pub fn log_file_path(date: NaiveDate) -> PathBuf {
    Config::state_dir().join(format!("{}.{}", LOG_FILE_PREFIX, date.format("%Y-%m-%d")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_path_matches_daily_rotation() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let path = log_file_path(date);
        assert!(path.ends_with("mptrack/mptrack.log.2024-03-09"));
    }

    #[test]
    fn test_appender_writes_dated_file() {
        use std::io::Write;

        let dir = tempfile::TempDir::new().unwrap();
        let mut appender = appender(dir.path(), 3).unwrap();
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("mptrack.log."));
        assert_eq!(names[0].len(), "mptrack.log.".len() + "YYYY-MM-DD".len());
    }
}
