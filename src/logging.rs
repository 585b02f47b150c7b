//! Tracing setup for the segprep binaries.
//!
//! Events go to stderr so stdout carries only the one-line step summary.
//! Each launch also writes `segprep_<timestamp>.log` under `.segprep/logs/`,
//! and only the newest [`KEEP_LOG_FILES`] of those survive. `RUST_LOG` picks
//! the filter, defaulting to `info`.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::SystemTime,
};

use time::{
    OffsetDateTime, UtcOffset, format_description::BorrowedFormatItem,
    macros::format_description,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*};

use crate::app_dirs::{self, AppDirError};

/// Log files kept in the log directory after a launch.
pub const KEEP_LOG_FILES: usize = 10;
const FILE_STEM: &str = "segprep";
const FILE_STAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
const LINE_STAMP: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// This launch's log file and the guard that flushes it on exit.
struct Installed {
    path: PathBuf,
    _guard: WorkerGuard,
}

static INSTALLED: OnceLock<Installed> = OnceLock::new();

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error(transparent)]
    Dirs(#[from] AppDirError),
    #[error("Log file I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to open log file: {0}")]
    Appender(#[from] InitError),
    #[error("Failed to timestamp log file name: {0}")]
    FormatTime(#[from] time::error::Format),
    #[error("Another global tracing subscriber is installed: {0}")]
    SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Install logging with files under `.segprep/logs/`.
///
/// Returns this launch's log file. Later calls return the same path.
pub fn init() -> Result<PathBuf, LoggingError> {
    if let Some(installed) = INSTALLED.get() {
        return Ok(installed.path.clone());
    }
    init_in(&app_dirs::logs_dir()?)
}

/// [`init`] with an explicit log directory.
pub fn init_in(log_dir: &Path) -> Result<PathBuf, LoggingError> {
    if let Some(installed) = INSTALLED.get() {
        return Ok(installed.path.clone());
    }
    fs::create_dir_all(log_dir).map_err(|source| LoggingError::Io {
        path: log_dir.to_path_buf(),
        source,
    })?;
    let file_name = log_file_name(now())?;
    let path = log_dir.join(&file_name);
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(&file_name)
        .build(log_dir)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    prune_logs(log_dir, KEEP_LOG_FILES)?;

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let timer = fmt::time::OffsetTime::new(offset, BorrowedFormatItem::from(LINE_STAMP));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default()
        .with(filter)
        .with(
            fmt::layer()
                .with_timer(timer.clone())
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_timer(timer)
                .with_writer(file_writer),
        );
    tracing::subscriber::set_global_default(subscriber)?;
    let _ = INSTALLED.set(Installed {
        path: path.clone(),
        _guard: guard,
    });

    tracing::debug!(path = %path.display(), "logging initialized");
    Ok(path)
}

fn log_file_name(at: OffsetDateTime) -> Result<String, LoggingError> {
    Ok(format!("{FILE_STEM}_{}.log", at.format(FILE_STAMP)?))
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Delete the oldest `*.log` files in `dir` until at most `keep` remain.
fn prune_logs(dir: &Path, keep: usize) -> Result<(), LoggingError> {
    let io_error = |path: &Path, source| LoggingError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut logs: Vec<(SystemTime, PathBuf)> = fs::read_dir(dir)
        .map_err(|source| io_error(dir, source))?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "log"))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();
    logs.sort();
    let excess = logs.len().saturating_sub(keep);
    for (_, path) in logs.drain(..excess) {
        fs::remove_file(&path).map_err(|source| io_error(&path, source))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs::File, time::Duration};
    use tempfile::tempdir;

    #[test]
    fn log_file_name_carries_launch_time() {
        let at = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(log_file_name(at).unwrap(), "segprep_2023-11-14_22-13-20.log");
    }

    #[test]
    fn prune_keeps_newest_logs_and_ignores_other_files() {
        let dir = tempdir().unwrap();
        for idx in 0..12u64 {
            let file = File::create(dir.path().join(format!("segprep_{idx:02}.log"))).unwrap();
            file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000 + idx))
                .unwrap();
        }
        fs::write(dir.path().join("params.toml"), "").unwrap();

        prune_logs(dir.path(), 10).unwrap();
        let mut names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names.len(), 11);
        assert_eq!(names[0], "params.toml");
        assert_eq!(names[1], "segprep_02.log");
        assert_eq!(names[10], "segprep_11.log");
    }
}
