//! Where segprep keeps its own files.
//!
//! Everything lives under `<base>/.segprep/`: `logs/` for per-launch log
//! files, `datasets/` for downloaded archives and `artifacts/` for the default
//! local artifact store. `<base>` is `SEGPREP_HOME` when set, otherwise the OS
//! config directory.

use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

use directories::BaseDirs;
use thiserror::Error;

/// Folder created under the base directory.
pub const APP_DIR_NAME: &str = ".segprep";
/// Environment variable replacing the OS config directory as base.
pub const HOME_ENV: &str = "SEGPREP_HOME";

#[derive(Debug, Error)]
pub enum AppDirError {
    #[error("Neither {HOME_ENV} nor an OS config directory is available")]
    NoBaseDir,
    #[error("Failed to create application directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Subdirectories of the `.segprep` root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppDir {
    Logs,
    Datasets,
    Artifacts,
}

impl AppDir {
    fn name(self) -> &'static str {
        match self {
            AppDir::Logs => "logs",
            AppDir::Datasets => "datasets",
            AppDir::Artifacts => "artifacts",
        }
    }

    /// Resolve the directory for this process and create it if missing.
    pub fn ensure(self) -> Result<PathBuf, AppDirError> {
        let base = base_dir().ok_or(AppDirError::NoBaseDir)?;
        self.ensure_under(&base)
    }

    fn ensure_under(self, base: &Path) -> Result<PathBuf, AppDirError> {
        let path = base.join(APP_DIR_NAME).join(self.name());
        fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}

pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    AppDir::Logs.ensure()
}

pub fn datasets_dir() -> Result<PathBuf, AppDirError> {
    AppDir::Datasets.ensure()
}

pub fn artifacts_dir() -> Result<PathBuf, AppDirError> {
    AppDir::Artifacts.ensure()
}

fn base_dir() -> Option<PathBuf> {
    pick_base(std::env::var_os(HOME_ENV), || {
        BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
    })
}

/// A non-empty home override wins over the OS config directory.
fn pick_base(
    home: Option<OsString>,
    os_config: impl FnOnce() -> Option<PathBuf>,
) -> Option<PathBuf> {
    match home {
        Some(home) if !home.is_empty() => Some(PathBuf::from(home)),
        _ => os_config(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn subdirectories_are_created_under_the_app_folder() {
        let base = tempdir().unwrap();
        let root = base.path().join(APP_DIR_NAME);
        for (dir, name) in [
            (AppDir::Logs, "logs"),
            (AppDir::Datasets, "datasets"),
            (AppDir::Artifacts, "artifacts"),
        ] {
            let path = dir.ensure_under(base.path()).unwrap();
            assert_eq!(path, root.join(name));
            assert!(path.is_dir());
        }
    }

    #[test]
    fn home_override_beats_os_config_dir() {
        let os = || Some(PathBuf::from("/os/config"));
        assert_eq!(
            pick_base(Some(OsString::from("/portable")), os),
            Some(PathBuf::from("/portable"))
        );
        assert_eq!(pick_base(None, os), Some(PathBuf::from("/os/config")));
    }

    #[test]
    fn empty_home_override_is_ignored() {
        assert_eq!(pick_base(Some(OsString::new()), || None), None);
    }
}
