//! Configuration and settings management.
//!
//! This module provides application settings types and persistence.
//! Settings are stored in the user's config directory as JSON; the
//! database lives in the user's data directory.

mod settings;

pub use settings::{
    ClassifierSettings, MailboxSettings, NotifySettings, RunnerSettings, Settings, TriageSettings,
};

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;

/// Errors that can occur while loading or saving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a home directory for this platform")]
    NoHomeDirectory,

    #[error("failed to read or write settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("io", "cull", "cull").ok_or(ConfigError::NoHomeDirectory)
}

/// Default settings file path, `~/.config/cull/settings.json` on Linux.
pub fn default_settings_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("settings.json"))
}

/// Default database path, `~/.local/share/cull/cull.db3` on Linux.
pub fn default_database_path() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().join("cull.db3"))
}

/// Loads settings from `path`, falling back to defaults when no file
/// exists yet.
///
/// A file that exists but fails to parse is an error rather than a
/// fallback: silently reverting to defaults would re-enable triage
/// behavior the user had turned off.
pub fn load_or_default(path: &Path) -> Result<Settings> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
        Err(e) => Err(e.into()),
    }
}

/// Saves settings to `path`, creating parent directories as needed.
pub fn save(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let settings = load_or_default(&path).unwrap();
        assert_eq!(settings.runner.max_messages_per_run, 25);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = Settings::default();
        settings.triage.trusted_domains = vec!["corp.example".to_string()];
        settings.runner.time_budget_seconds = 120;

        save(&settings, &path).unwrap();
        let loaded = load_or_default(&path).unwrap();

        assert_eq!(loaded.triage.trusted_domains, vec!["corp.example"]);
        assert_eq!(loaded.runner.time_budget_seconds, 120);
    }

    #[test]
    fn corrupt_file_is_an_error_not_a_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = load_or_default(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
