use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::models::DEFAULT_MODEL_ID;

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct Config {
    /// Model id used for new turns (e.g., "llama3.1-8b")
    pub selected_model: Option<String>,
    /// Directory holding conversation history; defaults to the platform data dir
    pub data_dir: Option<PathBuf>,
    /// Whole-request timeout in seconds; streams are unbounded when unset
    pub request_timeout_secs: Option<u64>,
}

/// Get a user-friendly display string for a path
/// Converts absolute paths to use ~ notation on Unix-like systems when possible
///
/// # Examples
/// - Unix: `/home/user/.config/saylo/config.toml` → `~/.config/saylo/config.toml`
/// - Windows: `C:\\Users\\user\\AppData\\Roaming\\saylo` → `C:\\Users\\user\\AppData\\Roaming\\saylo`
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}

impl Config {
    pub fn selected_model_id(&self) -> &str {
        self.selected_model
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(DEFAULT_MODEL_ID)
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(super::io::default_history_dir)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}
