use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tempfile::NamedTempFile;

use crate::core::config::data::{path_display, Config};

/// Overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "SAYLO_CONFIG";

#[derive(Debug)]
pub enum ConfigError {
    Read { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, source: toml::de::Error },
    Encode(toml::ser::Error),
    Write { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "cannot read {}: {source}", path_display(path))
            }
            ConfigError::Parse { path, source } => {
                write!(f, "{} is not valid TOML: {source}", path_display(path))
            }
            ConfigError::Encode(err) => write!(f, "cannot encode settings: {err}"),
            ConfigError::Write { path, source } => {
                write!(f, "cannot save {}: {source}", path_display(path))
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } | ConfigError::Write { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Encode(err) => Some(err),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "saylo", "saylo")
}

pub(crate) fn default_history_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("history"))
        .unwrap_or_else(|| PathBuf::from("saylo-history"))
}

/// Replace `path` with `contents` in one rename, creating parent directories.
fn replace_file(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            dir
        }
        None => Path::new("."),
    };
    let mut staged = NamedTempFile::new_in(dir)?;
    staged.write_all(contents)?;
    staged.as_file().sync_all()?;
    staged.persist(path).map_err(|err| err.error)?;
    Ok(())
}

impl Config {
    pub fn load() -> Result<Config, ConfigError> {
        Self::load_from_path(&Self::get_config_path())
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to_path(&Self::get_config_path())
    }

    /// A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Config, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self).map_err(ConfigError::Encode)?;
        replace_file(path, text.as_bytes()).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// `$SAYLO_CONFIG` when set, otherwise `config.toml` in the platform config dir.
    pub fn get_config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        project_dirs()
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("saylo.toml"))
    }
}
