use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PAGE_SIZE: usize = 1_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionLimits {
    pub buffered_timeout_secs: u64,
    pub schema_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub page_size: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            buffered_timeout_secs: 300,
            schema_timeout_secs: 30,
            connect_timeout_secs: 30,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ExecutionLimits {
    #[must_use]
    pub fn buffered_timeout(&self) -> Duration {
        Duration::from_secs(self.buffered_timeout_secs)
    }

    #[must_use]
    pub fn schema_timeout(&self) -> Duration {
        Duration::from_secs(self.schema_timeout_secs)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedConnection {
    pub name: String,
    pub adapter: String,
    pub dsn: String,
}

impl SavedConnection {
    #[must_use]
    pub fn new(name: impl Into<String>, adapter: impl Into<String>, dsn: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter: adapter.into(),
            dsn: dsn.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistorySettings {
    pub enabled: bool,
    pub path: Option<PathBuf>,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Settings {
    #[serde(default)]
    pub limits: ExecutionLimits,
    #[serde(default)]
    pub history: HistorySettings,
    #[serde(default)]
    pub connections: Vec<SavedConnection>,
}

impl Settings {
    fn normalize(&mut self) {
        let mut by_name = std::collections::BTreeMap::new();
        for connection in self.connections.drain(..) {
            by_name.insert(connection.name.clone(), connection);
        }
        self.connections = by_name.into_values().collect();
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write settings file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FileSettingsStore {
    path: PathBuf,
    settings: Settings,
}

impl FileSettingsStore {
    pub fn load_default() -> Result<Self, SettingsError> {
        Self::load_from_path(config_dir()?.join("settings.toml"))
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                settings: Settings::default(),
            });
        }

        let raw = fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.clone(),
            source,
        })?;

        if raw.trim().is_empty() {
            return Ok(Self {
                path,
                settings: Settings::default(),
            });
        }

        let mut settings: Settings =
            toml::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.clone(),
                source,
            })?;
        settings.normalize();

        Ok(Self { path, settings })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn connection(&self, name: &str) -> Option<&SavedConnection> {
        self.settings
            .connections
            .iter()
            .find(|connection| connection.name == name)
    }

    pub fn upsert_connection(&mut self, connection: SavedConnection) {
        let connections = &mut self.settings.connections;
        if let Some(existing) = connections
            .iter_mut()
            .find(|existing| existing.name == connection.name)
        {
            *existing = connection;
        } else {
            connections.push(connection);
            connections.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        }
    }

    #[must_use]
    pub fn delete_connection(&mut self, name: &str) -> bool {
        let connections = &mut self.settings.connections;
        let original_len = connections.len();
        connections.retain(|connection| connection.name != name);
        connections.len() != original_len
    }

    pub fn persist(&self) -> Result<(), SettingsError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| SettingsError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered = toml::to_string_pretty(&self.settings)
            .map_err(|source| SettingsError::Serialize { source })?;

        fs::write(&self.path, rendered).map_err(|source| SettingsError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

/// `$SQLNAV_CONFIG_DIR`, else the platform config directory joined with
/// `sqlnav`.
pub fn config_dir() -> Result<PathBuf, SettingsError> {
    if let Some(custom) = env::var_os("SQLNAV_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(SettingsError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(SettingsError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("sqlnav"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::{ExecutionLimits, FileSettingsStore, SavedConnection, DEFAULT_PAGE_SIZE};

    #[test]
    fn missing_settings_file_loads_defaults() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let store = FileSettingsStore::load_from_path(temp_dir.path().join("settings.toml"))
            .expect("failed to load store");

        let limits = store.settings().limits;
        assert_eq!(limits.buffered_timeout(), Duration::from_secs(300));
        assert_eq!(limits.schema_timeout(), Duration::from_secs(30));
        assert_eq!(limits.connect_timeout(), Duration::from_secs(30));
        assert_eq!(limits.page_size(), DEFAULT_PAGE_SIZE);
        assert!(store.settings().history.enabled);
        assert!(store.settings().connections.is_empty());
    }

    #[test]
    fn partial_limits_fall_back_to_defaults() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("settings.toml");
        std::fs::write(&path, "[limits]\npage_size = 0\nschema_timeout_secs = 5\n")
            .expect("failed to seed settings");

        let store = FileSettingsStore::load_from_path(&path).expect("failed to load store");
        let limits = store.settings().limits;

        assert_eq!(limits.schema_timeout(), Duration::from_secs(5));
        assert_eq!(limits.page_size(), DEFAULT_PAGE_SIZE, "zero page size is normalised");
        assert_eq!(
            limits.buffered_timeout(),
            ExecutionLimits::default().buffered_timeout()
        );
    }

    #[test]
    fn upsert_persist_reload_and_delete_connection() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("nested").join("settings.toml");

        let mut store = FileSettingsStore::load_from_path(&path).expect("failed to load store");
        store.upsert_connection(SavedConnection::new(
            "staging",
            "postgres",
            "postgres://app@staging/app",
        ));
        store.upsert_connection(SavedConnection::new("local", "mysql", "mysql://root@localhost/app"));
        store.persist().expect("failed to persist store");

        let mut reloaded = FileSettingsStore::load_from_path(&path).expect("failed to reload");
        let names: Vec<_> = reloaded
            .settings()
            .connections
            .iter()
            .map(|connection| connection.name.as_str())
            .collect();
        assert_eq!(names, vec!["local", "staging"]);

        reloaded.upsert_connection(SavedConnection::new(
            "local",
            "mysql",
            "mysql://root@localhost/app_dev",
        ));
        assert_eq!(
            reloaded.connection("local").map(|c| c.dsn.as_str()),
            Some("mysql://root@localhost/app_dev")
        );

        assert!(reloaded.delete_connection("staging"));
        assert!(!reloaded.delete_connection("staging"));
        reloaded.persist().expect("failed to persist deletion");

        let reloaded = FileSettingsStore::load_from_path(path).expect("failed final reload");
        assert!(reloaded.connection("staging").is_none());
        assert_eq!(reloaded.settings().connections.len(), 1);
    }

    #[test]
    fn duplicate_connection_names_collapse_to_the_last_entry() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("settings.toml");
        std::fs::write(
            &path,
            r#"
[[connections]]
name = "db"
adapter = "mysql"
dsn = "mysql://first/app"

[[connections]]
name = "db"
adapter = "postgres"
dsn = "postgres://second/app"
"#,
        )
        .expect("failed to seed settings");

        let store = FileSettingsStore::load_from_path(&path).expect("failed to load store");
        assert_eq!(store.settings().connections.len(), 1);
        assert_eq!(store.connection("db").map(|c| c.adapter.as_str()), Some("postgres"));
    }
}
