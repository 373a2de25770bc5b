use diagram_collab_core::{ClientOptions, RoomId, DEFAULT_ROOM};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Relay server URL (http, https, ws or wss)
    pub server_url: ConfigValue<String>,
    /// Room joined when none is given on the command line
    pub room: ConfigValue<String>,
    /// Document file; when unset each room gets its own file in the data dir
    pub document_path: ConfigValue<Option<PathBuf>>,
    /// Quiet period before local edits are broadcast
    pub debounce_ms: ConfigValue<u64>,
    /// Wait between a dropped connection and the next attempt
    pub reconnect_delay_ms: ConfigValue<u64>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    server_url: Option<String>,
    room: Option<String>,
    document_path: Option<PathBuf>,
    debounce_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let defaults = ClientOptions::default();

        // Start with defaults
        let mut server_url = ConfigValue::new(
            "http://localhost:8000".to_string(),
            ConfigSource::Default,
        );
        let mut room = ConfigValue::new(DEFAULT_ROOM.to_string(), ConfigSource::Default);
        let mut document_path = ConfigValue::new(None, ConfigSource::Default);
        let mut debounce_ms = ConfigValue::new(
            defaults.debounce.as_millis() as u64,
            ConfigSource::Default,
        );
        let mut reconnect_delay_ms = ConfigValue::new(
            defaults.reconnect_delay.as_millis() as u64,
            ConfigSource::Default,
        );
        let mut config_file = None;

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            if let Some(url) = file_config.server_url {
                server_url = ConfigValue::new(url, ConfigSource::File);
            }
            if let Some(name) = file_config.room {
                room = ConfigValue::new(name, ConfigSource::File);
            }
            if let Some(doc_path) = file_config.document_path {
                // Resolve relative paths against config file's directory
                let resolved_path = if doc_path.is_relative() {
                    path.parent().map(|p| p.join(&doc_path)).unwrap_or(doc_path)
                } else {
                    doc_path
                };
                document_path = ConfigValue::new(Some(resolved_path), ConfigSource::File);
            }
            if let Some(ms) = file_config.debounce_ms {
                debounce_ms = ConfigValue::new(ms, ConfigSource::File);
            }
            if let Some(ms) = file_config.reconnect_delay_ms {
                reconnect_delay_ms = ConfigValue::new(ms, ConfigSource::File);
            }
        }

        // Apply environment variable overrides
        if let Ok(url) = std::env::var("DIAGRAM_SERVER_URL") {
            server_url = ConfigValue::new(url, ConfigSource::Environment);
        }
        if let Ok(name) = std::env::var("DIAGRAM_ROOM") {
            room = ConfigValue::new(name, ConfigSource::Environment);
        }
        if let Ok(doc_path) = std::env::var("DIAGRAM_DOCUMENT_PATH") {
            document_path =
                ConfigValue::new(Some(PathBuf::from(doc_path)), ConfigSource::Environment);
        }
        if let Some(ms) = env_millis("DIAGRAM_DEBOUNCE_MS")? {
            debounce_ms = ConfigValue::new(ms, ConfigSource::Environment);
        }
        if let Some(ms) = env_millis("DIAGRAM_RECONNECT_MS")? {
            reconnect_delay_ms = ConfigValue::new(ms, ConfigSource::Environment);
        }

        Ok(Self {
            server_url,
            room,
            document_path,
            debounce_ms,
            reconnect_delay_ms,
            config_file,
        })
    }

    /// Timing options for the sync client
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            debounce: Duration::from_millis(self.debounce_ms.value),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms.value),
        }
    }

    /// Document file for `room`: the configured path, or
    /// `<data dir>/<room>.bpmn`.
    pub fn document_path_for(&self, room: &RoomId) -> PathBuf {
        match &self.document_path.value {
            Some(path) => path.clone(),
            None => {
                let file_stem = room.as_str().replace(['/', '\\'], "_");
                Self::default_data_dir().join(format!("{}.bpmn", file_stem))
            }
        }
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/diagram-collab/
    /// - macOS: ~/Library/Application Support/diagram-collab/
    /// - Windows: %APPDATA%/diagram-collab/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("diagram-collab")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/diagram-collab/
    /// - macOS: ~/Library/Application Support/diagram-collab/
    /// - Windows: %APPDATA%/diagram-collab/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("diagram-collab")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

fn env_millis(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv(name, raw)),
        Err(_) => Ok(None),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidEnv(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidEnv(name, value) => {
                write!(f, "Invalid value '{}' for {}: expected milliseconds", value, name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.server_url.value, "http://localhost:8000");
        assert_eq!(config.server_url.source, ConfigSource::Default);
        assert_eq!(config.room.value, "default");
        assert_eq!(config.debounce_ms.value, 400);
        assert_eq!(config.reconnect_delay_ms.value, 3000);
        assert!(config.document_path.value.is_none());
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "server_url: https://diagrams.example.com").unwrap();
        writeln!(file, "room: sales").unwrap();
        writeln!(file, "document_path: /tmp/sales.bpmn").unwrap();
        writeln!(file, "debounce_ms: 250").unwrap();
        writeln!(file, "reconnect_delay_ms: 1000").unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(config.server_url.value, "https://diagrams.example.com");
        assert_eq!(config.server_url.source, ConfigSource::File);
        assert_eq!(config.room.value, "sales");
        assert_eq!(
            config.document_path.value,
            Some(PathBuf::from("/tmp/sales.bpmn"))
        );
        assert_eq!(config.config_file, Some(config_path));

        let options = config.client_options();
        assert_eq!(options.debounce, Duration::from_millis(250));
        assert_eq!(options.reconnect_delay, Duration::from_millis(1000));
    }

    #[test]
    fn test_relative_document_path_resolves_against_config_dir() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "document_path: diagrams/main.bpmn").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(
            config.document_path_for(&RoomId::new("anything")),
            temp_dir.path().join("diagrams/main.bpmn")
        );
    }

    #[test]
    fn test_document_path_defaults_per_room() {
        let temp_dir = tempdir().unwrap();
        let config = Config::load(Some(temp_dir.path().join("none.yaml"))).unwrap();

        let path = config.document_path_for(&RoomId::new("team1"));
        assert!(path.ends_with("diagram-collab/team1.bpmn"));
    }

    #[test]
    #[ignore] // Run with --ignored; env vars can pollute parallel tests
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "room: fromfile").unwrap();

        std::env::set_var("DIAGRAM_ROOM", "fromenv");
        std::env::set_var("DIAGRAM_DEBOUNCE_MS", "100");

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.room.value, "fromenv");
        assert_eq!(config.room.source, ConfigSource::Environment);
        assert_eq!(config.debounce_ms.value, 100);

        std::env::remove_var("DIAGRAM_ROOM");
        std::env::remove_var("DIAGRAM_DEBOUNCE_MS");
    }

    #[test]
    #[ignore] // Run with --ignored; env vars can pollute parallel tests
    fn test_invalid_env_millis() {
        std::env::set_var("DIAGRAM_RECONNECT_MS", "soon");

        let temp_dir = tempdir().unwrap();
        let result = Config::load(Some(temp_dir.path().join("none.yaml")));
        std::env::remove_var("DIAGRAM_RECONNECT_MS");

        let err = result.unwrap_err();
        assert!(err.to_string().contains("DIAGRAM_RECONNECT_MS"));
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "invalid: yaml: content: [").unwrap();

        let result = Config::load(Some(config_path));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_partial_file_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "room: fileroom").unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.server_url.source, ConfigSource::Default);
        assert_eq!(config.room.value, "fileroom");
        assert_eq!(config.room.source, ConfigSource::File);
        assert_eq!(config.debounce_ms.source, ConfigSource::Default);
    }
}
