//! Application configuration management
//!
//! Configuration is a YAML file (path from `CONFIG_PATH`, default
//! `config.yaml`) with a few environment overrides applied on top.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::filename_parser::{DEFAULT_CD_MARKERS, ParserRules, RuleError};

/// Bytes per configured megabyte
pub const MB: u64 = 1024 * 1024;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const TEMPLATE_FILE_NAME: &str = "config.example.yaml";

const CONFIG_TEMPLATE: &str = r#"# Offline librarian configuration
remote:
  # Base URL of the offline-download service API
  base_url: "https://remote.example.com/api"
  # Session cookie string (REMOTE_COOKIES overrides this)
  cookies: ""
  # Polling interval bounds in seconds
  poll_interval_min: 300
  poll_interval_max: 600
  # Remove the remote job after its files were organized
  cleanup_remote_task: false

media:
  # Files below this size (MB) are not organized
  min_transfer_size: 200
  video_formats: [mp4, mkv, avi, wmv, mov, m4v, ts, iso]
  label:
    # Substrings stripped from filenames before looking for a code
    remove_keywords: ["hhd800.com@", "_X1080X"]
  libraries:
    - name: movies
      download_path: /downloads/movies
      target_path: /media/movies
      mode: system
    - name: studio
      download_path: /downloads/studio
      target_path: /media/studio
      mode: label
      label: STUDIO
      min_transfer_size: 300

server:
  bind_address: "0.0.0.0:8115"

database:
  url: "sqlite://data/offline-librarian.db"
"#;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "configuration file {} not found, a template was written to {}",
        path.display(),
        template.display()
    )]
    Missing { path: PathBuf, template: PathBuf },

    #[error("failed to {operation} {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid parser rules")]
    Rules(#[from] RuleError),
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    pub media: MediaConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Offline-download service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,

    /// Session credential sent as the `Cookie` header
    #[serde(default)]
    pub cookies: String,

    /// Lower bound of the polling interval in seconds
    #[serde(default = "default_poll_interval_min")]
    pub poll_interval_min: u64,

    /// Upper bound of the polling interval in seconds
    #[serde(default = "default_poll_interval_max")]
    pub poll_interval_max: u64,

    #[serde(default)]
    pub cleanup_remote_task: bool,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Media organization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Default size threshold in MB
    #[serde(default)]
    pub min_transfer_size: i64,

    #[serde(default = "default_video_formats")]
    pub video_formats: Vec<String>,

    #[serde(default)]
    pub libraries: Vec<Library>,

    #[serde(default)]
    pub label: LabelConfig,
}

/// Rules for label-mode libraries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelConfig {
    #[serde(default)]
    pub remove_keywords: Vec<String>,

    /// CD marker patterns, each with a named `index` capture
    #[serde(default = "default_cd_markers")]
    pub cd_markers: Vec<String>,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            remove_keywords: Vec::new(),
            cd_markers: default_cd_markers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8115".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/offline-librarian.db".to_string(),
        }
    }
}

/// How a library lays out organized files
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizeMode {
    /// Keep the source-relative layout under the target path
    System,
    /// `{target}/{label}/{code}/{code}[-CD{n}].{ext}`
    Label { label: String },
}

impl OrganizeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizeMode::System => "system",
            OrganizeMode::Label { .. } => "label",
        }
    }
}

/// A download/target directory pair with an organization mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawLibrary", into = "RawLibrary")]
pub struct Library {
    pub name: String,
    pub download_path: PathBuf,
    pub target_path: PathBuf,
    pub mode: OrganizeMode,
    /// Size threshold override in MB; `<= 0` uses the default
    pub min_transfer_size: i64,
}

impl Library {
    /// Effective size threshold in bytes
    pub fn threshold_bytes(&self, default_mb: i64) -> u64 {
        let mb = if self.min_transfer_size > 0 {
            self.min_transfer_size
        } else {
            default_mb
        };
        u64::try_from(mb).unwrap_or(0) * MB
    }
}

/// Flat YAML shape of a library entry
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawLibrary {
    name: String,
    download_path: PathBuf,
    target_path: PathBuf,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default)]
    min_transfer_size: i64,
}

impl TryFrom<RawLibrary> for Library {
    type Error = String;

    fn try_from(raw: RawLibrary) -> Result<Self, Self::Error> {
        let mode = match raw.mode.to_ascii_lowercase().as_str() {
            "system" => OrganizeMode::System,
            "label" => {
                let label = raw
                    .label
                    .ok_or_else(|| format!("library '{}': label mode requires a label", raw.name))?;
                OrganizeMode::Label { label }
            }
            other => return Err(format!("library '{}': unknown mode '{}'", raw.name, other)),
        };

        Ok(Library {
            name: raw.name,
            download_path: raw.download_path,
            target_path: raw.target_path,
            mode,
            min_transfer_size: raw.min_transfer_size,
        })
    }
}

impl From<Library> for RawLibrary {
    fn from(library: Library) -> Self {
        let (mode, label) = match library.mode {
            OrganizeMode::System => ("system".to_string(), None),
            OrganizeMode::Label { label } => ("label".to_string(), Some(label)),
        };
        RawLibrary {
            name: library.name,
            download_path: library.download_path,
            target_path: library.target_path,
            mode,
            label,
            min_transfer_size: library.min_transfer_size,
        }
    }
}

fn default_mode() -> String {
    "system".to_string()
}

fn default_poll_interval_min() -> u64 {
    300
}

fn default_poll_interval_max() -> u64 {
    600
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_video_formats() -> Vec<String> {
    ["mp4", "mkv", "avi", "wmv", "mov", "m4v", "ts", "iso"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_cd_markers() -> Vec<String> {
    DEFAULT_CD_MARKERS.iter().map(|s| s.to_string()).collect()
}

impl Config {
    /// Load configuration from `CONFIG_PATH` (or `config.yaml`) plus environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read a YAML file. A missing file produces a template next to it.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let template = write_template(path)?;
            return Err(ConfigError::Missing {
                path: path.to_path_buf(),
                template,
            });
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            operation: "read",
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    /// Apply `REMOTE_COOKIES`, `DATABASE_URL` and `BIND_ADDRESS` overrides
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(cookies) = lookup("REMOTE_COOKIES").filter(|v| !v.is_empty()) {
            self.remote.cookies = cookies;
        }
        if let Some(url) = lookup("DATABASE_URL").filter(|v| !v.is_empty()) {
            self.database.url = url;
        }
        if let Some(bind) = lookup("BIND_ADDRESS").filter(|v| !v.is_empty()) {
            self.server.bind_address = bind;
        }
    }

    /// Check invariants and normalize video formats to lowercase
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.remote.poll_interval_min == 0 {
            return Err(ConfigError::Invalid(
                "remote.poll_interval_min must be greater than 0".to_string(),
            ));
        }
        if self.remote.poll_interval_min > self.remote.poll_interval_max {
            return Err(ConfigError::Invalid(format!(
                "remote.poll_interval_min ({}) is greater than remote.poll_interval_max ({})",
                self.remote.poll_interval_min, self.remote.poll_interval_max
            )));
        }

        let mut names = HashSet::new();
        for library in &self.media.libraries {
            if library.name.trim().is_empty() {
                return Err(ConfigError::Invalid("library name must not be empty".to_string()));
            }
            if !names.insert(library.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate library name '{}'",
                    library.name
                )));
            }
            if let OrganizeMode::Label { label } = &library.mode {
                validate_label(&library.name, label)?;
            }
        }

        for format in &mut self.media.video_formats {
            *format = format.trim_start_matches('.').to_ascii_lowercase();
        }

        self.parser_rules()?;
        Ok(())
    }

    /// Compile the label parsing rules
    pub fn parser_rules(&self) -> Result<ParserRules, ConfigError> {
        Ok(ParserRules::new(
            &self.media.label.remove_keywords,
            &self.media.label.cd_markers,
        )?)
    }

    pub fn find_library(&self, name: &str) -> Option<&Library> {
        self.media.libraries.iter().find(|l| l.name == name)
    }

    /// Copy safe to expose over the API
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if !config.remote.cookies.is_empty() {
            config.remote.cookies = "***".to_string();
        }
        config
    }
}

fn validate_label(library: &str, label: &str) -> Result<(), ConfigError> {
    if label.trim().is_empty() {
        return Err(ConfigError::Invalid(format!(
            "library '{}': label must not be empty",
            library
        )));
    }
    if label.contains(['/', '\\']) || label == "." || label == ".." {
        return Err(ConfigError::Invalid(format!(
            "library '{}': label '{}' is not a single path component",
            library, label
        )));
    }
    Ok(())
}

fn write_template(path: &Path) -> Result<PathBuf, ConfigError> {
    let template = path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(TEMPLATE_FILE_NAME);
    std::fs::write(&template, CONFIG_TEMPLATE).map_err(|source| ConfigError::Io {
        operation: "write template",
        path: template.clone(),
        source,
    })?;
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SAMPLE: &str = r#"
remote:
  base_url: "http://localhost:9000"
  cookies: "UID=1; CID=2"
  poll_interval_min: 5
  poll_interval_max: 10
media:
  min_transfer_size: 100
  video_formats: [MP4, .mkv]
  label:
    remove_keywords: ["hhd800.com@"]
  libraries:
    - name: movies
      download_path: /dl/movies
      target_path: /media/movies
    - name: studio
      download_path: /dl/studio
      target_path: /media/studio
      mode: label
      label: STUDIO
      min_transfer_size: 300
"#;

    fn sample() -> Config {
        let mut config = Config::from_yaml_str(SAMPLE).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn test_parse_sample() {
        let config = sample();
        assert_eq!(config.remote.poll_interval_min, 5);
        assert!(!config.remote.cleanup_remote_task);
        assert_eq!(config.media.video_formats, vec!["mp4", "mkv"]);
        assert_eq!(config.server.bind_address, "0.0.0.0:8115");

        let movies = config.find_library("movies").unwrap();
        assert_eq!(movies.mode, OrganizeMode::System);

        let studio = config.find_library("studio").unwrap();
        assert_eq!(
            studio.mode,
            OrganizeMode::Label {
                label: "STUDIO".to_string()
            }
        );
        assert_eq!(config.media.label.cd_markers.len(), DEFAULT_CD_MARKERS.len());
    }

    #[test]
    fn test_threshold_override() {
        let config = sample();
        let movies = config.find_library("movies").unwrap();
        let studio = config.find_library("studio").unwrap();
        assert_eq!(movies.threshold_bytes(config.media.min_transfer_size), 100 * MB);
        assert_eq!(studio.threshold_bytes(config.media.min_transfer_size), 300 * MB);
    }

    #[test]
    fn test_negative_override_uses_default() {
        let mut config = sample();
        config.media.libraries[1].min_transfer_size = -1;
        assert_eq!(config.media.libraries[1].threshold_bytes(100), 100 * MB);
    }

    #[test]
    fn test_rejects_inverted_interval() {
        let mut config = sample();
        config.remote.poll_interval_min = 20;
        assert_matches!(config.validate(), Err(ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_duplicate_library_names() {
        let mut config = sample();
        let duplicate = config.media.libraries[0].clone();
        config.media.libraries.push(duplicate);
        assert_matches!(config.validate(), Err(ConfigError::Invalid(msg)) => {
            assert!(msg.contains("duplicate"));
        });
    }

    #[test]
    fn test_rejects_label_with_separator() {
        let mut config = sample();
        config.media.libraries[1].mode = OrganizeMode::Label {
            label: "../escape".to_string(),
        };
        assert_matches!(config.validate(), Err(ConfigError::Invalid(_)));
    }

    #[test]
    fn test_label_mode_requires_label() {
        let yaml = SAMPLE.replace("      label: STUDIO\n", "");
        assert_matches!(Config::from_yaml_str(&yaml), Err(ConfigError::Parse(_)));
    }

    #[test]
    fn test_rejects_invalid_cd_marker() {
        let mut config = sample();
        config.media.label.cd_markers = vec!["CD\\d".to_string()];
        assert_matches!(config.validate(), Err(ConfigError::Rules(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = sample();
        config.apply_overrides(|key| match key {
            "REMOTE_COOKIES" => Some("UID=override".to_string()),
            "BIND_ADDRESS" => Some("127.0.0.1:9999".to_string()),
            _ => None,
        });
        assert_eq!(config.remote.cookies, "UID=override");
        assert_eq!(config.server.bind_address, "127.0.0.1:9999");
        assert_eq!(config.database.url, "sqlite://data/offline-librarian.db");
    }

    #[test]
    fn test_redacted_hides_cookies() {
        let config = sample();
        assert_eq!(config.redacted().remote.cookies, "***");
    }

    #[test]
    fn test_missing_file_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let result = Config::from_file(&path);
        assert_matches!(result, Err(ConfigError::Missing { template, .. }) => {
            assert!(template.exists());
            let contents = std::fs::read_to_string(template).unwrap();
            let mut parsed = Config::from_yaml_str(&contents).unwrap();
            parsed.validate().unwrap();
        });
    }
}
