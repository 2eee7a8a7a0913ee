//! CLI configuration: defaults, an optional TOML file, and flag overrides.

use crate::controller::{ControllerError, ControllerResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default store location, relative to the working directory.
pub const DEFAULT_STORE: &str = "stash.db";

/// Default remote host.
pub const DEFAULT_HOST: &str = "http://localhost:8080";

/// Default maximum age of the local store before a read triggers a refresh.
pub const DEFAULT_MAX_AGE_SECS: u64 = 300;

const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Values read from the configuration file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Remote host URL.
    pub host: Option<String>,
    /// Store directory.
    pub store: Option<PathBuf>,
    /// Freshness window for reads, in seconds.
    pub max_age_secs: Option<u64>,
    /// Entities requested per page.
    pub page_size: Option<u32>,
    /// Attempts per remote call.
    pub retry_attempts: Option<u32>,
    /// HTTP request timeout, in seconds.
    pub timeout_secs: Option<u64>,
    /// Account storage quota, in bytes.
    pub quota_bytes: Option<u64>,
}

impl FileConfig {
    /// Loads the file at `path`, or returns empty values when no path is given.
    pub fn load(path: Option<&Path>) -> ControllerResult<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&text)
            .map_err(|e| ControllerError::Config(format!("{}: {e}", path.display())))
    }

    /// Parses TOML text.
    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

/// Values given on the command line. `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct FlagOverrides {
    /// `--host`.
    pub host: Option<String>,
    /// `--store`.
    pub store: Option<PathBuf>,
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Remote host URL.
    pub host: String,
    /// Store directory.
    pub store: PathBuf,
    /// Freshness window for reads.
    pub max_age: Duration,
    /// Entities requested per page.
    pub page_size: u32,
    /// Attempts per remote call.
    pub retry_attempts: u32,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Account storage quota, in bytes.
    pub quota_bytes: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            store: PathBuf::from(DEFAULT_STORE),
            max_age: Duration::from_secs(DEFAULT_MAX_AGE_SECS),
            page_size: DEFAULT_PAGE_SIZE,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            quota_bytes: None,
        }
    }
}

impl Settings {
    /// Layers flags over file values over defaults.
    pub fn resolve(flags: FlagOverrides, file: FileConfig) -> ControllerResult<Self> {
        let defaults = Self::default();
        let page_size = file.page_size.unwrap_or(defaults.page_size);
        if page_size == 0 {
            return Err(ControllerError::Config(
                "page_size must be at least 1".to_string(),
            ));
        }
        let retry_attempts = file.retry_attempts.unwrap_or(defaults.retry_attempts);
        if retry_attempts == 0 {
            return Err(ControllerError::Config(
                "retry_attempts must be at least 1".to_string(),
            ));
        }
        let timeout = file
            .timeout_secs
            .map_or(defaults.timeout, Duration::from_secs);
        if timeout.is_zero() {
            return Err(ControllerError::Config(
                "timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            host: flags.host.or(file.host).unwrap_or(defaults.host),
            store: flags.store.or(file.store).unwrap_or(defaults.store),
            max_age: file
                .max_age_secs
                .map_or(defaults.max_age, Duration::from_secs),
            page_size,
            retry_attempts,
            timeout,
            quota_bytes: file.quota_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_without_file_or_flags() {
        let settings = Settings::resolve(FlagOverrides::default(), FileConfig::default()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.max_age, Duration::from_secs(300));
        assert_eq!(settings.host, "http://localhost:8080");
    }

    #[test]
    fn file_values_override_defaults() {
        let file = FileConfig::parse(
            r#"
            host = "https://sync.example.net"
            max_age_secs = 60
            page_size = 25
            quota_bytes = 1048576
            "#,
        )
        .unwrap();

        let settings = Settings::resolve(FlagOverrides::default(), file).unwrap();
        assert_eq!(settings.host, "https://sync.example.net");
        assert_eq!(settings.max_age, Duration::from_secs(60));
        assert_eq!(settings.page_size, 25);
        assert_eq!(settings.quota_bytes, Some(1_048_576));
        assert_eq!(settings.store, PathBuf::from(DEFAULT_STORE));
    }

    #[test]
    fn flags_override_file_values() {
        let file = FileConfig {
            host: Some("https://from-file".to_string()),
            store: Some(PathBuf::from("file.db")),
            ..FileConfig::default()
        };
        let flags = FlagOverrides {
            host: Some("https://from-flag".to_string()),
            store: None,
        };

        let settings = Settings::resolve(flags, file).unwrap();
        assert_eq!(settings.host, "https://from-flag");
        assert_eq!(settings.store, PathBuf::from("file.db"));
    }

    #[test]
    fn load_reads_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "store = \"/tmp/stash-test.db\"\nretry_attempts = 5").unwrap();

        let config = FileConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.store, Some(PathBuf::from("/tmp/stash-test.db")));
        assert_eq!(config.retry_attempts, Some(5));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(FileConfig::parse("colour = \"blue\"").is_err());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = FileConfig::load(Some(Path::new("/nonexistent/stash.toml"))).unwrap_err();
        assert!(matches!(err, ControllerError::Config(_)));
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let file = FileConfig {
            page_size: Some(0),
            ..FileConfig::default()
        };
        assert!(Settings::resolve(FlagOverrides::default(), file).is_err());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let file = FileConfig::parse("timeout_secs = 0").unwrap();
        let err = Settings::resolve(FlagOverrides::default(), file).unwrap_err();
        assert!(matches!(err, ControllerError::Config(ref msg) if msg.contains("timeout_secs")));

        let file = FileConfig::parse("timeout_secs = 5").unwrap();
        let settings = Settings::resolve(FlagOverrides::default(), file).unwrap();
        assert_eq!(settings.timeout, Duration::from_secs(5));
    }
}
