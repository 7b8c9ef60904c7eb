//! TOML-backed core configuration.
//!
//! # Responsibility
//! - Describe database, logging and merge settings in one document.
//! - Convert merge settings into the types the engine and store take.
//!
//! # Invariants
//! - Every field has a default; an empty document is a valid config.
//! - `validate()` runs on every load path.

use crate::service::conflict_resolver::ResolutionPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_SESSION_TTL_SECS: u64 = 30 * 60;
const DEFAULT_LOCK_TTL_SECS: u64 = 5 * 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// SQLite database file. `None` means the caller supplies one.
    pub database_path: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub merge: MergeConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Falls back to `logging::default_log_level()`.
    pub level: Option<String>,
    /// Logging stays off when unset.
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    pub session_ttl_secs: u64,
    pub lock_ttl_secs: u64,
    pub fill_empty_from_secondary: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            lock_ttl_secs: DEFAULT_LOCK_TTL_SECS,
            fill_empty_from_secondary: false,
        }
    }
}

impl MergeConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn policy(&self) -> ResolutionPolicy {
        ResolutionPolicy {
            fill_empty_from_secondary: self.fill_empty_from_secondary,
        }
    }
}

impl CoreConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.merge.session_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "merge.session_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.merge.lock_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "merge.lock_ttl_secs must be greater than zero".to_string(),
            ));
        }
        if let Some(level) = &self.logging.level {
            if level.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "logging.level cannot be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn empty_document_uses_defaults() {
        let config = CoreConfig::from_toml_str("").unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.merge.session_ttl(), Duration::from_secs(1800));
        assert_eq!(config.merge.lock_ttl(), Duration::from_secs(300));
        assert!(!config.merge.policy().fill_empty_from_secondary);
    }

    #[test]
    fn parses_every_section() {
        let config = CoreConfig::from_toml_str(
            r#"
database_path = "/var/lib/contactdb/contacts.sqlite3"

[logging]
level = "debug"
log_dir = "/var/log/contactdb"

[merge]
session_ttl_secs = 60
lock_ttl_secs = 10
fill_empty_from_secondary = true
"#,
        )
        .unwrap();

        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/contactdb/contacts.sqlite3"))
        );
        assert_eq!(config.logging.level.as_deref(), Some("debug"));
        assert_eq!(config.merge.session_ttl_secs, 60);
        assert!(config.merge.policy().fill_empty_from_secondary);
    }

    #[test]
    fn rejects_zero_ttl() {
        let err = CoreConfig::from_toml_str("[merge]\nlock_ttl_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("lock_ttl_secs")));
    }

    #[test]
    fn reports_parse_errors() {
        let err = CoreConfig::from_toml_str("[merge\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_file_and_reports_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[merge]\nsession_ttl_secs = 5").unwrap();
        let config = CoreConfig::load(file.path()).unwrap();
        assert_eq!(config.merge.session_ttl_secs, 5);

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            CoreConfig::load(&missing),
            Err(ConfigError::Io { .. })
        ));
    }
}
