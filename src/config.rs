//! Configuration loaded from `seller-queue.toml`.
//!
//! Every field has a default, so a missing file is fine. `SELLER_QUEUE_DB`
//! and `SELLER_QUEUE_BIND` take precedence over the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "seller-queue.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Address the API server listens on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Default tracing filter when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Store used by CLI commands when `--store` is omitted
    #[serde(default)]
    pub default_store: Option<String>,

    /// API sessions expire this many seconds after login
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("seller-queue.db")
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_session_ttl_secs() -> u64 {
    12 * 60 * 60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            bind_addr: default_bind_addr(),
            log_level: default_log_level(),
            default_store: None,
            session_ttl_secs: default_session_ttl_secs(),
        }
    }
}

impl Config {
    /// Load `path`, or `seller-queue.toml` in the working directory.
    /// An explicit path must exist; the default one may be missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db) = lookup("SELLER_QUEUE_DB").filter(|v| !v.is_empty()) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(bind) = lookup("SELLER_QUEUE_BIND").filter(|v| !v.is_empty()) {
            self.bind_addr = bind;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.database_path, PathBuf::from("seller-queue.db"));
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert!(config.default_store.is_none());
        assert_eq!(config.session_ttl_secs, 43_200);
    }

    #[test]
    fn deserialize_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            database_path = "/var/lib/queue.db"
            default_store = "prime"
            session_ttl_secs = 900
            "#,
        )
        .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/var/lib/queue.db"));
        assert_eq!(config.default_store.as_deref(), Some("prime"));
        assert_eq!(config.session_ttl_secs, 900);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn load_explicit_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_addr = \"127.0.0.1:8080\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8080");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(Config::load(Some(Path::new("/nonexistent/seller-queue.toml"))).is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "SELLER_QUEUE_DB" => Some("/tmp/other.db".to_string()),
            "SELLER_QUEUE_BIND" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.database_path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
    }
}
