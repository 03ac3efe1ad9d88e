//! Configuration management for Slotcast

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result, SlotcastError};

/// Longest search horizon accepted for `lookahead_days`
pub const MAX_LOOKAHEAD_DAYS: i64 = 3650;

/// Largest UTC offset, in minutes, a slot wall clock may use
pub const MAX_UTC_OFFSET_MINUTES: i32 = 18 * 60;

/// Added on top of the publish and enrichment timeouts before an in-flight
/// claim is treated as abandoned
const CLAIM_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    pub linkedin: Option<LinkedInConfig>,
    pub threads: Option<ThreadsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Seconds between dispatch cycles
    pub poll_interval: u64,
    /// Offset of the wall clock that slot times are written in
    pub utc_offset_minutes: i32,
    /// How far ahead the scheduler searches before giving up
    pub lookahead_days: i64,
    /// Seconds allowed for a single publish call
    pub publish_timeout: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            poll_interval: 60,
            utc_offset_minutes: 0,
            lookahead_days: 365,
            publish_timeout: 30,
        }
    }
}

impl SchedulingConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout)
    }

    /// Reject values the slot calendar cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_LOOKAHEAD_DAYS).contains(&self.lookahead_days) {
            return Err(SlotcastError::InvalidInput(format!(
                "scheduling.lookahead_days must be between 1 and {}, got {}",
                MAX_LOOKAHEAD_DAYS, self.lookahead_days
            )));
        }
        if !(-MAX_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&self.utc_offset_minutes) {
            return Err(SlotcastError::InvalidInput(format!(
                "scheduling.utc_offset_minutes must be within +/-{}, got {}",
                MAX_UTC_OFFSET_MINUTES, self.utc_offset_minutes
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub enabled: bool,
    /// Seconds allowed for fetching a page or its thumbnail
    pub fetch_timeout: u64,
    /// Seconds allowed for the whole enrichment: page, thumbnail and upload
    pub enrich_timeout: u64,
    pub max_bytes: usize,
    pub user_agent: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fetch_timeout: 10,
            enrich_timeout: 30,
            max_bytes: 2 * 1024 * 1024,
            user_agent: "Mozilla/5.0 (compatible; Slotcast/0.1)".to_string(),
        }
    }
}

impl PreviewConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout)
    }

    pub fn enrich_timeout(&self) -> Duration {
        Duration::from_secs(self.enrich_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkedInConfig {
    pub enabled: bool,
    pub token_file: String,
    /// Member or organization URN posts are authored as
    pub author_urn: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadsConfig {
    pub enabled: bool,
    pub token_file: String,
    pub api_base: Option<String>,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// `SLOTCAST_DB_PATH` overrides `database.path`.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let mut config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;

        if let Ok(db_path) = std::env::var("SLOTCAST_DB_PATH") {
            config.database.path = db_path;
        }

        config.scheduling.validate()?;
        Ok(config)
    }

    /// Age after which an in-flight claim can no longer be a live attempt
    pub fn claim_expiry(&self) -> Duration {
        let enrichment = if self.preview.enabled {
            self.preview.enrich_timeout()
        } else {
            Duration::ZERO
        };
        self.scheduling.publish_timeout() + enrichment + CLAIM_EXPIRY_MARGIN
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/slotcast/queue.db".to_string(),
            },
            scheduling: SchedulingConfig::default(),
            preview: PreviewConfig::default(),
            linkedin: None,
            threads: None,
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SLOTCAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("slotcast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    #[serial]
    fn test_minimal_config_uses_defaults() {
        std::env::remove_var("SLOTCAST_DB_PATH");
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[database]
path = "/tmp/queue.db"
"#,
        );

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.database.path, "/tmp/queue.db");
        assert_eq!(config.scheduling.poll_interval, 60);
        assert_eq!(config.scheduling.lookahead_days, 365);
        assert_eq!(config.scheduling.publish_timeout(), Duration::from_secs(30));
        assert!(config.preview.enabled);
        assert_eq!(config.preview.max_bytes, 2 * 1024 * 1024);
        assert!(config.linkedin.is_none());
        assert!(config.threads.is_none());
    }

    #[test]
    #[serial]
    fn test_full_config() {
        std::env::remove_var("SLOTCAST_DB_PATH");
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[database]
path = "/tmp/queue.db"

[scheduling]
poll_interval = 15
utc_offset_minutes = 120

[preview]
enabled = false

[linkedin]
enabled = true
token_file = "/tmp/linkedin.token"
author_urn = "urn:li:person:abc"

[threads]
enabled = true
token_file = "/tmp/threads.token"
api_base = "http://localhost:9999"
"#,
        );

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.scheduling.poll_interval, 15);
        assert_eq!(config.scheduling.utc_offset_minutes, 120);
        assert_eq!(config.scheduling.publish_timeout, 30);
        assert!(!config.preview.enabled);

        let linkedin = config.linkedin.unwrap();
        assert_eq!(linkedin.author_urn.as_deref(), Some("urn:li:person:abc"));
        assert!(linkedin.api_base.is_none());

        let threads = config.threads.unwrap();
        assert_eq!(threads.api_base.as_deref(), Some("http://localhost:9999"));
    }

    #[test]
    #[serial]
    fn test_db_path_env_override() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
[database]
path = "/tmp/queue.db"
"#,
        );

        std::env::set_var("SLOTCAST_DB_PATH", "/tmp/override.db");
        let config = Config::load_from_path(&path).unwrap();
        std::env::remove_var("SLOTCAST_DB_PATH");

        assert_eq!(config.database.path, "/tmp/override.db");
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Config::load_from_path(Path::new("/nonexistent/slotcast/config.toml"));
        assert!(matches!(
            result,
            Err(crate::SlotcastError::Config(ConfigError::ReadError(_)))
        ));
    }

    #[test]
    fn test_invalid_toml_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "[database\npath = ");
        let result = Config::load_from_path(&path);
        assert!(matches!(
            result,
            Err(crate::SlotcastError::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    #[serial]
    fn test_out_of_range_scheduling_values_rejected() {
        std::env::remove_var("SLOTCAST_DB_PATH");
        let dir = TempDir::new().unwrap();

        for (section, message) in [
            ("lookahead_days = 100000000000", "lookahead_days"),
            ("lookahead_days = 0", "lookahead_days"),
            ("utc_offset_minutes = 2147483647", "utc_offset_minutes"),
            ("utc_offset_minutes = -1200", "utc_offset_minutes"),
        ] {
            let path = write_config(
                &dir,
                &format!("[database]\npath = \"/tmp/queue.db\"\n\n[scheduling]\n{}\n", section),
            );
            match Config::load_from_path(&path) {
                Err(SlotcastError::InvalidInput(msg)) => assert!(msg.contains(message), "{}", msg),
                other => panic!("Expected invalid input for {}, got {:?}", section, other),
            }
        }
    }

    #[test]
    fn test_enrichment_has_its_own_timeout() {
        let config = Config::default_config();
        assert_eq!(config.preview.fetch_timeout(), Duration::from_secs(10));
        assert_eq!(config.preview.enrich_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_claim_expiry_outlasts_a_publish_attempt() {
        let mut config = Config::default_config();
        assert_eq!(config.claim_expiry(), Duration::from_secs(30 + 30 + 60));

        config.preview.enabled = false;
        config.scheduling.publish_timeout = 45;
        assert_eq!(config.claim_expiry(), Duration::from_secs(45 + 60));
    }

    #[test]
    #[serial]
    fn test_resolve_config_path_env() {
        std::env::set_var("SLOTCAST_CONFIG", "/tmp/custom/slotcast.toml");
        let path = resolve_config_path().unwrap();
        std::env::remove_var("SLOTCAST_CONFIG");
        assert_eq!(path, PathBuf::from("/tmp/custom/slotcast.toml"));
    }
}
