use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::constants::{
    DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_FETCH_MAX_ATTEMPTS, DEFAULT_MAX_THREAD_DEPTH,
    DEFAULT_METADATA_TIMEOUT, DEFAULT_USER_MEDIA_TIMEOUT,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    pub save_path: PathBuf,

    // gallery-dl
    pub gallery_dl_path: String,
    pub cookies_file_path: Option<PathBuf>,
    pub pixiv_refresh_token: Option<String>,
    pub metadata_timeout: Duration,
    pub download_timeout: Duration,
    pub user_media_timeout: Duration,

    // Thread walk and fetch policy
    pub max_thread_depth: usize,
    pub fetch_max_attempts: u32,

    // Scheduler
    pub retry_poll_interval: Duration,
    /// `None` disables periodic backlog scans.
    pub scan_interval: Option<Duration>,

    // Inbox
    pub inbox_dir: Option<PathBuf>,
    pub inbox_poll_interval: Duration,

    // Web Server
    pub web_enabled: bool,
    pub web_host: String,
    pub web_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let scan_secs = parse_env_u64("SCAN_INTERVAL", 0)?;

        Ok(Self {
            // Storage
            save_path: PathBuf::from(env_or_default("SAVE_PATH", "./data")),

            // gallery-dl
            gallery_dl_path: env_or_default("GALLERY_DL_PATH", "gallery-dl"),
            cookies_file_path: optional_env("GALLERY_DL_COOKIES_FILE").map(PathBuf::from),
            pixiv_refresh_token: optional_env("PIXIV_REFRESH_TOKEN"),
            metadata_timeout: Duration::from_secs(parse_env_u64(
                "METADATA_TIMEOUT_SECS",
                DEFAULT_METADATA_TIMEOUT.as_secs(),
            )?),
            download_timeout: Duration::from_secs(parse_env_u64(
                "DOWNLOAD_TIMEOUT_SECS",
                DEFAULT_DOWNLOAD_TIMEOUT.as_secs(),
            )?),
            user_media_timeout: Duration::from_secs(parse_env_u64(
                "USER_MEDIA_TIMEOUT_SECS",
                DEFAULT_USER_MEDIA_TIMEOUT.as_secs(),
            )?),

            // Thread walk and fetch policy
            max_thread_depth: parse_env_usize("MAX_THREAD_DEPTH", DEFAULT_MAX_THREAD_DEPTH)?,
            fetch_max_attempts: parse_env_u32("FETCH_MAX_ATTEMPTS", DEFAULT_FETCH_MAX_ATTEMPTS)?,

            // Scheduler
            retry_poll_interval: Duration::from_secs(parse_env_u64("RETRY_POLL_INTERVAL", 30)?),
            scan_interval: (scan_secs > 0).then(|| Duration::from_secs(scan_secs)),

            // Inbox
            inbox_dir: optional_env("INBOX_DIR").map(PathBuf::from),
            inbox_poll_interval: Duration::from_secs(parse_env_u64("INBOX_POLL_SECS", 5)?),

            // Web Server
            web_enabled: parse_env_bool("WEB_ENABLED", true)?,
            web_host: env_or_default("WEB_HOST", "0.0.0.0"),
            web_port: parse_env_u16("WEB_PORT", 8989)?,
        })
    }

    /// Defaults rooted at `save_path`, without reading the environment.
    pub fn for_testing(save_path: impl Into<PathBuf>) -> Self {
        Self {
            save_path: save_path.into(),
            gallery_dl_path: "gallery-dl".to_string(),
            cookies_file_path: None,
            pixiv_refresh_token: None,
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            user_media_timeout: DEFAULT_USER_MEDIA_TIMEOUT,
            max_thread_depth: DEFAULT_MAX_THREAD_DEPTH,
            fetch_max_attempts: DEFAULT_FETCH_MAX_ATTEMPTS,
            retry_poll_interval: Duration::from_secs(30),
            scan_interval: None,
            inbox_dir: None,
            inbox_poll_interval: Duration::from_secs(5),
            web_enabled: false,
            web_host: "127.0.0.1".to_string(),
            web_port: 0,
        }
    }

    /// Path of the dedup ledger file.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.save_path.join("_downloaded_ids.json")
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_thread_depth == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_THREAD_DEPTH".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.fetch_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "FETCH_MAX_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        for (name, value) in [
            ("METADATA_TIMEOUT_SECS", self.metadata_timeout),
            ("DOWNLOAD_TIMEOUT_SECS", self.download_timeout),
            ("USER_MEDIA_TIMEOUT_SECS", self.user_media_timeout),
            ("RETRY_POLL_INTERVAL", self.retry_poll_interval),
            ("INBOX_POLL_SECS", self.inbox_poll_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    name: name.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        if self.gallery_dl_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "GALLERY_DL_PATH".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u16(name: &str, default: u16) -> Result<u16, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "SAVE_PATH",
        "GALLERY_DL_COOKIES_FILE",
        "SCAN_INTERVAL",
        "WEB_PORT",
        "WEB_ENABLED",
        "MAX_THREAD_DEPTH",
        "INBOX_DIR",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config.save_path, PathBuf::from("./data"));
        assert_eq!(config.max_thread_depth, 50);
        assert_eq!(config.fetch_max_attempts, 3);
        assert_eq!(config.download_timeout, Duration::from_secs(300));
        assert_eq!(config.user_media_timeout, Duration::from_secs(7200));
        assert_eq!(config.scan_interval, None);
        assert_eq!(config.web_port, 8989);
        assert!(config.web_enabled);
        assert!(config.cookies_file_path.is_none());
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("SAVE_PATH", "/srv/media");
        std::env::set_var("GALLERY_DL_COOKIES_FILE", "/srv/cookies.txt");
        std::env::set_var("SCAN_INTERVAL", "600");
        std::env::set_var("WEB_ENABLED", "off");
        std::env::set_var("INBOX_DIR", "/srv/inbox");

        let config = Config::from_env().unwrap();
        clear_env();

        assert_eq!(config.ledger_path(), PathBuf::from("/srv/media/_downloaded_ids.json"));
        assert_eq!(config.cookies_file_path, Some(PathBuf::from("/srv/cookies.txt")));
        assert_eq!(config.scan_interval, Some(Duration::from_secs(600)));
        assert!(!config.web_enabled);
        assert_eq!(config.inbox_dir, Some(PathBuf::from("/srv/inbox")));
    }

    #[test]
    #[serial]
    fn test_invalid_values() {
        clear_env();
        std::env::set_var("WEB_PORT", "not-a-port");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::ParseInt { .. })
        ));
        clear_env();

        std::env::set_var("MAX_THREAD_DEPTH", "0");
        let config = Config::from_env().unwrap();
        clear_env();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_env_bool("NONEXISTENT_VAR", true).unwrap());
        assert!(!parse_env_bool("NONEXISTENT_VAR", false).unwrap());
    }

    #[test]
    fn test_for_testing_is_valid() {
        Config::for_testing("/tmp/x").validate().unwrap();
    }
}
