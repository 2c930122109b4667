use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_MAX_CHUNK_SIZE: u64 = 1024 * 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_AUTO_SYNC_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid sync direction: {0}")]
    InvalidDirection(String),
    #[error("invalid conflict strategy: {0}")]
    InvalidStrategy(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    Bidirectional,
    UploadOnly,
    DownloadOnly,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Bidirectional => "bidirectional",
            SyncDirection::UploadOnly => "upload_only",
            SyncDirection::DownloadOnly => "download_only",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "bidirectional" => Ok(SyncDirection::Bidirectional),
            "upload_only" => Ok(SyncDirection::UploadOnly),
            "download_only" => Ok(SyncDirection::DownloadOnly),
            other => Err(ConfigError::InvalidDirection(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategy {
    Local,
    Remote,
    Timestamp,
    Manual,
}

impl ConflictStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::Local => "local",
            ConflictStrategy::Remote => "remote",
            ConflictStrategy::Timestamp => "timestamp",
            ConflictStrategy::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value {
            "local" => Ok(ConflictStrategy::Local),
            "remote" => Ok(ConflictStrategy::Remote),
            "timestamp" => Ok(ConflictStrategy::Timestamp),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(ConfigError::InvalidStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub sync_path: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub remote: RemoteConfig,
    pub direction: SyncDirection,
    pub conflict_resolution: ConflictStrategy,
    pub auto_sync: bool,
    pub auto_sync_interval: Duration,
    pub max_chunk_size: u64,
}

impl SyncConfig {
    pub fn new(remote: RemoteConfig) -> Self {
        Self {
            remote,
            direction: SyncDirection::Bidirectional,
            conflict_resolution: ConflictStrategy::Timestamp,
            auto_sync: false,
            auto_sync_interval: Duration::from_secs(DEFAULT_AUTO_SYNC_SECS),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let url = require_env("DAVSYNC_URL")?;
        let username = require_env("DAVSYNC_USERNAME")?;
        let password = require_env("DAVSYNC_PASSWORD")?;
        let sync_path = std::env::var("DAVSYNC_SYNC_PATH").unwrap_or_else(|_| "/sync".to_string());
        let timeout =
            Duration::from_secs(read_u64_env("DAVSYNC_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS));
        let direction = match std::env::var("DAVSYNC_DIRECTION") {
            Ok(value) => SyncDirection::parse(&value)?,
            Err(_) => SyncDirection::Bidirectional,
        };
        let conflict_resolution = match std::env::var("DAVSYNC_CONFLICT") {
            Ok(value) => ConflictStrategy::parse(&value)?,
            Err(_) => ConflictStrategy::Timestamp,
        };

        Ok(Self {
            remote: RemoteConfig {
                url,
                username,
                password,
                sync_path,
                timeout,
            },
            direction,
            conflict_resolution,
            auto_sync: read_bool_env("DAVSYNC_AUTO_SYNC", false),
            auto_sync_interval: Duration::from_secs(read_u64_env(
                "DAVSYNC_AUTO_SYNC_SECS",
                DEFAULT_AUTO_SYNC_SECS,
            )),
            max_chunk_size: read_u64_env("DAVSYNC_MAX_CHUNK_BYTES", DEFAULT_MAX_CHUNK_SIZE),
        })
    }
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool_env(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_round_trips_through_parse() {
        for direction in [
            SyncDirection::Bidirectional,
            SyncDirection::UploadOnly,
            SyncDirection::DownloadOnly,
        ] {
            assert_eq!(SyncDirection::parse(direction.as_str()).unwrap(), direction);
        }
        assert!(matches!(
            SyncDirection::parse("sideways"),
            Err(ConfigError::InvalidDirection(_))
        ));
    }

    #[test]
    fn strategy_round_trips_through_parse() {
        for strategy in [
            ConflictStrategy::Local,
            ConflictStrategy::Remote,
            ConflictStrategy::Timestamp,
            ConflictStrategy::Manual,
        ] {
            assert_eq!(ConflictStrategy::parse(strategy.as_str()).unwrap(), strategy);
        }
        assert!(matches!(
            ConflictStrategy::parse("coin-flip"),
            Err(ConfigError::InvalidStrategy(_))
        ));
    }

    #[test]
    fn defaults_follow_the_documented_limits() {
        let config = SyncConfig::new(RemoteConfig {
            url: "http://localhost".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            sync_path: "/sync".to_string(),
            timeout: Duration::from_secs(30),
        });
        assert_eq!(config.max_chunk_size, 1024 * 1024);
        assert_eq!(config.direction, SyncDirection::Bidirectional);
        assert!(!config.auto_sync);
    }
}
