use std::fs::File;
use std::io::BufReader;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

/// Longest game a token may be stamped for, one day.
pub const MAX_GAME_LENGTH_SECS: i64 = 86_400;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Game and hub settings shared by every player of a game.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GameConfig {
    pub service_name: String,
    pub service_version: String,
    pub hub_url: String,
    pub countdown_secs: u64,
    pub game_length_secs: i64,
    pub pass_delay_min_ms: u64,
    pub pass_delay_max_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        GameConfig {
            service_name: "hpp".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            hub_url: "ws://127.0.0.1:5353".to_string(),
            countdown_secs: 15,
            game_length_secs: 30,
            pass_delay_min_ms: 1000,
            pass_delay_max_ms: 2000,
            request_timeout_ms: 5000,
        }
    }
}

impl GameConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config: GameConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|source| ConfigError::Parse {
                path: path.to_owned(),
                source,
            })?;
        config.validate()?;
        debug!(path = %path.display(), ?config, "loaded game config");
        Ok(config)
    }

    /// Reads `path` when given, otherwise the default location if a file
    /// exists there, otherwise falls back to the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => GameConfig::from_file(path),
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                GameConfig::from_file(DEFAULT_CONFIG_PATH)
            }
            None => Ok(GameConfig::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::Invalid("service_name is empty".into()));
        }
        if self.pass_delay_min_ms > self.pass_delay_max_ms {
            return Err(ConfigError::Invalid(format!(
                "pass_delay_min_ms ({}) exceeds pass_delay_max_ms ({})",
                self.pass_delay_min_ms, self.pass_delay_max_ms
            )));
        }
        if self.game_length_secs <= 0 || self.game_length_secs > MAX_GAME_LENGTH_SECS {
            return Err(ConfigError::Invalid(format!(
                "game_length_secs ({}) must be between 1 and {}",
                self.game_length_secs, MAX_GAME_LENGTH_SECS
            )));
        }
        Ok(())
    }

    pub fn pass_delay_ms(&self) -> RangeInclusive<u64> {
        self.pass_delay_min_ms..=self.pass_delay_max_ms
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Everything one player process needs to take part.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub name: String,
    pub starter: bool,
    pub game: GameConfig,
}
