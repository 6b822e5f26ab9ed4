//! Server configuration loaded once at startup.
//!
//! Two on-disk formats are accepted: the classic `key: value` server config
//! (`map`, `maxPlayers`, `serverName`, `gameType`, `mapRotate`) and JSON.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// File names looked up inside a config directory, in order.
const SERVER_CONFIG_FILES: [&str; 2] = ["server.json", "server.cfg"];

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read a config file or directory.
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse JSON content.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Server-wide settings advertised to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default = "default_map")]
    pub map: String,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    #[serde(default = "default_server_name")]
    pub server_name: String,
    #[serde(default = "default_game_type")]
    pub game_type: String,
    #[serde(default = "default_map_rotation", alias = "mapRotate")]
    pub map_rotation: Vec<String>,
}

fn default_map() -> String {
    "mp_harbor".to_string()
}

fn default_max_players() -> u32 {
    32
}

fn default_server_name() -> String {
    "Rust OOB Server".to_string()
}

fn default_game_type() -> String {
    "dm".to_string()
}

fn default_map_rotation() -> Vec<String> {
    vec![default_map()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            map: default_map(),
            max_players: default_max_players(),
            server_name: default_server_name(),
            game_type: default_game_type(),
            map_rotation: default_map_rotation(),
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Parses the `key: value` format. Unknown keys and malformed lines are
    /// skipped; an unparsable `maxPlayers` keeps the default.
    pub fn parse_kv(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let Some((key, value)) = line.split_once(": ") else {
                continue;
            };
            let value = value.trim();

            match key.trim() {
                "map" => config.map = value.to_string(),
                "maxPlayers" => match value.parse() {
                    Ok(max_players) => config.max_players = max_players,
                    Err(_) => warn!("Ignoring invalid maxPlayers value {:?}", value),
                },
                "serverName" => config.server_name = value.to_string(),
                "gameType" => config.game_type = value.to_string(),
                "mapRotate" => {
                    config.map_rotation = value
                        .split(", ")
                        .map(str::trim)
                        .filter(|map| !map.is_empty())
                        .map(String::from)
                        .collect();
                }
                _ => {}
            }
        }

        config
    }

    /// Loads a single config file, choosing the parser by extension.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content)?,
            _ => Self::parse_kv(&content),
        };
        info!("Config successfully loaded {}", path.display());
        Ok(config)
    }

    /// Loads a config directory.
    ///
    /// Every file is read and logged; unreadable files are reported and
    /// skipped. The server settings come from `server.json` or `server.cfg`
    /// when present, defaults otherwise.
    pub fn load_dir(dir: &Path) -> Result<Self, ConfigError> {
        let read_error = |source| ConfigError::Read {
            path: dir.display().to_string(),
            source,
        };

        let mut files: Vec<_> = fs::read_dir(dir)
            .map_err(read_error)?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.is_file())
            .collect();
        files.sort();

        for path in &files {
            match fs::read(path) {
                Ok(_) => info!("Config successfully loaded {}", path.display()),
                Err(e) => warn!("Error when reading file {}: {}", path.display(), e),
            }
        }

        for name in SERVER_CONFIG_FILES {
            let path = dir.join(name);
            if path.is_file() {
                return Self::load(&path);
            }
        }

        info!("No server config in {}, using defaults", dir.display());
        Ok(Self::default())
    }

    /// Loads from a file or a directory.
    pub fn load_path(path: &Path) -> Result<Self, ConfigError> {
        if path.is_dir() {
            Self::load_dir(path)
        } else {
            Self::load(path)
        }
    }

    /// Config strings pushed to clients during `connect`, in send order.
    pub fn config_strings(&self) -> Vec<(String, String)> {
        vec![
            ("mapname".to_string(), self.map.clone()),
            ("gametype".to_string(), self.game_type.clone()),
            ("sv_hostname".to_string(), self.server_name.clone()),
            ("sv_maxclients".to_string(), self.max_players.to_string()),
        ]
    }

    /// Map following `current` in the rotation, wrapping at the end.
    ///
    /// Returns the first rotation entry when `current` is not in the
    /// rotation, and `None` for an empty rotation.
    pub fn next_map(&self, current: &str) -> Option<&str> {
        let position = self.map_rotation.iter().position(|map| map == current);
        let next = match position {
            Some(index) => (index + 1) % self.map_rotation.len(),
            None => 0,
        };
        self.map_rotation.get(next).map(String::as_str)
    }
}
