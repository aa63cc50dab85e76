// src/config/mod.rs - Environment defaults and the persisted per-room store

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

use crate::types::{RoomConfig, MAX_WINDOW_SECONDS, MIN_COMBO_WORDS, MIN_WINDOW_SECONDS};

pub const DEFAULT_WORDS: [&str; 2] = ["chunky", "cheater"];
pub const DEFAULT_WINDOW_SECONDS: u64 = 30;
pub const DEFAULT_CONFIG_PATH: &str = "guild_config.json";
pub const DEFAULT_COMMAND_PREFIX: &str = "!";
pub const DEFAULT_LYRICS_USER_AGENT: &str = "guardbot-lyrics/1.0";

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Process-wide defaults applied to rooms seen for the first time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Defaults {
    pub words: Vec<String>,
    pub window: u64,
    /// Exact or stem (`word*`) entries for the banned word filter
    pub ban_words: Vec<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            words: DEFAULT_WORDS.iter().map(|w| w.to_string()).collect(),
            window: DEFAULT_WINDOW_SECONDS,
            ban_words: Vec::new(),
        }
    }
}

impl Defaults {
    /// Load from `WORDS`, `WINDOW` and `BAN_WORDS`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut defaults = Self::default();

        if let Some(raw) = lookup("WORDS") {
            let words: Vec<String> = split_list(&raw).into_iter().map(|w| w.to_lowercase()).collect();
            if words.len() >= MIN_COMBO_WORDS {
                defaults.words = words;
            } else {
                warn!("WORDS needs at least {} entries, using {:?}", MIN_COMBO_WORDS, defaults.words);
            }
        }

        if let Some(raw) = lookup("WINDOW") {
            match raw.trim().parse::<u64>() {
                Ok(window) => {
                    defaults.window = window.clamp(MIN_WINDOW_SECONDS, MAX_WINDOW_SECONDS);
                    if defaults.window != window {
                        warn!("WINDOW {} out of range, clamped to {}", window, defaults.window);
                    }
                }
                Err(_) => warn!("Invalid WINDOW '{}', using {}s", raw, defaults.window),
            }
        }

        if let Some(raw) = lookup("BAN_WORDS") {
            defaults.ban_words = split_list(&raw);
        }

        debug!("Defaults: words={:?} window={}s ban_words={}", defaults.words, defaults.window, defaults.ban_words.len());
        defaults
    }

    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            words: self.words.clone(),
            window: self.window,
        }
    }
}

/// Runtime settings unrelated to moderation rules
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub config_path: PathBuf,
    pub command_prefix: String,
    pub lyrics_user_agent: String,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            command_prefix: DEFAULT_COMMAND_PREFIX.to_string(),
            lyrics_user_agent: DEFAULT_LYRICS_USER_AGENT.to_string(),
        }
    }
}

impl BotSettings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(path) = env::var("CONFIG_PATH") {
            settings.config_path = PathBuf::from(path);
        }
        if let Ok(prefix) = env::var("COMMAND_PREFIX") {
            if !prefix.trim().is_empty() {
                settings.command_prefix = prefix.trim().to_string();
            }
        }
        if let Ok(agent) = env::var("LRCLIB_USER_AGENT") {
            settings.lyrics_user_agent = agent;
        }
        settings
    }
}

/// Per-room configuration with JSON persistence
pub struct ConfigStore {
    path: PathBuf,
    defaults: Defaults,
    rooms: RwLock<HashMap<String, RoomConfig>>,
}

impl ConfigStore {
    /// Empty store that will persist to `path`
    pub fn new<P: AsRef<Path>>(path: P, defaults: Defaults) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            defaults,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Load persisted rooms. A missing or corrupt file yields an empty store.
    pub async fn load<P: AsRef<Path>>(path: P, defaults: Defaults) -> Self {
        let store = Self::new(path, defaults);

        let content = match fs::read_to_string(&store.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No room config at {}, starting empty", store.path.display());
                return store;
            }
            Err(e) => {
                warn!("Failed to read room config {}: {}, starting empty", store.path.display(), e);
                return store;
            }
        };

        let parsed: HashMap<String, RoomConfig> = match serde_json::from_str(&content) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Corrupt room config {}: {}, starting empty", store.path.display(), e);
                return store;
            }
        };

        let mut rooms = HashMap::new();
        for (room_id, config) in parsed {
            match RoomConfig::new(config.words.clone(), config.window) {
                Ok(valid) => {
                    rooms.insert(room_id, valid);
                }
                Err(e) => warn!("Dropping invalid config for room {}: {}", room_id, e),
            }
        }

        info!("Loaded configuration for {} rooms from {}", rooms.len(), store.path.display());
        *store.rooms.write().await = rooms;
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Room config, created from defaults on first access
    pub async fn get(&self, room_id: &str) -> RoomConfig {
        if let Some(config) = self.rooms.read().await.get(room_id) {
            return config.clone();
        }

        self.rooms
            .write()
            .await
            .entry(room_id.to_string())
            .or_insert_with(|| self.defaults.room_config())
            .clone()
    }

    pub async fn set(&self, room_id: &str, config: RoomConfig) {
        self.rooms.write().await.insert(room_id.to_string(), config);
    }

    /// Write all rooms to disk via a temp file and rename
    pub async fn save(&self) -> Result<()> {
        let json = {
            let rooms = self.rooms.read().await;
            serde_json::to_string_pretty(&*rooms).context("Failed to serialize room config")?
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
            }
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json)
            .await
            .with_context(|| format!("Failed to write room config: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("Failed to replace room config: {}", self.path.display()))?;

        debug!("Saved room config to {}", self.path.display());
        Ok(())
    }
}
