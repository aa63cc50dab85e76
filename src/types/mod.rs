// src/types/mod.rs - Core message, room configuration and verdict types

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Core message type that flows from platform connections into the bot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub platform: String,
    /// Isolated chat space (guild) the message belongs to
    pub room_id: String,
    pub channel_id: String,
    pub message_id: String,
    pub author_id: String,
    pub username: String,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// True when the message explicitly referenced another participant
    /// (user/role/everyone mention or a reply)
    pub mentions_others: bool,
    pub is_manager: bool,
    pub is_bot: bool,
}

/// A message read back from channel history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub id: String,
    pub author_is_bot: bool,
    pub content: String,
    pub embeds: Vec<EmbedText>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmbedText {
    pub title: Option<String>,
    pub description: Option<String>,
}

pub const MIN_COMBO_WORDS: usize = 2;
pub const MIN_WINDOW_SECONDS: u64 = 1;
pub const MAX_WINDOW_SECONDS: u64 = 600;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a word combo needs at least 2 words, got {0}")]
    TooFewWords(usize),
    #[error("window must be between 1 and 600 seconds, got {0}")]
    WindowOutOfRange(u64),
}

/// Per-room moderation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Word combo: every entry must appear in a user's aggregate text to trigger
    pub words: Vec<String>,
    /// Aggregation window in seconds
    pub window: u64,
}

impl RoomConfig {
    pub fn new(words: Vec<String>, window: u64) -> Result<Self, ConfigError> {
        let mut config = Self { words: Vec::new(), window: MIN_WINDOW_SECONDS };
        config.set_words(words)?;
        config.set_window(window)?;
        Ok(config)
    }

    /// Replace the word combo. Entries are trimmed and lowercased; blanks are dropped.
    pub fn set_words(&mut self, words: Vec<String>) -> Result<(), ConfigError> {
        let cleaned: Vec<String> = words
            .into_iter()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();

        if cleaned.len() < MIN_COMBO_WORDS {
            return Err(ConfigError::TooFewWords(cleaned.len()));
        }
        self.words = cleaned;
        Ok(())
    }

    pub fn set_window(&mut self, window: u64) -> Result<(), ConfigError> {
        if !(MIN_WINDOW_SECONDS..=MAX_WINDOW_SECONDS).contains(&window) {
            return Err(ConfigError::WindowOutOfRange(window));
        }
        self.window = window;
        Ok(())
    }
}

/// One buffered entry in a user's aggregation window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentMessage {
    pub normalized_text: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub mentions_others: bool,
    pub message_id: String,
}

impl RecentMessage {
    pub fn from_message(message: &ChatMessage, normalized_text: String) -> Self {
        Self {
            normalized_text,
            timestamp: message.timestamp,
            mentions_others: message.mentions_others,
            message_id: message.message_id.clone(),
        }
    }
}

/// Aggregation windows are isolated per (room, channel, author)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub room_id: String,
    pub channel_id: String,
    pub author_id: String,
}

impl WindowKey {
    pub fn new(room_id: impl Into<String>, channel_id: impl Into<String>, author_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            channel_id: channel_id.into(),
            author_id: author_id.into(),
        }
    }

    pub fn for_message(message: &ChatMessage) -> Self {
        Self::new(&message.room_id, &message.channel_id, &message.author_id)
    }
}

/// Classification of the rule that produced a deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleTag {
    FuckYou,
    BitchInsult,
    CheaterAccusation,
    PlayerImplication,
    LoyaltyImplication,
    BannedWord,
    WordCombo,
}

impl RuleTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleTag::FuckYou => "fuck_you",
            RuleTag::BitchInsult => "bitch_insult",
            RuleTag::CheaterAccusation => "cheater_accusation",
            RuleTag::PlayerImplication => "player_implication",
            RuleTag::LoyaltyImplication => "loyalty_implication",
            RuleTag::BannedWord => "banned_word",
            RuleTag::WordCombo => "word_combo",
        }
    }
}

impl fmt::Display for RuleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    DeleteCurrent,
    /// Delete every listed message from the author's live window
    DeleteWindowBatch(Vec<String>),
}

/// Verdict plus the rule that reached it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    pub reason: Option<RuleTag>,
}

impl Decision {
    pub fn allow() -> Self {
        Self { verdict: Verdict::Allow, reason: None }
    }

    pub fn delete_current(reason: RuleTag) -> Self {
        Self { verdict: Verdict::DeleteCurrent, reason: Some(reason) }
    }

    pub fn delete_batch(reason: RuleTag, message_ids: Vec<String>) -> Self {
        Self { verdict: Verdict::DeleteWindowBatch(message_ids), reason: Some(reason) }
    }

    pub fn is_allow(&self) -> bool {
        self.verdict == Verdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_config_validation() {
        let config = RoomConfig::new(vec![" Chunky ".to_string(), "CHEATER".to_string()], 30).unwrap();
        assert_eq!(config.words, vec!["chunky", "cheater"]);
        assert_eq!(config.window, 30);

        assert_eq!(
            RoomConfig::new(vec!["one".to_string(), "  ".to_string()], 30),
            Err(ConfigError::TooFewWords(1))
        );
        assert_eq!(
            RoomConfig::new(vec!["a".to_string(), "b".to_string()], 0),
            Err(ConfigError::WindowOutOfRange(0))
        );
        assert_eq!(
            RoomConfig::new(vec!["a".to_string(), "b".to_string()], 601),
            Err(ConfigError::WindowOutOfRange(601))
        );
    }

    #[test]
    fn test_failed_update_keeps_previous_values() {
        let mut config = RoomConfig::new(vec!["a".to_string(), "b".to_string()], 10).unwrap();
        assert!(config.set_window(9000).is_err());
        assert!(config.set_words(vec!["solo".to_string()]).is_err());
        assert_eq!(config.window, 10);
        assert_eq!(config.words, vec!["a", "b"]);
    }
}
