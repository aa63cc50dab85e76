//! # guardbot
//!
//! A chat moderation bot that sees through evasion and split messages, plus a
//! live lyrics display for music channels.
//!
//! ## Features
//!
//! - **Text Normalization**: leetspeak, accents, lookalike letters and spacing are folded away
//! - **Semantic Rules**: directed insults, cheating accusations and similar patterns
//! - **Aggregation Window**: a user's recent messages are checked as one combined text
//! - **Word Combos**: per-room word lists that trigger when all words appear together
//! - **Live Lyrics**: time-synced lyrics from LRCLIB rendered into a single edited message
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use guardbot::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = BotSettings::from_env();
//!     let defaults = Defaults::from_env();
//!     let patterns = PatternLibrary::new(defaults.ban_words.as_slice())?;
//!     let store = Arc::new(ConfigStore::load(&settings.config_path, defaults).await);
//!     let lyrics = Arc::new(LrcLibClient::new(&settings.lyrics_user_agent)?);
//!
//!     let mut bot = ChatBot::new(&settings, store, patterns, lyrics);
//!
//!     let discord = DiscordConnection::new(DiscordConfig::from_env()?);
//!     let actions = discord.actions();
//!     bot.add_connection(Box::new(discord), actions).await;
//!
//!     bot.start().await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod platforms;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::lrclib::LrcLibClient;
    pub use crate::bot::lyrics::{LyricsManager, LyricsProvider};
    pub use crate::bot::moderation::{ModerationSystem, RuleEvaluator};
    pub use crate::bot::normalizer::normalize;
    pub use crate::bot::pattern_matching::PatternLibrary;
    pub use crate::bot::ChatBot;
    pub use crate::config::{BotSettings, ConfigStore, Defaults};
    pub use crate::platforms::{
        discord::{DiscordConfig, DiscordConnection},
        MessageActions, PlatformConnection, PlatformError,
    };
    pub use crate::types::{ChatMessage, Decision, RoomConfig, RuleTag, Verdict};
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
