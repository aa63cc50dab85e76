// src/bot/commands.rs - Manager-only text commands for word combos and lyrics

use anyhow::Result;
use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::bot::lyrics::LyricsManager;
use crate::config::ConfigStore;
use crate::platforms::MessageActions;
use crate::types::ChatMessage;

pub const MANAGER_REQUIRED: &str = "You need Manage Server to use this.";

pub struct CommandSystem {
    config_store: Arc<ConfigStore>,
    lyrics_manager: Arc<LyricsManager>,
    pub command_prefix: String,
}

impl CommandSystem {
    pub fn new(config_store: Arc<ConfigStore>, lyrics_manager: Arc<LyricsManager>, command_prefix: &str) -> Self {
        Self {
            config_store,
            lyrics_manager,
            command_prefix: command_prefix.to_string(),
        }
    }

    /// Handle a command message. Returns false when the message is not one of ours.
    pub async fn process_command(&self, message: &ChatMessage, actions: Arc<dyn MessageActions>) -> Result<bool> {
        let Some(content_without_prefix) = message.content.strip_prefix(self.command_prefix.as_str()) else {
            return Ok(false);
        };

        let parts: Vec<&str> = content_without_prefix.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Ok(false);
        };
        let command_name = first.to_lowercase();
        let args = &parts[1..];

        if command_name != "combo" && command_name != "lyrics" {
            return Ok(false);
        }

        debug!("Processing command '{}' from {} in room {}", command_name, message.username, message.room_id);

        if !message.is_manager {
            self.send_response(actions.as_ref(), message, MANAGER_REQUIRED).await?;
            return Ok(true);
        }

        match command_name.as_str() {
            "combo" => self.handle_combo_command(args, message, actions.as_ref()).await?,
            _ => self.handle_lyrics_command(args, message, actions).await?,
        }

        Ok(true)
    }

    /// `combo`, `combo show`, `combo set <words>`, `combo window <seconds>`
    async fn handle_combo_command(&self, args: &[&str], message: &ChatMessage, actions: &dyn MessageActions) -> Result<()> {
        let subcommand = args.first().map(|a| a.to_lowercase());

        let response = match subcommand.as_deref() {
            None | Some("show") => {
                let config = self.config_store.get(&message.room_id).await;
                format!("🛡️ Word combo: {} • window {}s", format_words(&config.words), config.window)
            }
            Some("set") => {
                let words: Vec<String> = args[1..]
                    .iter()
                    .flat_map(|a| a.split(','))
                    .map(String::from)
                    .collect();

                let mut config = self.config_store.get(&message.room_id).await;
                match config.set_words(words) {
                    Ok(()) => {
                        let response = format!("✅ Word combo set to {}.", format_words(&config.words));
                        self.config_store.set(&message.room_id, config).await;
                        self.persist().await;
                        info!("Room {} word combo changed by {}", message.room_id, message.username);
                        response
                    }
                    Err(e) => format!("❌ {}", e),
                }
            }
            Some("window") => match args.get(1).and_then(|a| a.parse::<u64>().ok()) {
                Some(seconds) => {
                    let mut config = self.config_store.get(&message.room_id).await;
                    match config.set_window(seconds) {
                        Ok(()) => {
                            self.config_store.set(&message.room_id, config).await;
                            self.persist().await;
                            info!("Room {} window set to {}s by {}", message.room_id, seconds, message.username);
                            format!("✅ Window set to {}s.", seconds)
                        }
                        Err(e) => format!("❌ {}", e),
                    }
                }
                None => format!("Usage: {}combo window <seconds>", self.command_prefix),
            },
            Some(_) => format!(
                "Usage: {p}combo show | {p}combo set <word> <word> ... | {p}combo window <seconds>",
                p = self.command_prefix
            ),
        };

        self.send_response(actions, message, &response).await
    }

    /// `lyrics start [Title - Artist]`, `lyrics stop`, `lyrics offset <±seconds>`
    async fn handle_lyrics_command(
        &self,
        args: &[&str],
        message: &ChatMessage,
        actions: Arc<dyn MessageActions>,
    ) -> Result<()> {
        let subcommand = args.first().map(|a| a.to_lowercase());

        let response = match subcommand.as_deref() {
            Some("start") => {
                let query = args[1..].join(" ");
                let query = (!query.is_empty()).then_some(query.as_str());
                match self
                    .lyrics_manager
                    .start(Arc::clone(&actions), &message.room_id, &message.channel_id, query)
                    .await
                {
                    Ok(session) => format!("Starting live lyrics for **{} — {}**.", session.artist, session.track),
                    Err(e) => e.to_string(),
                }
            }
            Some("stop") => {
                if self.lyrics_manager.stop(&message.room_id).await {
                    "Stopped the lyrics session. ✅".to_string()
                } else {
                    "No active lyrics session.".to_string()
                }
            }
            Some("offset") => match args.get(1).and_then(|a| a.parse::<f64>().ok()).filter(|v| v.is_finite()) {
                Some(delta) => match self.lyrics_manager.adjust_offset(&message.room_id, delta).await {
                    Some(offset) => format!("Offset set to {:+.2}s.", offset),
                    None => "No active lyrics session.".to_string(),
                },
                None => format!("Usage: {}lyrics offset <±seconds>", self.command_prefix),
            },
            _ => format!(
                "Usage: {p}lyrics start [Title - Artist] | {p}lyrics stop | {p}lyrics offset <±seconds>",
                p = self.command_prefix
            ),
        };

        self.send_response(actions.as_ref(), message, &response).await
    }

    /// Config changes stay in memory even if the write fails
    async fn persist(&self) {
        if let Err(e) = self.config_store.save().await {
            error!("Failed to save room config: {:#}", e);
        }
    }

    async fn send_response(&self, actions: &dyn MessageActions, message: &ChatMessage, response: &str) -> Result<()> {
        if let Err(e) = actions.send_message(&message.channel_id, response).await {
            warn!("Failed to send command response to {}: {}", message.channel_id, e);
        }
        Ok(())
    }
}

fn format_words(words: &[String]) -> String {
    words
        .iter()
        .map(|w| format!("`{}`", w))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::lyrics::{FetchedLyrics, LyricsError, LyricsProvider};
    use crate::config::Defaults;
    use crate::platforms::mock::MockActions;
    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;

    struct FixedLyrics;

    #[async_trait]
    impl LyricsProvider for FixedLyrics {
        async fn fetch(&self, track: &str, artist: &str, _duration: Option<u64>) -> Result<FetchedLyrics, LyricsError> {
            if track == "Missing" {
                return Err(LyricsError::NotFound { artist: artist.to_string(), track: track.to_string() });
            }
            Ok(FetchedLyrics { text: "[00:00]la\n[00:05]da".to_string(), duration: Some(10) })
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<ConfigStore>,
        commands: CommandSystem,
        mock: Arc<MockActions>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = Arc::new(ConfigStore::new(dir.path().join("rooms.json"), Defaults::default()));
            let lyrics = Arc::new(LyricsManager::new(Arc::new(FixedLyrics), "!"));
            Self {
                _dir: dir,
                store: Arc::clone(&store),
                commands: CommandSystem::new(store, lyrics, "!"),
                mock: Arc::new(MockActions::new()),
            }
        }

        async fn run(&self, content: &str, manager: bool) -> bool {
            let message = ChatMessage {
                platform: "test".to_string(),
                room_id: "guild".to_string(),
                channel_id: "channel".to_string(),
                message_id: "1".to_string(),
                author_id: "author".to_string(),
                username: "admin".to_string(),
                content: content.to_string(),
                timestamp: Utc::now(),
                mentions_others: false,
                is_manager: manager,
                is_bot: false,
            };
            self.commands.process_command(&message, self.mock.clone()).await.unwrap()
        }

        /// Latest command reply, skipping lyrics placeholders posted by sessions
        fn last_reply(&self) -> String {
            self.mock
                .sent()
                .into_iter()
                .rev()
                .find(|m| !m.starts_with("🎤"))
                .unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn test_ignores_unrelated_messages() {
        let fixture = Fixture::new();
        assert!(!fixture.run("hello there", true).await);
        assert!(!fixture.run("!", true).await);
        assert!(!fixture.run("!points", true).await);
        assert!(fixture.mock.sent().is_empty());
    }

    #[tokio::test]
    async fn test_non_managers_are_refused() {
        let fixture = Fixture::new();
        assert!(fixture.run("!combo set a b", false).await);
        assert_eq!(fixture.last_reply(), MANAGER_REQUIRED);
        assert_eq!(fixture.store.get("guild").await.words, vec!["chunky", "cheater"]);

        assert!(fixture.run("!lyrics stop", false).await);
        assert_eq!(fixture.last_reply(), MANAGER_REQUIRED);
    }

    #[tokio::test]
    async fn test_combo_show_set_and_persist() {
        let fixture = Fixture::new();

        fixture.run("!combo", true).await;
        assert_eq!(fixture.last_reply(), "🛡️ Word combo: `chunky`, `cheater` • window 30s");

        fixture.run("!COMBO set Cat, dog", true).await;
        assert_eq!(fixture.last_reply(), "✅ Word combo set to `cat`, `dog`.");

        fixture.run("!combo window 45", true).await;
        assert_eq!(fixture.last_reply(), "✅ Window set to 45s.");

        let reloaded = ConfigStore::load(fixture.store.path(), Defaults::default()).await;
        let config = reloaded.get("guild").await;
        assert_eq!(config.words, vec!["cat", "dog"]);
        assert_eq!(config.window, 45);
    }

    #[tokio::test]
    async fn test_combo_rejects_invalid_values() {
        let fixture = Fixture::new();

        fixture.run("!combo set lonely", true).await;
        assert_eq!(fixture.last_reply(), "❌ a word combo needs at least 2 words, got 1");

        fixture.run("!combo window 601", true).await;
        assert_eq!(fixture.last_reply(), "❌ window must be between 1 and 600 seconds, got 601");

        fixture.run("!combo window soon", true).await;
        assert_eq!(fixture.last_reply(), "Usage: !combo window <seconds>");

        assert_eq!(fixture.store.get("guild").await, Defaults::default().room_config());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lyrics_commands() {
        let fixture = Fixture::new();

        fixture.run("!lyrics stop", true).await;
        assert_eq!(fixture.last_reply(), "No active lyrics session.");

        fixture.run("!lyrics start Missing - Nobody", true).await;
        assert_eq!(fixture.last_reply(), "Couldn't find lyrics for **Nobody — Missing**.");

        fixture.run("!lyrics start Song - Band", true).await;
        assert_eq!(fixture.last_reply(), "Starting live lyrics for **Band — Song**.");

        fixture.run("!lyrics offset -1.25", true).await;
        assert_eq!(fixture.last_reply(), "Offset set to -1.25s.");

        fixture.run("!lyrics offset later", true).await;
        assert_eq!(fixture.last_reply(), "Usage: !lyrics offset <±seconds>");

        fixture.run("!lyrics stop", true).await;
        assert_eq!(fixture.last_reply(), "Stopped the lyrics session. ✅");
    }
}
