use anyhow::Result;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::config::{BotSettings, ConfigStore};
use crate::platforms::{MessageActions, PlatformConnection};
use crate::types::{ChatMessage, Decision};

pub mod aggregation;
pub mod commands;
pub mod lrclib;
pub mod lyrics;
pub mod moderation;
pub mod normalizer;
pub mod pattern_matching;

use commands::CommandSystem;
use lyrics::{LyricsManager, LyricsProvider};
use moderation::{ModerationSystem, RuleEvaluator};
use pattern_matching::PatternLibrary;

/// How often idle aggregation buffers are swept
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Moderation first, then commands, for every inbound message
pub struct MessageProcessor {
    moderation_system: Arc<ModerationSystem>,
    command_system: Arc<CommandSystem>,
}

impl MessageProcessor {
    pub fn new(moderation_system: Arc<ModerationSystem>, command_system: Arc<CommandSystem>) -> Self {
        Self {
            moderation_system,
            command_system,
        }
    }

    /// Evaluate one message. Deletions and command handling run as their own
    /// tasks so a slow platform call never holds up the next message.
    pub async fn process(&self, message: &ChatMessage, actions: &Arc<dyn MessageActions>) -> Decision {
        if message.is_bot {
            return Decision::allow();
        }

        let decision = self.moderation_system.check_message(message).await;

        if !decision.is_allow() {
            let actions = Arc::clone(actions);
            let message = message.clone();
            let enforced = decision.clone();
            tokio::spawn(async move {
                ModerationSystem::handle_verdict(actions.as_ref(), &message, &enforced).await;
            });
            // A deleted message is never a command
            return decision;
        }

        if message.content.starts_with(&self.command_system.command_prefix) {
            let command_system = Arc::clone(&self.command_system);
            let actions = Arc::clone(actions);
            let message = message.clone();
            tokio::spawn(async move {
                if let Err(e) = command_system.process_command(&message, actions).await {
                    error!("Failed to process command: {:#}", e);
                }
            });
        }

        decision
    }
}

/// Core bot engine that wires platform connections to moderation and commands
pub struct ChatBot {
    connections: Arc<RwLock<HashMap<String, Box<dyn PlatformConnection>>>>,
    actions: HashMap<String, Arc<dyn MessageActions>>,
    processor: Arc<MessageProcessor>,
    moderation_system: Arc<ModerationSystem>,
    lyrics_manager: Arc<LyricsManager>,
    config_store: Arc<ConfigStore>,
    background_tasks: Vec<JoinHandle<()>>,
}

impl ChatBot {
    pub fn new(
        settings: &BotSettings,
        config_store: Arc<ConfigStore>,
        patterns: PatternLibrary,
        lyrics_provider: Arc<dyn LyricsProvider>,
    ) -> Self {
        let moderation_system = Arc::new(ModerationSystem::new(
            RuleEvaluator::new(patterns),
            Arc::clone(&config_store),
        ));
        let lyrics_manager = Arc::new(LyricsManager::new(lyrics_provider, &settings.command_prefix));
        let command_system = Arc::new(CommandSystem::new(
            Arc::clone(&config_store),
            Arc::clone(&lyrics_manager),
            &settings.command_prefix,
        ));

        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            actions: HashMap::new(),
            processor: Arc::new(MessageProcessor::new(Arc::clone(&moderation_system), command_system)),
            moderation_system,
            lyrics_manager,
            config_store,
            background_tasks: Vec::new(),
        }
    }

    /// Add a platform connection along with the actions used to answer on it
    pub async fn add_connection(&mut self, connection: Box<dyn PlatformConnection>, actions: Arc<dyn MessageActions>) {
        let platform_name = connection.platform_name().to_string();
        info!("Added {} connection", platform_name);
        self.actions.insert(platform_name.clone(), actions);
        self.connections.write().await.insert(platform_name, connection);
    }

    /// Connect every platform and start processing messages
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting chat bot...");

        let mut receivers = Vec::new();
        {
            let mut connections_guard = self.connections.write().await;
            for (platform_name, connection) in connections_guard.iter_mut() {
                if let Err(e) = connection.connect().await {
                    error!("Failed to connect to {}: {:#}", platform_name, e);
                    continue;
                }

                let Some(actions) = self.actions.get(platform_name) else {
                    warn!("No message actions registered for {}", platform_name);
                    continue;
                };
                if let Some(receiver) = connection.get_message_receiver() {
                    receivers.push((platform_name.clone(), receiver, Arc::clone(actions)));
                    info!("Set up message receiver for {}", platform_name);
                }
            }
        }

        if receivers.is_empty() {
            anyhow::bail!("No platform connection could be started");
        }

        for (platform_name, receiver, actions) in receivers {
            let task = Self::start_message_processor(Arc::clone(&self.processor), platform_name, receiver, actions);
            self.background_tasks.push(task);
        }

        self.background_tasks
            .push(self.moderation_system.start_idle_sweeper(IDLE_SWEEP_INTERVAL));

        info!("Chat bot started successfully");
        Ok(())
    }

    fn start_message_processor(
        processor: Arc<MessageProcessor>,
        platform_name: String,
        mut receiver: broadcast::Receiver<ChatMessage>,
        actions: Arc<dyn MessageActions>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        debug!("Processing message {} from {}", message.message_id, message.username);
                        processor.process(&message, &actions).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("{} receiver lagged by {} messages", platform_name, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("{} message receiver closed", platform_name);
                        break;
                    }
                }
            }
        })
    }

    /// Health check for all connections
    pub async fn health_check(&self) -> HashMap<String, bool> {
        let mut status = HashMap::new();
        let connections_guard = self.connections.read().await;

        for (platform_name, connection) in connections_guard.iter() {
            let is_healthy = connection.is_connected().await;
            status.insert(platform_name.clone(), is_healthy);

            if !is_healthy {
                warn!("{} connection is unhealthy", platform_name);
            }
        }

        status
    }

    /// Reconnect every platform whose connection dropped and resume processing
    /// its messages. Returns how many were restored.
    pub async fn reconnect_unhealthy(&mut self) -> usize {
        let mut restored = Vec::new();
        {
            let mut connections_guard = self.connections.write().await;
            for (platform_name, connection) in connections_guard.iter_mut() {
                if connection.is_connected().await {
                    continue;
                }
                let Some(actions) = self.actions.get(platform_name) else {
                    continue;
                };

                warn!("{} connection lost, reconnecting", platform_name);
                if let Err(e) = connection.disconnect().await {
                    debug!("Cleanup before reconnecting {} failed: {:#}", platform_name, e);
                }
                if let Err(e) = connection.connect().await {
                    error!("Failed to reconnect to {}: {:#}", platform_name, e);
                    continue;
                }
                if let Some(receiver) = connection.get_message_receiver() {
                    restored.push((platform_name.clone(), receiver, Arc::clone(actions)));
                }
            }
        }

        self.background_tasks.retain(|task| !task.is_finished());
        let count = restored.len();
        for (platform_name, receiver, actions) in restored {
            info!("Resumed message processing for {}", platform_name);
            let task = Self::start_message_processor(Arc::clone(&self.processor), platform_name, receiver, actions);
            self.background_tasks.push(task);
        }
        count
    }

    /// Stop lyrics, persist room configuration and disconnect every platform
    pub async fn shutdown(&mut self) -> Result<()> {
        info!("Shutting down chat bot...");

        self.lyrics_manager.stop_all().await;

        for task in self.background_tasks.drain(..) {
            task.abort();
        }

        if let Err(e) = self.config_store.save().await {
            error!("Failed to save room config on shutdown: {:#}", e);
        }

        let mut connections_guard = self.connections.write().await;
        for (platform_name, connection) in connections_guard.iter_mut() {
            if let Err(e) = connection.disconnect().await {
                error!("Error disconnecting from {}: {:#}", platform_name, e);
            }
        }

        info!("Chat bot shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::lyrics::{FetchedLyrics, LyricsError};
    use crate::config::Defaults;
    use crate::platforms::mock::{Call, MockActions};
    use crate::types::{RuleTag, Verdict};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tokio::time::sleep;

    struct NoLyrics;

    #[async_trait]
    impl LyricsProvider for NoLyrics {
        async fn fetch(&self, track: &str, artist: &str, _duration: Option<u64>) -> Result<FetchedLyrics, LyricsError> {
            Err(LyricsError::NotFound { artist: artist.to_string(), track: track.to_string() })
        }
    }

    fn processor(dir: &tempfile::TempDir) -> MessageProcessor {
        let store = Arc::new(ConfigStore::new(dir.path().join("rooms.json"), Defaults::default()));
        let patterns = PatternLibrary::new(&["simp*"]).unwrap();
        let moderation = Arc::new(ModerationSystem::new(RuleEvaluator::new(patterns), Arc::clone(&store)));
        let lyrics = Arc::new(LyricsManager::new(Arc::new(NoLyrics), "!"));
        let commands = Arc::new(CommandSystem::new(store, lyrics, "!"));
        MessageProcessor::new(moderation, commands)
    }

    fn message(id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            platform: "test".to_string(),
            room_id: "guild".to_string(),
            channel_id: "channel".to_string(),
            message_id: id.to_string(),
            author_id: "author".to_string(),
            username: "someone".to_string(),
            content: text.to_string(),
            timestamp: Utc::now(),
            mentions_others: false,
            is_manager: true,
            is_bot: false,
        }
    }

    async fn settle() {
        sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_violation_is_deleted_and_not_run_as_command() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(&dir);
        let mock = Arc::new(MockActions::new());
        let actions: Arc<dyn MessageActions> = mock.clone();

        let decision = processor.process(&message("1", "!combo f u"), &actions).await;
        assert_eq!(decision, Decision::delete_current(RuleTag::FuckYou));
        settle().await;

        assert_eq!(mock.calls(), vec![Call::Delete("1".to_string())]);
    }

    #[tokio::test]
    async fn test_configured_stem_ban() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(&dir);
        let actions: Arc<dyn MessageActions> = Arc::new(MockActions::new());

        let decision = processor.process(&message("1", "what a S1MPS"), &actions).await;
        assert_eq!(decision.reason, Some(RuleTag::BannedWord));
        assert_eq!(decision.verdict, Verdict::DeleteCurrent);
    }

    #[tokio::test]
    async fn test_clean_command_is_answered() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(&dir);
        let mock = Arc::new(MockActions::new());
        let actions: Arc<dyn MessageActions> = mock.clone();

        assert!(processor.process(&message("1", "!combo show"), &actions).await.is_allow());
        settle().await;

        assert_eq!(mock.sent(), vec!["🛡️ Word combo: `chunky`, `cheater` • window 30s"]);
    }

    #[tokio::test]
    async fn test_bot_messages_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let processor = processor(&dir);
        let mock = Arc::new(MockActions::new());
        let actions: Arc<dyn MessageActions> = mock.clone();

        let mut from_bot = message("1", "fuck you");
        from_bot.is_bot = true;
        assert!(processor.process(&from_bot, &actions).await.is_allow());
        settle().await;

        assert!(mock.calls().is_empty());
    }

    /// Connection whose drop can be simulated by the test
    #[derive(Clone, Default)]
    struct FlakyConnection {
        connected: Arc<AtomicBool>,
        connects: Arc<AtomicUsize>,
        sender: Arc<StdMutex<Option<broadcast::Sender<ChatMessage>>>>,
    }

    impl FlakyConnection {
        fn drop_connection(&self) {
            self.connected.store(false, Ordering::SeqCst);
            *self.sender.lock().unwrap() = None;
        }

        fn deliver(&self, message: ChatMessage) {
            if let Some(sender) = self.sender.lock().unwrap().as_ref() {
                sender.send(message).unwrap();
            }
        }
    }

    #[async_trait]
    impl PlatformConnection for FlakyConnection {
        async fn connect(&mut self) -> Result<()> {
            let (tx, _) = broadcast::channel(16);
            *self.sender.lock().unwrap() = Some(tx);
            self.connected.store(true, Ordering::SeqCst);
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn platform_name(&self) -> &str {
            "flaky"
        }

        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn get_message_receiver(&self) -> Option<broadcast::Receiver<ChatMessage>> {
            self.sender.lock().unwrap().as_ref().map(|sender| sender.subscribe())
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.drop_connection();
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dropped_connection_is_reconnected_and_moderated() {
        let dir = tempfile::tempdir().unwrap();
        let settings = BotSettings {
            config_path: dir.path().join("rooms.json"),
            ..BotSettings::default()
        };
        let store = Arc::new(ConfigStore::new(&settings.config_path, Defaults::default()));
        let patterns = PatternLibrary::new::<&str>(&[]).unwrap();
        let mut bot = ChatBot::new(&settings, store, patterns, Arc::new(NoLyrics));

        let connection = FlakyConnection::default();
        let mock = Arc::new(MockActions::new());
        bot.add_connection(Box::new(connection.clone()), mock.clone()).await;
        bot.start().await.unwrap();
        assert_eq!(bot.reconnect_unhealthy().await, 0);

        connection.drop_connection();
        assert_eq!(bot.health_check().await.get("flaky"), Some(&false));

        assert_eq!(bot.reconnect_unhealthy().await, 1);
        assert_eq!(connection.connects.load(Ordering::SeqCst), 2);
        assert_eq!(bot.health_check().await.get("flaky"), Some(&true));

        connection.deliver(message("9", "fuck you"));
        settle().await;
        assert_eq!(mock.calls(), vec![Call::Delete("9".to_string())]);

        bot.shutdown().await.unwrap();
    }
}
