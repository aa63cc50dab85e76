// src/bot/moderation.rs - Rule evaluation over single messages and aggregation windows

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::bot::aggregation::{AggregateView, AggregationWindow};
use crate::bot::normalizer::normalize;
use crate::bot::pattern_matching::{contains_all_words, PatternLibrary};
use crate::config::ConfigStore;
use crate::platforms::{MessageActions, BULK_DELETE_LIMIT};
use crate::types::{
    ChatMessage, Decision, RecentMessage, RoomConfig, RuleTag, Verdict, WindowKey, MAX_WINDOW_SECONDS,
};

/// Decides what happens to a message. Holds no state of its own; the
/// aggregation window is passed in by the caller.
pub struct RuleEvaluator {
    patterns: PatternLibrary,
}

impl RuleEvaluator {
    pub fn new(patterns: PatternLibrary) -> Self {
        Self { patterns }
    }

    /// Single-message rules first; only a message that passes them is buffered and
    /// the author's recent messages are re-tested as one combined text.
    pub fn evaluate(&self, message: &ChatMessage, config: &RoomConfig, window: &mut AggregationWindow) -> Decision {
        let normalized = normalize(&message.content);

        if let Some(tag) = self.check_single(&normalized, message.mentions_others) {
            return Decision::delete_current(tag);
        }

        let key = WindowKey::for_message(message);
        window.record(key.clone(), RecentMessage::from_message(message, normalized));
        let view = window.aggregate(&key, message.timestamp, config.window);

        match self.check_aggregate(&view, config) {
            Some(tag) => {
                // Deleted messages must not feed the next aggregate
                window.clear(&key);
                Decision::delete_batch(tag, view.message_ids())
            }
            None => Decision::allow(),
        }
    }

    fn check_single(&self, text: &str, had_mention: bool) -> Option<RuleTag> {
        self.patterns
            .first_semantic_match(text, had_mention)
            .or_else(|| self.patterns.contains_banned_word(text).then_some(RuleTag::BannedWord))
    }

    /// The word combo only ever runs here, against the combined text
    fn check_aggregate(&self, view: &AggregateView, config: &RoomConfig) -> Option<RuleTag> {
        if view.entries.is_empty() {
            return None;
        }
        let text = view.combined_text.as_str();

        self.patterns
            .first_semantic_match(text, view.any_mention)
            .or_else(|| self.patterns.contains_banned_word(text).then_some(RuleTag::BannedWord))
            .or_else(|| contains_all_words(text, config.words.as_slice()).then_some(RuleTag::WordCombo))
    }
}

pub struct ModerationSystem {
    evaluator: RuleEvaluator,
    windows: Arc<Mutex<AggregationWindow>>,
    config_store: Arc<ConfigStore>,
}

impl ModerationSystem {
    pub fn new(evaluator: RuleEvaluator, config_store: Arc<ConfigStore>) -> Self {
        Self {
            evaluator,
            windows: Arc::new(Mutex::new(AggregationWindow::new())),
            config_store,
        }
    }

    /// Evaluate a message against its room's configuration
    pub async fn check_message(&self, message: &ChatMessage) -> Decision {
        let config = self.config_store.get(&message.room_id).await;

        let decision = {
            let mut windows = self.windows.lock().await;
            self.evaluator.evaluate(message, &config, &mut windows)
        };

        match &decision.verdict {
            Verdict::Allow => {}
            Verdict::DeleteCurrent => {
                info!(
                    "Deleting message {} from {} in room {} ({})",
                    message.message_id,
                    message.username,
                    message.room_id,
                    decision.reason.map_or("unknown", |r| r.as_str())
                );
            }
            Verdict::DeleteWindowBatch(ids) => {
                info!(
                    "Deleting {} recent messages from {} in room {} ({})",
                    ids.len(),
                    message.username,
                    message.room_id,
                    decision.reason.map_or("unknown", |r| r.as_str())
                );
            }
        }

        decision
    }

    /// Carry out a decision. Returns how many messages were actually deleted.
    pub async fn handle_verdict(actions: &dyn MessageActions, message: &ChatMessage, decision: &Decision) -> usize {
        match &decision.verdict {
            Verdict::Allow => 0,
            Verdict::DeleteCurrent => {
                usize::from(Self::delete_one(actions, &message.channel_id, &message.message_id).await)
            }
            Verdict::DeleteWindowBatch(ids) => Self::delete_batch(actions, &message.channel_id, ids).await,
        }
    }

    async fn delete_batch(actions: &dyn MessageActions, channel_id: &str, ids: &[String]) -> usize {
        let mut deleted = 0;

        for chunk in ids.chunks(BULK_DELETE_LIMIT) {
            if chunk.len() == 1 {
                deleted += usize::from(Self::delete_one(actions, channel_id, &chunk[0]).await);
                continue;
            }

            match actions.delete_messages(channel_id, chunk).await {
                Ok(()) => deleted += chunk.len(),
                Err(e) => {
                    debug!("Bulk delete of {} messages failed ({}), deleting one by one", chunk.len(), e);
                    for id in chunk {
                        deleted += usize::from(Self::delete_one(actions, channel_id, id).await);
                    }
                }
            }
        }

        deleted
    }

    async fn delete_one(actions: &dyn MessageActions, channel_id: &str, message_id: &str) -> bool {
        match actions.delete_message(channel_id, message_id).await {
            Ok(()) => true,
            Err(e) if e.is_ignorable() => {
                debug!("Skipping delete of {}: {}", message_id, e);
                false
            }
            Err(e) => {
                warn!("Failed to delete message {}: {}", message_id, e);
                false
            }
        }
    }

    /// Periodically drop buffers for authors who went quiet
    pub fn start_idle_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let windows = Arc::clone(&self.windows);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                windows.lock().await.purge_idle(chrono::Utc::now(), MAX_WINDOW_SECONDS);
            }
        })
    }
}
