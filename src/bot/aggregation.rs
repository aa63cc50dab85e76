// src/bot/aggregation.rs - Sliding per-author window of recent normalized messages

use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::{HashMap, VecDeque};

use crate::types::{RecentMessage, WindowKey};

/// Entries kept per (room, channel, author) regardless of age
pub const WINDOW_CAPACITY: usize = 10;

/// Combined view over the live part of one author's window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateView {
    /// Chronological, space-joined normalized text
    pub combined_text: String,
    pub any_mention: bool,
    pub entries: Vec<RecentMessage>,
}

impl AggregateView {
    pub fn message_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.message_id.clone()).collect()
    }
}

/// Bounded, time-ordered history per (room, channel, author)
#[derive(Debug)]
pub struct AggregationWindow {
    buffers: HashMap<WindowKey, VecDeque<RecentMessage>>,
    capacity: usize,
}

impl Default for AggregationWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregationWindow {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffers: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a message, evicting the oldest entry once capacity is exceeded.
    /// A timestamp older than the newest buffered entry is raised to it so the
    /// buffer stays in non-decreasing order.
    pub fn record(&mut self, key: WindowKey, mut message: RecentMessage) {
        let buffer = self.buffers.entry(key).or_default();

        if let Some(last) = buffer.back() {
            if message.timestamp < last.timestamp {
                message.timestamp = last.timestamp;
            }
        }

        buffer.push_back(message);
        while buffer.len() > self.capacity {
            buffer.pop_front();
        }
    }

    /// Prune entries older than `window_seconds`, then combine what is left
    pub fn aggregate(&mut self, key: &WindowKey, now: DateTime<Utc>, window_seconds: u64) -> AggregateView {
        let window = Duration::seconds(window_seconds as i64);

        let Some(buffer) = self.buffers.get_mut(key) else {
            return AggregateView::default();
        };

        while let Some(front) = buffer.front() {
            if now - front.timestamp > window {
                buffer.pop_front();
            } else {
                break;
            }
        }

        if buffer.is_empty() {
            self.buffers.remove(key);
            return AggregateView::default();
        }

        let combined_text = buffer
            .iter()
            .map(|e| e.normalized_text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        AggregateView {
            combined_text,
            any_mention: buffer.iter().any(|e| e.mentions_others),
            entries: buffer.iter().cloned().collect(),
        }
    }

    /// Drop an author's buffer, returning what it held
    pub fn clear(&mut self, key: &WindowKey) -> Vec<RecentMessage> {
        self.buffers
            .remove(key)
            .map(|b| b.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, key: &WindowKey) -> usize {
        self.buffers.get(key).map_or(0, |b| b.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.buffers.len()
    }

    /// Drop buffers whose newest entry is older than `max_age_seconds`
    pub fn purge_idle(&mut self, now: DateTime<Utc>, max_age_seconds: u64) -> usize {
        let max_age = Duration::seconds(max_age_seconds as i64);
        let before = self.buffers.len();
        self.buffers.retain(|_, buffer| {
            buffer
                .back()
                .map_or(false, |last| now - last.timestamp <= max_age)
        });
        let removed = before - self.buffers.len();
        if removed > 0 {
            debug!("Purged {} idle aggregation buffers", removed);
        }
        removed
    }
}
