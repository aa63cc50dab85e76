use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::{ChatMessage, HistoryMessage};

pub mod discord;

/// Failures surfaced by a platform's message operations
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("message or channel not found")]
    NotFound,
    #[error("missing permission for this action")]
    Forbidden,
    #[error("rate limited, retry after {retry_after:.2}s")]
    RateLimited { retry_after: f64 },
    #[error("platform returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl PlatformError {
    /// Vanished targets and missing permissions are expected during moderation
    pub fn is_ignorable(&self) -> bool {
        matches!(self, PlatformError::NotFound | PlatformError::Forbidden)
    }
}

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Most ids a single bulk delete may carry
pub const BULK_DELETE_LIMIT: usize = 100;

/// Message operations the moderation and lyrics systems call into
#[async_trait]
pub trait MessageActions: Send + Sync {
    async fn delete_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<()>;

    /// Bulk delete, at most `BULK_DELETE_LIMIT` ids per call
    async fn delete_messages(&self, channel_id: &str, message_ids: &[String]) -> PlatformResult<()>;

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<HistoryMessage>;

    /// Send a message, returning its id
    async fn send_message(&self, channel_id: &str, text: &str) -> PlatformResult<String>;

    async fn edit_message(&self, channel_id: &str, message_id: &str, text: &str) -> PlatformResult<()>;

    /// Most recent messages first
    async fn fetch_recent_history(&self, channel_id: &str, limit: usize) -> PlatformResult<Vec<HistoryMessage>>;
}

/// Trait defining the lifecycle all platform connections must implement
#[async_trait]
pub trait PlatformConnection: Send + Sync {
    /// Connect to the platform and start receiving messages
    async fn connect(&mut self) -> Result<()>;

    /// Get the platform identifier (e.g., "discord")
    fn platform_name(&self) -> &str;

    /// Check if the connection is healthy
    async fn is_connected(&self) -> bool;

    /// Get a receiver for incoming messages
    fn get_message_receiver(&self) -> Option<broadcast::Receiver<ChatMessage>>;

    /// Gracefully disconnect
    async fn disconnect(&mut self) -> Result<()>;
}
