// src/platforms/discord.rs - Discord gateway (inbound) and REST (message actions)

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::platforms::{MessageActions, PlatformConnection, PlatformError, PlatformResult, BULK_DELETE_LIMIT};
use crate::types::{ChatMessage, EmbedText, HistoryMessage};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// GUILDS | GUILD_MESSAGES | MESSAGE_CONTENT
pub const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 15);

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

/// Sequence number 0 means none received yet
const NO_SEQUENCE: u64 = 0;

type WebSocketWriter = Arc<
    RwLock<
        futures_util::stream::SplitSink<
            tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
            Message,
        >,
    >,
>;

/// Configuration for the Discord connection
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    pub token: String,
    /// Role ids whose members may run admin commands
    pub manager_roles: HashSet<String>,
    /// User ids that may always run admin commands
    pub manager_users: HashSet<String>,
    pub api_base: String,
    pub gateway_url: String,
}

impl DiscordConfig {
    /// Load from `DISCORD_TOKEN`, `DISCORD_MANAGER_ROLES` and `DISCORD_MANAGER_USERS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("DISCORD_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .context("DISCORD_TOKEN environment variable not set")?;

        let id_set = |key: &str| -> HashSet<String> {
            lookup(key)
                .unwrap_or_default()
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let config = Self {
            token,
            manager_roles: id_set("DISCORD_MANAGER_ROLES"),
            manager_users: id_set("DISCORD_MANAGER_USERS"),
            api_base: DEFAULT_API_BASE.to_string(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
        };

        if config.manager_roles.is_empty() && config.manager_users.is_empty() {
            warn!("No DISCORD_MANAGER_ROLES or DISCORD_MANAGER_USERS set; admin commands are disabled");
        }
        info!(
            "Loaded Discord config with {} manager roles and {} manager users",
            config.manager_roles.len(),
            config.manager_users.len()
        );

        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(default)]
    d: Value,
    s: Option<u64>,
    t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Default, Deserialize)]
struct DiscordMember {
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordEmbed {
    title: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
    channel_id: String,
    guild_id: Option<String>,
    author: DiscordUser,
    #[serde(default)]
    content: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    mentions: Vec<DiscordUser>,
    #[serde(default)]
    mention_roles: Vec<String>,
    #[serde(default)]
    mention_everyone: bool,
    member: Option<DiscordMember>,
    message_reference: Option<Value>,
    #[serde(default)]
    embeds: Vec<DiscordEmbed>,
}

impl DiscordMessage {
    /// Guild messages only; DMs have no room to moderate
    fn into_chat_message(self, config: &DiscordConfig) -> Option<ChatMessage> {
        let room_id = self.guild_id?;

        let mentions_others = self.mentions.iter().any(|u| u.id != self.author.id)
            || !self.mention_roles.is_empty()
            || self.mention_everyone
            || self.message_reference.is_some();

        let is_manager = config.manager_users.contains(&self.author.id)
            || self
                .member
                .as_ref()
                .map_or(false, |m| m.roles.iter().any(|r| config.manager_roles.contains(r)));

        Some(ChatMessage {
            platform: "discord".to_string(),
            room_id,
            channel_id: self.channel_id,
            message_id: self.id,
            author_id: self.author.id,
            username: self.author.username,
            content: self.content,
            timestamp: self.timestamp,
            mentions_others,
            is_manager,
            is_bot: self.author.bot,
        })
    }

    fn into_history(self) -> HistoryMessage {
        HistoryMessage {
            id: self.id,
            author_is_bot: self.author.bot,
            content: self.content,
            embeds: self
                .embeds
                .into_iter()
                .map(|e| EmbedText {
                    title: e.title,
                    description: e.description,
                })
                .collect(),
        }
    }
}

/// Map a non-success HTTP status to the error callers branch on
fn status_error(status: u16, body: String) -> PlatformError {
    match status {
        404 => PlatformError::NotFound,
        403 => PlatformError::Forbidden,
        429 => {
            let retry_after = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("retry_after").and_then(Value::as_f64))
                .unwrap_or(1.0);
            PlatformError::RateLimited { retry_after }
        }
        _ => PlatformError::Http { status, body },
    }
}

/// REST client for message operations
pub struct DiscordRest {
    http_client: reqwest::Client,
    token: String,
    api_base: String,
}

impl DiscordRest {
    pub fn new(config: &DiscordConfig) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            token: config.token.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    fn message_url(&self, channel_id: &str, message_id: Option<&str>) -> String {
        match message_id {
            Some(id) => format!("{}/channels/{}/messages/{}", self.api_base, channel_id, id),
            None => format!("{}/channels/{}/messages", self.api_base, channel_id),
        }
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> PlatformResult<reqwest::Response> {
        let response = request
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status.as_u16(), body))
    }
}

#[async_trait]
impl MessageActions for DiscordRest {
    async fn delete_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<()> {
        self.execute(self.http_client.delete(self.message_url(channel_id, Some(message_id))))
            .await?;
        debug!("Deleted message {} in {}", message_id, channel_id);
        Ok(())
    }

    async fn delete_messages(&self, channel_id: &str, message_ids: &[String]) -> PlatformResult<()> {
        for chunk in message_ids.chunks(BULK_DELETE_LIMIT) {
            if let [single] = chunk {
                // Bulk delete needs at least two ids
                self.delete_message(channel_id, single).await?;
                continue;
            }
            let url = format!("{}/bulk-delete", self.message_url(channel_id, None));
            self.execute(self.http_client.post(url).json(&json!({ "messages": chunk })))
                .await?;
            debug!("Bulk deleted {} messages in {}", chunk.len(), channel_id);
        }
        Ok(())
    }

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> PlatformResult<HistoryMessage> {
        let message: DiscordMessage = self
            .execute(self.http_client.get(self.message_url(channel_id, Some(message_id))))
            .await?
            .json()
            .await?;
        Ok(message.into_history())
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> PlatformResult<String> {
        let body = json!({ "content": text, "allowed_mentions": { "parse": [] } });
        let message: DiscordMessage = self
            .execute(self.http_client.post(self.message_url(channel_id, None)).json(&body))
            .await?
            .json()
            .await?;
        Ok(message.id)
    }

    async fn edit_message(&self, channel_id: &str, message_id: &str, text: &str) -> PlatformResult<()> {
        self.execute(
            self.http_client
                .patch(self.message_url(channel_id, Some(message_id)))
                .json(&json!({ "content": text })),
        )
        .await?;
        Ok(())
    }

    async fn fetch_recent_history(&self, channel_id: &str, limit: usize) -> PlatformResult<Vec<HistoryMessage>> {
        let messages: Vec<DiscordMessage> = self
            .execute(
                self.http_client
                    .get(self.message_url(channel_id, None))
                    .query(&[("limit", limit.clamp(1, 100))]),
            )
            .await?
            .json()
            .await?;
        Ok(messages.into_iter().map(DiscordMessage::into_history).collect())
    }
}

/// Discord gateway connection
pub struct DiscordConnection {
    config: DiscordConfig,
    rest: Arc<DiscordRest>,
    message_sender: Option<broadcast::Sender<ChatMessage>>,
    websocket_writer: Option<WebSocketWriter>,
    is_connected: Arc<RwLock<bool>>,
    heartbeat_task: Option<JoinHandle<()>>,
}

impl DiscordConnection {
    pub fn new(config: DiscordConfig) -> Self {
        let rest = Arc::new(DiscordRest::new(&config));
        Self {
            config,
            rest,
            message_sender: None,
            websocket_writer: None,
            is_connected: Arc::new(RwLock::new(false)),
            heartbeat_task: None,
        }
    }

    /// REST side of the connection, used to act on messages
    pub fn actions(&self) -> Arc<dyn MessageActions> {
        self.rest.clone()
    }

    fn identify_payload(&self) -> Value {
        json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.config.token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": env::consts::OS,
                    "browser": "guardbot",
                    "device": "guardbot"
                }
            }
        })
    }
}

fn heartbeat_payload(sequence: u64) -> String {
    let d = if sequence == NO_SEQUENCE { Value::Null } else { json!(sequence) };
    json!({ "op": OP_HEARTBEAT, "d": d }).to_string()
}

#[async_trait]
impl PlatformConnection for DiscordConnection {
    async fn connect(&mut self) -> Result<()> {
        info!("Connecting to Discord gateway...");

        let url = Url::parse(&self.config.gateway_url).context("Failed to parse Discord gateway URL")?;
        let (ws_stream, _) = connect_async(url)
            .await
            .context("Failed to connect to Discord gateway")?;
        let (write, mut read) = ws_stream.split();

        // The first frame is Hello with the heartbeat interval
        let heartbeat_interval = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    let payload: GatewayPayload =
                        serde_json::from_str(&text).context("Failed to parse gateway Hello")?;
                    if payload.op == OP_HELLO {
                        let interval = payload
                            .d
                            .get("heartbeat_interval")
                            .and_then(Value::as_u64)
                            .context("Hello without heartbeat_interval")?;
                        break interval;
                    }
                    debug!("Ignoring op {} before Hello", payload.op);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e).context("Gateway error before Hello"),
                None => anyhow::bail!("Gateway closed before Hello"),
            }
        };
        debug!("Gateway heartbeat interval: {}ms", heartbeat_interval);

        let writer = Arc::new(RwLock::new(write));
        self.websocket_writer = Some(Arc::clone(&writer));

        writer
            .write()
            .await
            .send(Message::Text(self.identify_payload().to_string()))
            .await
            .context("Failed to send Identify")?;

        let (tx, _) = broadcast::channel(1000);
        self.message_sender = Some(tx.clone());
        *self.is_connected.write().await = true;

        let sequence = Arc::new(AtomicU64::new(NO_SEQUENCE));

        // Heartbeat loop
        {
            let writer = Arc::clone(&writer);
            let sequence = Arc::clone(&sequence);
            let is_connected = Arc::clone(&self.is_connected);
            self.heartbeat_task = Some(tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_millis(heartbeat_interval));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if !*is_connected.read().await {
                        break;
                    }
                    let beat = heartbeat_payload(sequence.load(Ordering::SeqCst));
                    if let Err(e) = writer.write().await.send(Message::Text(beat)).await {
                        error!("Failed to send heartbeat: {}", e);
                        break;
                    }
                }
                debug!("Discord heartbeat stopped");
            }));
        }

        // Reader loop
        let config = self.config.clone();
        let is_connected = Arc::clone(&self.is_connected);
        tokio::spawn(async move {
            info!("Discord gateway reader started");

            loop {
                match read.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let payload: GatewayPayload = match serde_json::from_str(&text) {
                            Ok(payload) => payload,
                            Err(e) => {
                                debug!("Unparseable gateway frame: {}", e);
                                continue;
                            }
                        };
                        if let Some(s) = payload.s {
                            sequence.store(s, Ordering::SeqCst);
                        }

                        match payload.op {
                            OP_DISPATCH => match payload.t.as_deref() {
                                Some("READY") => {
                                    let name = payload.d["user"]["username"].as_str().unwrap_or("unknown");
                                    info!("Discord session ready as {}", name);
                                }
                                Some("MESSAGE_CREATE") => {
                                    match serde_json::from_value::<DiscordMessage>(payload.d) {
                                        Ok(message) => {
                                            if let Some(chat_msg) = message.into_chat_message(&config) {
                                                debug!("Message {} from {}", chat_msg.message_id, chat_msg.username);
                                                if let Err(e) = tx.send(chat_msg) {
                                                    warn!("Failed to broadcast message: {}", e);
                                                }
                                            }
                                        }
                                        Err(e) => debug!("Skipping malformed MESSAGE_CREATE: {}", e),
                                    }
                                }
                                _ => {}
                            },
                            OP_HEARTBEAT => {
                                let beat = heartbeat_payload(sequence.load(Ordering::SeqCst));
                                if let Err(e) = writer.write().await.send(Message::Text(beat)).await {
                                    error!("Failed to answer heartbeat request: {}", e);
                                }
                            }
                            OP_HEARTBEAT_ACK => {}
                            OP_RECONNECT | OP_INVALID_SESSION => {
                                warn!("Discord asked us to reconnect (op {})", payload.op);
                                break;
                            }
                            other => debug!("Unhandled gateway op {}", other),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = writer.write().await.send(Message::Pong(payload)).await {
                            error!("Failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(close_frame))) => {
                        info!("Discord gateway closed: {:?}", close_frame);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!("Discord gateway error: {}", e);
                        break;
                    }
                    None => {
                        warn!("Discord gateway stream ended");
                        break;
                    }
                }
            }

            *is_connected.write().await = false;
            warn!("Discord gateway reader exited");
        });

        info!("Connected to Discord gateway");
        Ok(())
    }

    fn platform_name(&self) -> &str {
        "discord"
    }

    async fn is_connected(&self) -> bool {
        *self.is_connected.read().await
    }

    fn get_message_receiver(&self) -> Option<broadcast::Receiver<ChatMessage>> {
        self.message_sender.as_ref().map(|sender| sender.subscribe())
    }

    async fn disconnect(&mut self) -> Result<()> {
        *self.is_connected.write().await = false;
        if let Some(task) = self.heartbeat_task.take() {
            task.abort();
        }
        if let Some(writer) = self.websocket_writer.take() {
            if let Err(e) = writer.write().await.send(Message::Close(None)).await {
                debug!("Close frame not sent: {}", e);
            }
        }
        self.message_sender = None;
        info!("Disconnected from Discord");
        Ok(())
    }
}
