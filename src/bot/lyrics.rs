// src/bot/lyrics.rs - Time-synced lyrics sessions that keep editing one message

use async_trait::async_trait;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration, Instant};
use uuid::Uuid;

use crate::bot::lrclib::{detect_now_playing, split_title_artist};
use crate::platforms::MessageActions;

pub const TICK_INTERVAL: Duration = Duration::from_millis(250);
/// Seconds a session keeps running past its end time
pub const END_GRACE_SECONDS: f64 = 5.0;
pub const MAX_LINE_CHARS: usize = 140;
const END_MARKER: &str = "【End】";
const UNKNOWN_ARTIST: &str = "Unknown";

static LRC_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d{1,2}):(\d{1,2})(?:\.(\d{1,2}))?\]").expect("LRC tag pattern compiles"));

#[derive(Debug, Error)]
pub enum LyricsError {
    #[error("Couldn't detect the current track. Provide a query like `Song - Artist`.")]
    NoTrack,
    #[error("Couldn't find lyrics for **{artist} — {track}**.")]
    NotFound { artist: String, track: String },
    #[error("Lyrics exist but couldn't be parsed.")]
    Unparseable,
    #[error("lyrics lookup failed: {0}")]
    Lookup(String),
}

/// Raw lyric text plus the track duration, if the service knew it
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedLyrics {
    pub text: String,
    pub duration: Option<u64>,
}

#[async_trait]
pub trait LyricsProvider: Send + Sync {
    async fn fetch(&self, track: &str, artist: &str, duration: Option<u64>) -> Result<FetchedLyrics, LyricsError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct LrcLine {
    /// Seconds from the start of the track
    pub t: f64,
    pub text: String,
}

/// Parse LRC text into timed lines. Untagged text is spread evenly over the
/// hinted duration, or a guess of `max(120, 3 * lines)` seconds.
pub fn parse_lrc(text: &str, duration_hint: Option<u64>) -> Vec<LrcLine> {
    let mut lines = Vec::new();

    if LRC_TAG.is_match(text) {
        for raw in text.lines() {
            let content = LRC_TAG.replace_all(raw, "");
            let content = content.trim();
            if content.is_empty() {
                continue;
            }
            for caps in LRC_TAG.captures_iter(raw) {
                let minutes: f64 = caps[1].parse().unwrap_or(0.0);
                let seconds: f64 = caps[2].parse().unwrap_or(0.0);
                let fraction = caps.get(3).map_or(0.0, |m| {
                    let digits = m.as_str();
                    digits.parse::<f64>().unwrap_or(0.0) / 10f64.powi(digits.len() as i32)
                });
                lines.push(LrcLine {
                    t: minutes * 60.0 + seconds + fraction,
                    text: content.to_string(),
                });
            }
        }
    } else {
        let plain: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if plain.is_empty() {
            return Vec::new();
        }
        let count = plain.len() as f64;
        let total = duration_hint
            .filter(|d| *d > 0)
            .map_or_else(|| (count * 3.0).max(120.0), |d| d as f64);
        let step = (total / count).max(1.5);
        for (i, line) in plain.into_iter().enumerate() {
            lines.push(LrcLine {
                t: i as f64 * step,
                text: line.to_string(),
            });
        }
    }

    lines.sort_by(|a, b| a.t.total_cmp(&b.t));
    lines.dedup_by(|next, kept| next.text == kept.text);
    lines
}

/// Index of the last line whose timestamp is at or before `elapsed`.
/// Before the first line, and for an empty list, this is 0.
pub fn find_current_index(lines: &[LrcLine], elapsed: f64) -> usize {
    let mut index = 0;
    for (i, line) in lines.iter().enumerate() {
        if line.t <= elapsed {
            index = i;
        } else {
            break;
        }
    }
    index
}

pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

pub fn render_header(artist: &str, track: &str) -> String {
    format!("🎤 **{} — {}**", artist, track)
}

/// Previous, current and next line around `index`
pub fn render_frame(artist: &str, track: &str, lines: &[LrcLine], index: usize, command_prefix: &str) -> String {
    let prev = index
        .checked_sub(1)
        .and_then(|i| lines.get(i))
        .map_or(" ", |l| l.text.as_str());
    let current = lines.get(index).map_or(END_MARKER, |l| l.text.as_str());
    let next = lines.get(index + 1).map_or(" ", |l| l.text.as_str());

    format!(
        "{}\n```text\n{}\n> {}\n{}\n```\n_{p}lyrics offset ±seconds • {p}lyrics stop_",
        render_header(artist, track),
        truncate(prev, MAX_LINE_CHARS),
        truncate(current, MAX_LINE_CHARS),
        truncate(next, MAX_LINE_CHARS),
        p = command_prefix
    )
}

pub fn render_ended(artist: &str, track: &str) -> String {
    format!("{}\n_lyrics session ended_", render_header(artist, track))
}

/// One running lyrics display. Cloned as `Arc` between the registry and its task.
pub struct LyricsSession {
    id: Uuid,
    pub room_id: String,
    pub channel_id: String,
    pub track: String,
    pub artist: String,
    lines: Vec<LrcLine>,
    duration: Option<u64>,
    command_prefix: String,
    started: Instant,
    offset_bits: AtomicU64,
    stopped: AtomicBool,
}

impl LyricsSession {
    pub fn new(
        room_id: &str,
        channel_id: &str,
        track: &str,
        artist: &str,
        mut lines: Vec<LrcLine>,
        duration: Option<u64>,
        command_prefix: &str,
    ) -> Self {
        lines.sort_by(|a, b| a.t.total_cmp(&b.t));
        Self {
            id: Uuid::new_v4(),
            room_id: room_id.to_string(),
            channel_id: channel_id.to_string(),
            track: track.to_string(),
            artist: artist.to_string(),
            lines,
            duration,
            command_prefix: command_prefix.to_string(),
            started: Instant::now(),
            offset_bits: AtomicU64::new(0f64.to_bits()),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn offset(&self) -> f64 {
        f64::from_bits(self.offset_bits.load(Ordering::SeqCst))
    }

    /// Shift playback by `delta` seconds; returns the new total offset
    pub fn add_offset(&self, delta: f64) -> f64 {
        let previous = self
            .offset_bits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        f64::from_bits(previous) + delta
    }

    /// Playback position in seconds, including the manual offset
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64() + self.offset()
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Elapsed time after which the session ends on its own. Without a known
    /// duration the last line is held for the average line spacing.
    fn end_time(&self) -> f64 {
        let end = match (self.duration, self.lines.first(), self.lines.last()) {
            (Some(duration), _, _) => duration as f64,
            (None, Some(first), Some(last)) if self.lines.len() > 1 => {
                last.t + (last.t - first.t) / (self.lines.len() - 1) as f64
            }
            (None, _, last) => last.map_or(0.0, |l| l.t),
        };
        end + END_GRACE_SECONDS
    }

    /// Post the placeholder, then re-render whenever the current line changes
    /// until stopped or past the end. Edit failures never end the loop.
    pub async fn run(self: Arc<Self>, actions: Arc<dyn MessageActions>) {
        let placeholder = format!("{}\nStarting…", render_header(&self.artist, &self.track));
        let message_id = match actions.send_message(&self.channel_id, &placeholder).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Could not post lyrics for {} in room {}: {}", self.track, self.room_id, e);
                return;
            }
        };

        info!("Lyrics session {} started: {} — {} in room {}", self.id, self.artist, self.track, self.room_id);

        let mut last_index = None;
        while !self.is_stopped() {
            let elapsed = self.elapsed();
            let index = find_current_index(&self.lines, elapsed);

            if last_index != Some(index) {
                last_index = Some(index);
                let frame = render_frame(&self.artist, &self.track, &self.lines, index, &self.command_prefix);
                if let Err(e) = actions.edit_message(&self.channel_id, &message_id, &frame).await {
                    debug!("Lyrics edit failed: {}", e);
                }
            }

            if elapsed > self.end_time() {
                break;
            }

            sleep(TICK_INTERVAL).await;
        }

        if let Err(e) = actions
            .edit_message(&self.channel_id, &message_id, &render_ended(&self.artist, &self.track))
            .await
        {
            debug!("Lyrics end edit failed: {}", e);
        }

        info!("Lyrics session {} ended in room {}", self.id, self.room_id);
    }
}

/// At most one session per room
pub struct LyricsManager {
    sessions: Arc<RwLock<HashMap<String, Arc<LyricsSession>>>>,
    provider: Arc<dyn LyricsProvider>,
    command_prefix: String,
}

impl LyricsManager {
    pub fn new(provider: Arc<dyn LyricsProvider>, command_prefix: &str) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            provider,
            command_prefix: command_prefix.to_string(),
        }
    }

    /// Resolve the track, fetch and parse its lyrics, then replace any session
    /// already running in the room.
    pub async fn start(
        &self,
        actions: Arc<dyn MessageActions>,
        room_id: &str,
        channel_id: &str,
        query: Option<&str>,
    ) -> Result<Arc<LyricsSession>, LyricsError> {
        let (track, artist, duration) = match query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(query) => match split_title_artist(query) {
                Some((title, artist)) => (title, Some(artist), None),
                None => (query.to_string(), None, None),
            },
            None => match detect_now_playing(actions.as_ref(), channel_id).await {
                Some(playing) => (playing.track, Some(playing.artist), playing.duration),
                None => return Err(LyricsError::NoTrack),
            },
        };

        let not_found = || LyricsError::NotFound {
            artist: artist.clone().unwrap_or_else(|| "?".to_string()),
            track: track.clone(),
        };

        let fetched = match self
            .provider
            .fetch(&track, artist.as_deref().unwrap_or(""), duration)
            .await
        {
            Ok(fetched) => fetched,
            Err(LyricsError::Lookup(reason)) => {
                warn!("Lyrics lookup for {} failed: {}", track, reason);
                return Err(not_found());
            }
            Err(_) => return Err(not_found()),
        };

        let lines = parse_lrc(&fetched.text, fetched.duration);
        if lines.is_empty() {
            return Err(LyricsError::Unparseable);
        }

        let session = Arc::new(LyricsSession::new(
            room_id,
            channel_id,
            &track,
            artist.as_deref().unwrap_or(UNKNOWN_ARTIST),
            lines,
            fetched.duration,
            &self.command_prefix,
        ));

        if let Some(previous) = self.sessions.write().await.insert(room_id.to_string(), Arc::clone(&session)) {
            debug!("Replacing lyrics session {} in room {}", previous.id(), room_id);
            previous.stop();
        }

        let sessions = Arc::clone(&self.sessions);
        let running = Arc::clone(&session);
        tokio::spawn(async move {
            let id = running.id();
            let room_id = running.room_id.clone();
            running.run(actions).await;

            // A replacement may already own the room
            let mut sessions = sessions.write().await;
            if sessions.get(&room_id).map_or(false, |s| s.id() == id) {
                sessions.remove(&room_id);
            }
        });

        Ok(session)
    }

    /// Returns false when nothing was running
    pub async fn stop(&self, room_id: &str) -> bool {
        match self.sessions.read().await.get(room_id) {
            Some(session) => {
                session.stop();
                true
            }
            None => false,
        }
    }

    /// Returns the new offset, or None without an active session
    pub async fn adjust_offset(&self, room_id: &str, delta: f64) -> Option<f64> {
        self.sessions
            .read()
            .await
            .get(room_id)
            .map(|session| session.add_offset(delta))
    }

    pub async fn active(&self, room_id: &str) -> Option<Arc<LyricsSession>> {
        self.sessions.read().await.get(room_id).cloned()
    }

    /// Signal every running session to finish
    pub async fn stop_all(&self) {
        for session in self.sessions.read().await.values() {
            session.stop();
        }
    }
}
