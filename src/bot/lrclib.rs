// src/bot/lrclib.rs - LRCLIB lookups and "now playing" detection from channel history

use anyhow::Context;
use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::time::Duration;
use url::Url;

use crate::bot::lyrics::{FetchedLyrics, LyricsError, LyricsProvider};
use crate::platforms::MessageActions;
use crate::types::HistoryMessage;

pub const LRCLIB_BASE_URL: &str = "https://lrclib.net";
/// How far back to look for a music bot's now-playing message
pub const NOW_PLAYING_SCAN_LIMIT: usize = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

static BY_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+by\s+").expect("separator pattern compiles"));
static TITLE_BY_ARTIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(.+?)\s+by\s+(.+)$").expect("title pattern compiles"));
static CLOCK_DURATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{1,2}):(\d{2})").expect("duration pattern compiles"));

/// One lyrics record as returned by `/api/get` and `/api/search`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LrcLibRecord {
    id: u64,
    duration: Option<f64>,
    plain_lyrics: Option<String>,
    synced_lyrics: Option<String>,
}

impl LrcLibRecord {
    /// Synced lyrics when present, plain otherwise
    fn into_lyrics(self, requested_duration: Option<u64>) -> Option<FetchedLyrics> {
        let text = self
            .synced_lyrics
            .filter(|t| !t.trim().is_empty())
            .or_else(|| self.plain_lyrics.filter(|t| !t.trim().is_empty()))?;

        let duration = self
            .duration
            .filter(|d| *d > 0.0)
            .map(|d| d.round() as u64)
            .or(requested_duration);

        Some(FetchedLyrics { text, duration })
    }
}

/// Closest match by duration when one is known, otherwise the first result
fn pick_closest(records: Vec<LrcLibRecord>, duration: Option<u64>) -> Option<LrcLibRecord> {
    match duration {
        Some(target) => {
            let target = target as f64;
            records
                .into_iter()
                .min_by(|a, b| {
                    let da = (a.duration.unwrap_or(target) - target).abs();
                    let db = (b.duration.unwrap_or(target) - target).abs();
                    da.total_cmp(&db)
                })
        }
        None => records.into_iter().next(),
    }
}

/// Client for the public LRCLIB API
pub struct LrcLibClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl LrcLibClient {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        Self::with_base_url(user_agent, LRCLIB_BASE_URL)
    }

    pub fn with_base_url(user_agent: &str, base_url: &str) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build LRCLIB HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, LyricsError> {
        Url::parse_with_params(&format!("{}{}", self.base_url, path), params)
            .map_err(|e| LyricsError::Lookup(format!("bad lookup url: {}", e)))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, LyricsError> {
        debug!("LRCLIB request: {}", url);

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| LyricsError::Lookup(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(LyricsError::Lookup(format!("LRCLIB returned HTTP {}", response.status())));
        }

        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| LyricsError::Lookup(format!("unreadable LRCLIB response: {}", e)))
    }

    async fn get_exact(&self, track: &str, artist: &str, duration: Option<u64>) -> Result<Option<LrcLibRecord>, LyricsError> {
        let mut params = vec![
            ("track_name", track.to_string()),
            ("artist_name", artist.to_string()),
            ("album_name", String::new()),
        ];
        if let Some(duration) = duration {
            params.push(("duration", duration.to_string()));
        }
        self.get_json(self.endpoint("/api/get", &params)?).await
    }

    async fn search(&self, track: &str, artist: &str) -> Result<Vec<LrcLibRecord>, LyricsError> {
        let params = [("track_name", track.to_string()), ("artist_name", artist.to_string())];
        Ok(self
            .get_json(self.endpoint("/api/search", &params)?)
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl LyricsProvider for LrcLibClient {
    async fn fetch(&self, track: &str, artist: &str, duration: Option<u64>) -> Result<FetchedLyrics, LyricsError> {
        let not_found = || LyricsError::NotFound {
            artist: artist.to_string(),
            track: track.to_string(),
        };

        let exact = match self.get_exact(track, artist, duration).await {
            Ok(record) => record.and_then(|r| r.into_lyrics(duration)),
            Err(e) => {
                debug!("LRCLIB get failed for {}: {}, trying search", track, e);
                None
            }
        };
        if let Some(lyrics) = exact {
            return Ok(lyrics);
        }

        let results = self.search(track, artist).await?;
        debug!("LRCLIB search for {} returned {} results", track, results.len());
        pick_closest(results, duration)
            .and_then(|record| {
                debug!("Using LRCLIB record {}", record.id);
                record.into_lyrics(duration)
            })
            .ok_or_else(not_found)
    }
}

/// Split "A - B", "A — B" or "A by B" into its two halves
pub fn split_title_artist(text: &str) -> Option<(String, String)> {
    if let Some((left, right)) = text.split_once(" - ") {
        // "Track - Remix by Artist"
        let right = match BY_SEPARATOR.find(right) {
            Some(m) => &right[m.end()..],
            None => right,
        };
        return Some((left.trim().to_string(), right.trim().to_string()));
    }

    if let Some((left, right)) = text.split_once(" — ") {
        return Some((left.trim().to_string(), right.trim().to_string()));
    }

    TITLE_BY_ARTIST
        .captures(text.trim())
        .map(|caps| (caps[1].trim().to_string(), caps[2].trim().to_string()))
}

/// First `m:ss` or `mm:ss` in the text, in seconds
pub fn parse_duration_from_text(text: &str) -> Option<u64> {
    let caps = CLOCK_DURATION.captures(text)?;
    let minutes: u64 = caps[1].parse().ok()?;
    let seconds: u64 = caps[2].parse().ok()?;
    Some(minutes * 60 + seconds)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NowPlaying {
    pub track: String,
    pub artist: String,
    pub duration: Option<u64>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn now_playing_in(message: &HistoryMessage) -> Option<NowPlaying> {
    if !message.author_is_bot {
        return None;
    }

    for embed in &message.embeds {
        let text = [non_empty(&embed.title), non_empty(&embed.description)]
            .iter()
            .flatten()
            .copied()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        // "now playing" is covered by "playing"
        if !text.contains("playing") {
            continue;
        }

        let source = non_empty(&embed.title).or(non_empty(&embed.description)).unwrap_or("");
        if let Some((first, second)) = split_title_artist(source) {
            let duration_source = non_empty(&embed.description).or(non_empty(&embed.title)).unwrap_or("");
            return Some(NowPlaying {
                track: second,
                artist: first,
                duration: parse_duration_from_text(duration_source),
            });
        }
    }

    let lower = message.content.to_lowercase();
    if lower.contains("now playing") || lower.contains("playing:") {
        if let Some((first, second)) = split_title_artist(&message.content) {
            return Some(NowPlaying {
                track: second,
                artist: first,
                duration: parse_duration_from_text(&message.content),
            });
        }
    }

    None
}

/// Look through recent bot messages for something a music bot announced
pub async fn detect_now_playing(actions: &dyn MessageActions, channel_id: &str) -> Option<NowPlaying> {
    let history = match actions.fetch_recent_history(channel_id, NOW_PLAYING_SCAN_LIMIT).await {
        Ok(history) => history,
        Err(e) => {
            debug!("Could not read history of {}: {}", channel_id, e);
            return None;
        }
    };

    history.iter().find_map(now_playing_in)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::mock::MockActions;
    use crate::types::EmbedText;

    fn record(id: u64, duration: Option<f64>, synced: Option<&str>, plain: Option<&str>) -> LrcLibRecord {
        LrcLibRecord {
            id,
            duration,
            synced_lyrics: synced.map(String::from),
            plain_lyrics: plain.map(String::from),
        }
    }

    fn bot_message(content: &str, embeds: Vec<EmbedText>) -> HistoryMessage {
        HistoryMessage {
            id: "h".to_string(),
            author_is_bot: true,
            content: content.to_string(),
            embeds,
        }
    }

    #[test]
    fn test_split_title_artist() {
        assert_eq!(split_title_artist("Song - Artist"), Some(("Song".to_string(), "Artist".to_string())));
        assert_eq!(split_title_artist("Song - Remix by DJ Two"), Some(("Song".to_string(), "DJ Two".to_string())));
        assert_eq!(split_title_artist("Song — Artist"), Some(("Song".to_string(), "Artist".to_string())));
        assert_eq!(split_title_artist("Song By The Band"), Some(("Song".to_string(), "The Band".to_string())));
        assert_eq!(split_title_artist("Standalone"), None);
    }

    #[test]
    fn test_parse_duration_from_text() {
        assert_eq!(parse_duration_from_text("[3:45]"), Some(225));
        assert_eq!(parse_duration_from_text("length 03:05 of 10:00"), Some(185));
        assert_eq!(parse_duration_from_text("no clock here"), None);
    }

    #[test]
    fn test_record_prefers_synced_lyrics() {
        let lyrics = record(1, Some(212.6), Some("[00:01]hi"), Some("hi")).into_lyrics(None).unwrap();
        assert_eq!(lyrics.text, "[00:01]hi");
        assert_eq!(lyrics.duration, Some(213));

        let plain = record(2, None, Some("  "), Some("hi")).into_lyrics(Some(90)).unwrap();
        assert_eq!(plain.text, "hi");
        assert_eq!(plain.duration, Some(90));

        assert!(record(3, Some(100.0), None, None).into_lyrics(None).is_none());
    }

    #[test]
    fn test_pick_closest_by_duration() {
        let records = vec![
            record(1, Some(300.0), None, Some("a")),
            record(2, Some(205.0), None, Some("b")),
            record(3, None, None, Some("c")),
        ];
        assert_eq!(pick_closest(records.clone(), Some(200)).map(|r| r.id), Some(3));
        assert_eq!(pick_closest(records[..2].to_vec(), Some(200)).map(|r| r.id), Some(2));
        assert_eq!(pick_closest(records, None).map(|r| r.id), Some(1));
        assert!(pick_closest(Vec::new(), Some(10)).is_none());
    }

    #[test]
    fn test_endpoint_encodes_params() {
        let client = LrcLibClient::with_base_url("test-agent", "http://localhost:9/").unwrap();
        let url = client
            .endpoint("/api/get", &[("track_name", "Rock & Roll".to_string())])
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:9/api/get?track_name=Rock+%26+Roll");
    }

    #[test]
    fn test_now_playing_from_embed() {
        let message = bot_message(
            "",
            vec![EmbedText {
                title: Some("Now Playing".to_string()),
                description: Some("Blinding Lights — The Weeknd [3:20]".to_string()),
            }],
        );
        // The title has no separator, so nothing is found from the embed title
        assert_eq!(now_playing_in(&message), None);

        let message = bot_message(
            "",
            vec![EmbedText {
                title: None,
                description: Some("Playing: The Weeknd - Blinding Lights [3:20]".to_string()),
            }],
        );
        assert_eq!(
            now_playing_in(&message),
            Some(NowPlaying {
                track: "Blinding Lights [3:20]".to_string(),
                artist: "Playing: The Weeknd".to_string(),
                duration: Some(200),
            })
        );
    }

    #[test]
    fn test_now_playing_ignores_people() {
        let mut message = bot_message("now playing: Song - Artist", Vec::new());
        assert!(now_playing_in(&message).is_some());
        message.author_is_bot = false;
        assert!(now_playing_in(&message).is_none());
    }

    #[tokio::test]
    async fn test_detect_now_playing_scans_history() {
        let actions = MockActions::new();
        {
            let mut history = actions.history.lock().unwrap();
            history.push(bot_message("queue cleared", Vec::new()));
            history.push(bot_message("Now playing: Artist - Track (4:01)", Vec::new()));
        }

        let found = detect_now_playing(&actions, "chan").await.unwrap();
        assert_eq!(found.artist, "Now playing: Artist");
        assert_eq!(found.track, "Track (4:01)");
        assert_eq!(found.duration, Some(241));

        assert!(detect_now_playing(&MockActions::new(), "chan").await.is_none());
    }
}
