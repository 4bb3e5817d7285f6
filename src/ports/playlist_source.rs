use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, SourceError};

/// One entry of an external playlist, as delivered by the source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRef {
    pub external_track_id: String,
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub art_url: Option<String>,
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub duration_ms: i64,
}

/// Descriptive data about an external playlist, cached on its link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistMetadata {
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub art_url: Option<String>,
}

/// Port over the third-party music source.
///
/// Implementations either return the complete ordered list or an error; a
/// partially fetched playlist is never handed to the engine.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait PlaylistSource: Send + Sync {
    async fn fetch_tracks(&self, playlist_id: &str) -> Result<Vec<TrackRef>, SourceError>;
    async fn fetch_metadata(&self, playlist_id: &str) -> Result<PlaylistMetadata, SourceError>;
}

static PLAYLIST_IN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"playlist[/:]([a-zA-Z0-9]+)").expect("valid regex"));
static BARE_PLAYLIST_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9]+$").expect("valid regex"));

/// Extracts an external playlist id from a bare id, a share URL
/// (`https://open.spotify.com/playlist/<id>?si=..`) or a `spotify:playlist:<id>` URI.
pub fn parse_playlist_id(input: &str) -> Result<String, EngineError> {
    let input = input.trim();
    if let Some(captures) = PLAYLIST_IN_LINK.captures(input) {
        return Ok(captures[1].to_string());
    }
    if BARE_PLAYLIST_ID.is_match(input) {
        return Ok(input.to_string());
    }
    Err(EngineError::InvalidPlaylistRef(input.to_string()))
}
