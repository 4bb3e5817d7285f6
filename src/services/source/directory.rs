use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Deserialize;

use crate::error::SourceError;
use crate::ports::playlist_source::{PlaylistMetadata, PlaylistSource, TrackRef};

/// Exported playlist snapshot, stored as `<dir>/<playlist_id>.json`.
#[derive(Debug, Deserialize)]
struct PlaylistSnapshot {
    #[serde(default)]
    name: String,
    #[serde(default)]
    owner: String,
    #[serde(default)]
    art: Option<String>,
    tracks: Vec<TrackRef>,
}

/// Serves playlists from snapshot files in a directory.
///
/// A sync asks for metadata first and tracks second. The tracks of the
/// snapshot read for the metadata are kept until that tracks request, so both
/// come from the same version of the file even if it is rewritten in between.
pub struct DirectorySource {
    root: PathBuf,
    pending_tracks: Mutex<HashMap<String, Vec<TrackRef>>>,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pending_tracks: Mutex::new(HashMap::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<String, Vec<TrackRef>>> {
        self.pending_tracks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    async fn load(&self, playlist_id: &str) -> Result<PlaylistSnapshot, SourceError> {
        if playlist_id.is_empty() || !playlist_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SourceError::NotFound(playlist_id.to_string()));
        }

        let path = self.root.join(format!("{playlist_id}.json"));
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SourceError::NotFound(playlist_id.to_string()));
            }
            Err(e) => {
                return Err(SourceError::Unavailable(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        serde_json::from_str(&contents).map_err(|e| {
            SourceError::Unavailable(format!("malformed snapshot {}: {e}", path.display()))
        })
    }
}

#[async_trait::async_trait]
impl PlaylistSource for DirectorySource {
    async fn fetch_tracks(&self, playlist_id: &str) -> Result<Vec<TrackRef>, SourceError> {
        let pending = self.pending().remove(playlist_id);
        if let Some(tracks) = pending {
            return Ok(tracks);
        }

        let snapshot = self.load(playlist_id).await?;
        tracing::debug!(
            playlist = playlist_id,
            tracks = snapshot.tracks.len(),
            "Loaded playlist snapshot"
        );
        Ok(snapshot.tracks)
    }

    async fn fetch_metadata(&self, playlist_id: &str) -> Result<PlaylistMetadata, SourceError> {
        let snapshot = self.load(playlist_id).await?;
        self.pending()
            .insert(playlist_id.to_string(), snapshot.tracks);
        Ok(PlaylistMetadata {
            name: snapshot.name,
            owner: snapshot.owner,
            art_url: snapshot.art,
        })
    }
}
