use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::entities;
use crate::entities::song::Membership;

/// A song of one collection, grouped by who owns each part of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Song {
    pub id: i64,
    pub collection_id: i64,
    pub external_track_id: String,
    pub metadata: TrackMetadata,
    pub membership: Membership,
    pub customization: Customization,
    pub lifecycle: Lifecycle,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cached from the playlist source and overwritten on every sync.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub art_url: Option<String>,
    pub external_uri: String,
    pub duration_ms: i64,
}

/// User-owned content. Sync never writes notes, customized lyrics or a manual bpm.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Customization {
    pub lyrics: Lyrics,
    pub notes: String,
    pub bpm: Bpm,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "text", rename_all = "snake_case")]
pub enum Lyrics {
    NotFetched,
    Fetched(String),
    Customized(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "source", content = "value", rename_all = "snake_case")]
pub enum Bpm {
    Unset,
    LookedUp(f64),
    Manual(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lifecycle {
    Active,
    Flagged { since: DateTime<Utc> },
}

impl Song {
    #[cfg(test)]
    pub fn is_flagged(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Flagged { .. })
    }
}

impl From<entities::song::Model> for Song {
    fn from(model: entities::song::Model) -> Self {
        let lyrics = if model.lyrics_customized {
            Lyrics::Customized(model.lyrics_text)
        } else if model.lyrics_fetched {
            Lyrics::Fetched(model.lyrics_text)
        } else {
            Lyrics::NotFetched
        };

        let bpm = match model.bpm {
            Some(value) if model.bpm_manual => Bpm::Manual(value),
            Some(value) => Bpm::LookedUp(value),
            None => Bpm::Unset,
        };

        let lifecycle = if model.removed {
            Lifecycle::Flagged {
                since: model.removed_at.unwrap_or(model.updated_at),
            }
        } else {
            Lifecycle::Active
        };

        Self {
            id: model.id,
            collection_id: model.collection_id,
            external_track_id: model.external_track_id,
            metadata: TrackMetadata {
                title: model.title,
                artist: model.artist,
                album: model.album,
                art_url: model.art_url,
                external_uri: model.external_uri,
                duration_ms: model.duration_ms,
            },
            membership: model.membership,
            customization: Customization {
                lyrics,
                notes: model.notes,
                bpm,
            },
            lifecycle,
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SongSort {
    #[default]
    Title,
    Artist,
}

/// How a single fetched track was applied to the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackChange {
    Added,
    Updated,
    Unchanged,
    /// The per-song retry budget ran out; the song keeps its previous state.
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackOutcome {
    pub external_track_id: String,
    pub change: TrackChange,
}

/// Result of merging one playlist's fetched tracks into the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub outcomes: Vec<TrackOutcome>,
    /// Songs that lost this playlist because it no longer lists their track.
    pub pruned: MembershipRemoval,
}

impl MembershipDiff {
    pub fn count(&self, change: TrackChange) -> usize {
        self.outcomes.iter().filter(|o| o.change == change).count()
    }

    #[cfg(test)]
    pub fn change_of(&self, external_track_id: &str) -> Option<TrackChange> {
        self.outcomes
            .iter()
            .find(|o| o.external_track_id == external_track_id)
            .map(|o| o.change)
    }
}

/// Songs a playlist was dropped from. Songs whose write kept losing races
/// still list the playlist and are reported in `conflicts`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipRemoval {
    pub removed: Vec<i64>,
    pub conflicts: Vec<i64>,
}

/// Result of a versioned single-song write.
#[derive(Debug, Clone, PartialEq)]
pub enum SongWrite {
    Written(entities::song::Model),
    Unchanged(entities::song::Model),
}

impl SongWrite {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Written(_))
    }

    pub fn into_model(self) -> entities::song::Model {
        match self {
            Self::Written(model) | Self::Unchanged(model) => model,
        }
    }
}
