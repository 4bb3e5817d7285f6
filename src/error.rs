use std::time::Duration;

use sea_orm::DbErr;

/// Failure reported by a [`crate::ports::playlist_source::PlaylistSource`].
///
/// None of these ever mean "the tracks are gone": they are isolated to the
/// playlist being fetched and leave its stored membership untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("playlist source unavailable: {0}")]
    Unavailable(String),
    #[error("playlist {0} not found at source")]
    NotFound(String),
    #[error("rate limited by playlist source, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::RateLimited { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("song {song} was modified concurrently")]
    WriteConflict { song: String },
    #[error("gave up writing song {song} after repeated concurrent modifications")]
    FinalConflict { song: String },
    #[error("playlist {playlist_id} is already linked to collection {collection_id}")]
    AlreadyLinked {
        collection_id: i64,
        playlist_id: String,
    },
    #[error("playlist {playlist_id} is not linked to collection {collection_id}")]
    NotLinked {
        collection_id: i64,
        playlist_id: String,
    },
    #[error("invalid playlist order for collection {collection_id}: {reason}")]
    InvalidOrder { collection_id: i64, reason: String },
    #[error("song {0} is not flagged as removed")]
    NotRemoved(i64),
    #[error("song {0} not found")]
    SongNotFound(i64),
    #[error("not a playlist id or link: {0}")]
    InvalidPlaylistRef(String),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl EngineError {
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }

    /// Converts an exhausted [`EngineError::WriteConflict`] into its final form.
    pub(crate) fn exhausted(self) -> Self {
        match self {
            Self::WriteConflict { song } => Self::FinalConflict { song },
            other => other,
        }
    }
}
