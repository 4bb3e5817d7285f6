use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sea_orm::{ConnectOptions, ConnectionTrait, Database as SeaDatabase};

use crate::database::Database;
use crate::error::SourceError;
use crate::ports::playlist_source::{PlaylistMetadata, PlaylistSource, TrackRef};

pub async fn test_db() -> Arc<Database> {
    // A single connection keeps every query on the same in-memory database.
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1).min_connections(1).sqlx_logging(false);
    let conn = SeaDatabase::connect(opt).await.unwrap();

    Arc::new(Database::prepare(conn).await.unwrap())
}

/// Makes every update of the song a silent no-op, so each versioned write to
/// it comes back as a conflict until [`unpin_song`] is called.
pub async fn pin_song(db: &Database, song_id: i64) {
    db.conn
        .execute_unprepared(&format!(
            "CREATE TRIGGER pin_song_{song_id} BEFORE UPDATE ON song \
             WHEN OLD.id = {song_id} BEGIN SELECT RAISE(IGNORE); END"
        ))
        .await
        .unwrap();
}

pub async fn unpin_song(db: &Database, song_id: i64) {
    db.conn
        .execute_unprepared(&format!("DROP TRIGGER pin_song_{song_id}"))
        .await
        .unwrap();
}

pub fn track(id: &str, title: &str, artist: &str) -> TrackRef {
    TrackRef {
        external_track_id: id.to_string(),
        title: title.to_string(),
        artist: artist.to_string(),
        album: format!("{title} (album)"),
        art_url: Some(format!("https://img.example/{id}.jpg")),
        uri: format!("spotify:track:{id}"),
        duration_ms: 180_000,
    }
}

/// Source whose playlists can be swapped between syncs.
#[derive(Default)]
pub struct FakeSource {
    playlists: Mutex<HashMap<String, Result<Vec<TrackRef>, SourceError>>>,
    fetches: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tracks(&self, playlist_id: &str, tracks: Vec<TrackRef>) {
        self.playlists
            .lock()
            .unwrap()
            .insert(playlist_id.to_string(), Ok(tracks));
    }

    pub fn set_failure(&self, playlist_id: &str, error: SourceError) {
        self.playlists
            .lock()
            .unwrap()
            .insert(playlist_id.to_string(), Err(error));
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl PlaylistSource for FakeSource {
    async fn fetch_tracks(&self, playlist_id: &str) -> Result<Vec<TrackRef>, SourceError> {
        self.fetches.lock().unwrap().push(playlist_id.to_string());
        self.playlists
            .lock()
            .unwrap()
            .get(playlist_id)
            .cloned()
            .unwrap_or_else(|| Err(SourceError::NotFound(playlist_id.to_string())))
    }

    async fn fetch_metadata(&self, playlist_id: &str) -> Result<PlaylistMetadata, SourceError> {
        let tracks = self.playlists.lock().unwrap().get(playlist_id).cloned();
        match tracks {
            Some(Ok(_)) => Ok(PlaylistMetadata {
                name: format!("Playlist {playlist_id}"),
                owner: "band".to_string(),
                art_url: None,
            }),
            Some(Err(e)) => Err(e),
            None => Err(SourceError::NotFound(playlist_id.to_string())),
        }
    }
}
