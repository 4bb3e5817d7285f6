use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveModelBehavior, ActiveValue::Set};
use serde::{Deserialize, Serialize};

/// Positions of a song in each linked playlist it currently belongs to,
/// keyed by external playlist id.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct Membership(pub BTreeMap<String, i32>);

impl Membership {
    pub fn single(playlist_id: &str, position: i32) -> Self {
        Self(BTreeMap::from([(playlist_id.to_string(), position)]))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn position(&self, playlist_id: &str) -> Option<i32> {
        self.0.get(playlist_id).copied()
    }

    pub fn contains(&self, playlist_id: &str) -> bool {
        self.0.contains_key(playlist_id)
    }
}

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "song")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub collection_id: i64,
    pub external_track_id: String,

    pub title: String,
    pub artist: String,
    pub album: String,
    pub art_url: Option<String>,
    pub external_uri: String,
    pub duration_ms: i64,

    pub membership: Membership,

    pub lyrics_text: String,
    /// False until the lyrics collaborator has stored text for this song.
    pub lyrics_fetched: bool,
    pub lyrics_customized: bool,
    pub notes: String,
    pub bpm: Option<f64>,
    pub bpm_manual: bool,

    pub removed: bool,
    pub removed_at: Option<DateTime<Utc>>,

    /// Optimistic concurrency counter, bumped by every write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            membership: Set(Membership::default()),
            lyrics_text: Set(String::new()),
            lyrics_fetched: Set(false),
            lyrics_customized: Set(false),
            notes: Set(String::new()),
            bpm: Set(None),
            bpm_manual: Set(false),
            removed: Set(false),
            removed_at: Set(None),
            version: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..ActiveModelTrait::default()
        }
    }

    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, sea_orm::DbErr>
    where
        C: ConnectionTrait,
    {
        if !insert {
            self.updated_at = Set(Utc::now());
        }
        Ok(self)
    }
}
