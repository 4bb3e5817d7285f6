//! Pure planning of song writes. Nothing here touches the database; each
//! function returns the patch to apply, or `None` when the row is already
//! current.

use chrono::Utc;
use sea_orm::{ActiveModelBehavior, Set};

use crate::entities::song::{self, Membership};
use crate::ports::playlist_source::TrackRef;

/// New song for a track seen for the first time in `playlist_id`.
pub(crate) fn seed_song(
    collection_id: i64,
    playlist_id: &str,
    position: i32,
    track: &TrackRef,
) -> song::ActiveModel {
    song::ActiveModel {
        collection_id: Set(collection_id),
        external_track_id: Set(track.external_track_id.clone()),
        title: Set(track.title.clone()),
        artist: Set(track.artist.clone()),
        album: Set(track.album.clone()),
        art_url: Set(track.art_url.clone()),
        external_uri: Set(track.uri.clone()),
        duration_ms: Set(track.duration_ms),
        membership: Set(Membership::single(playlist_id, position)),
        ..song::ActiveModel::new()
    }
}

/// Applies a freshly fetched track to an existing song.
///
/// Cached metadata always follows the source. When title or artist change,
/// lyrics and bpm that were not set by the user are reset so they get looked
/// up again for the new identity.
pub(crate) fn merge_track(
    current: &song::Model,
    playlist_id: &str,
    position: i32,
    track: &TrackRef,
) -> Option<song::ActiveModel> {
    let identity_changed = current.title != track.title || current.artist != track.artist;
    let metadata_changed = identity_changed
        || current.album != track.album
        || current.art_url != track.art_url
        || current.external_uri != track.uri
        || current.duration_ms != track.duration_ms;
    let position_changed = current.membership.position(playlist_id) != Some(position);

    if !metadata_changed && !position_changed {
        return None;
    }

    let mut patch: song::ActiveModel = current.clone().into();

    if metadata_changed {
        patch.title = Set(track.title.clone());
        patch.artist = Set(track.artist.clone());
        patch.album = Set(track.album.clone());
        patch.art_url = Set(track.art_url.clone());
        patch.external_uri = Set(track.uri.clone());
        patch.duration_ms = Set(track.duration_ms);
    }

    if position_changed {
        let mut membership = current.membership.clone();
        membership.0.insert(playlist_id.to_string(), position);
        patch.membership = Set(membership);
    }

    if identity_changed {
        if !current.lyrics_customized && (current.lyrics_fetched || !current.lyrics_text.is_empty())
        {
            patch.lyrics_text = Set(String::new());
            patch.lyrics_fetched = Set(false);
        }
        if !current.bpm_manual && current.bpm.is_some() {
            patch.bpm = Set(None);
        }
    }

    Some(patch)
}

/// Drops the given playlists from a song's membership.
pub(crate) fn drop_playlists(current: &song::Model, playlist_ids: &[&str]) -> Option<song::ActiveModel> {
    if !playlist_ids.iter().any(|p| current.membership.contains(p)) {
        return None;
    }

    let mut membership = current.membership.clone();
    membership.0.retain(|p, _| !playlist_ids.contains(&p.as_str()));

    let mut patch: song::ActiveModel = current.clone().into();
    patch.membership = Set(membership);
    Some(patch)
}

/// Flags a song whose membership is empty. Re-checked against the row being
/// written so a concurrent re-add keeps the song active.
pub(crate) fn flag_if_orphaned(current: &song::Model) -> Option<song::ActiveModel> {
    if current.removed || !current.membership.is_empty() {
        return None;
    }
    Some(flag(current))
}

fn flag(current: &song::Model) -> song::ActiveModel {
    let mut patch: song::ActiveModel = current.clone().into();
    patch.removed = Set(true);
    patch.removed_at = Set(Some(Utc::now()));
    patch
}

pub(crate) fn unflag(current: &song::Model) -> Option<song::ActiveModel> {
    if !current.removed {
        return None;
    }
    let mut patch: song::ActiveModel = current.clone().into();
    patch.removed = Set(false);
    patch.removed_at = Set(None);
    Some(patch)
}

/// Clears the removal flag of a song that is back in some playlist.
pub(crate) fn unflag_if_reappeared(current: &song::Model) -> Option<song::ActiveModel> {
    if current.membership.is_empty() {
        return None;
    }
    unflag(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::track;
    use sea_orm::ActiveValue;

    fn stored(track: &TrackRef, playlist_id: &str, position: i32) -> song::Model {
        let now = Utc::now();
        song::Model {
            id: 1,
            collection_id: 1,
            external_track_id: track.external_track_id.clone(),
            title: track.title.clone(),
            artist: track.artist.clone(),
            album: track.album.clone(),
            art_url: track.art_url.clone(),
            external_uri: track.uri.clone(),
            duration_ms: track.duration_ms,
            membership: Membership::single(playlist_id, position),
            lyrics_text: "la la".into(),
            lyrics_fetched: true,
            lyrics_customized: false,
            notes: "capo 2".into(),
            bpm: Some(120.0),
            bpm_manual: false,
            removed: false,
            removed_at: None,
            version: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_merge_track_unchanged_returns_none() {
        let t = track("a", "Song A", "Artist");
        let current = stored(&t, "p1", 0);

        assert!(merge_track(&current, "p1", 0, &t).is_none());
    }

    #[test]
    fn test_merge_track_new_position_keeps_other_playlists() {
        let t = track("a", "Song A", "Artist");
        let mut current = stored(&t, "p1", 0);
        current.membership.0.insert("p2".into(), 4);

        let patch = merge_track(&current, "p1", 2, &t).unwrap();

        let ActiveValue::Set(membership) = patch.membership else {
            panic!("membership not set");
        };
        assert_eq!(membership.position("p1"), Some(2));
        assert_eq!(membership.position("p2"), Some(4));
        assert!(!patch.lyrics_text.is_set());
        assert!(!patch.bpm.is_set());
    }

    #[test]
    fn test_merge_track_title_change_resets_looked_up_content() {
        let t = track("a", "Song A", "Artist");
        let current = stored(&t, "p1", 0);
        let renamed = track("a", "Song A (Live)", "Artist");

        let patch = merge_track(&current, "p1", 0, &renamed).unwrap();

        assert_eq!(patch.title, ActiveValue::Set("Song A (Live)".to_string()));
        assert_eq!(patch.lyrics_text, ActiveValue::Set(String::new()));
        assert_eq!(patch.lyrics_fetched, ActiveValue::Set(false));
        assert_eq!(patch.bpm, ActiveValue::Set(None));
        assert!(!patch.notes.is_set());
    }

    #[test]
    fn test_merge_track_title_change_keeps_customized_content() {
        let t = track("a", "Song A", "Artist");
        let mut current = stored(&t, "p1", 0);
        current.lyrics_customized = true;
        current.bpm_manual = true;
        let renamed = track("a", "Song A", "Other Artist");

        let patch = merge_track(&current, "p1", 0, &renamed).unwrap();

        assert_eq!(patch.artist, ActiveValue::Set("Other Artist".to_string()));
        assert!(!patch.lyrics_text.is_set());
        assert!(!patch.lyrics_fetched.is_set());
        assert!(!patch.bpm.is_set());
    }

    #[test]
    fn test_merge_track_album_change_keeps_lyrics() {
        let t = track("a", "Song A", "Artist");
        let current = stored(&t, "p1", 0);
        let mut changed = t.clone();
        changed.album = "Deluxe".into();

        let patch = merge_track(&current, "p1", 0, &changed).unwrap();

        assert_eq!(patch.album, ActiveValue::Set("Deluxe".to_string()));
        assert!(!patch.lyrics_text.is_set());
        assert!(!patch.bpm.is_set());
    }

    #[test]
    fn test_drop_playlists_only_when_present() {
        let t = track("a", "Song A", "Artist");
        let mut current = stored(&t, "p1", 0);
        current.membership.0.insert("p2".into(), 3);

        assert!(drop_playlists(&current, &["p9"]).is_none());
        let patch = drop_playlists(&current, &["p1", "p9"]).unwrap();
        assert_eq!(patch.membership, ActiveValue::Set(Membership::single("p2", 3)));
        let patch = drop_playlists(&current, &["p1", "p2"]).unwrap();
        assert_eq!(patch.membership, ActiveValue::Set(Membership::default()));
    }

    #[test]
    fn test_flag_if_orphaned() {
        let t = track("a", "Song A", "Artist");
        let mut current = stored(&t, "p1", 0);
        assert!(flag_if_orphaned(&current).is_none());

        current.membership = Membership::default();
        let patch = flag_if_orphaned(&current).unwrap();
        assert_eq!(patch.removed, ActiveValue::Set(true));
        assert!(matches!(patch.removed_at, ActiveValue::Set(Some(_))));

        current.removed = true;
        assert!(flag_if_orphaned(&current).is_none());
    }

    #[test]
    fn test_unflag_if_reappeared() {
        let t = track("a", "Song A", "Artist");
        let mut current = stored(&t, "p1", 0);
        assert!(unflag_if_reappeared(&current).is_none());

        current.removed = true;
        current.removed_at = Some(Utc::now());
        let patch = unflag_if_reappeared(&current).unwrap();
        assert_eq!(patch.removed, ActiveValue::Set(false));
        assert_eq!(patch.removed_at, ActiveValue::Set(None));

        current.membership = Membership::default();
        assert!(unflag_if_reappeared(&current).is_none());
    }
}
