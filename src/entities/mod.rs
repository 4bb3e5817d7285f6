pub mod playlist_link;
pub mod song;
