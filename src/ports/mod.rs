pub mod playlist_source;
