mod config;
mod database;
mod entities;
mod error;
mod logging;
mod ports;
mod services;
#[cfg(test)]
mod test_utils;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{Result, eyre::Context, eyre::eyre};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    database::Database,
    logging::init_tracing,
    services::{
        catalog::{Song, SongSort, SongWrite},
        engine::CollectionEngine,
        source::DirectorySource,
        sync::{PlaylistStatus, SyncEvent},
    },
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The config file to use
    #[arg(short, long, env = "SETLIST_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. `info` or `setlist_sync=debug`
    #[arg(long, default_value = "warn", global = true, env = "LOG_LEVEL")]
    log_level: String,

    /// OTLP/gRPC endpoint to export traces to
    #[arg(long, global = true, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct CollectionArg {
    /// The collection to operate on
    #[arg(short = 'C', long, env = "SETLIST_SYNC_COLLECTION")]
    collection: i64,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Link an external playlist to a collection
    Link {
        #[command(flatten)]
        target: CollectionArg,

        /// Playlist id, share link or URI
        playlist: String,

        /// Sync the playlist right after linking it
        #[arg(long)]
        sync: bool,
    },
    /// Unlink a playlist, flagging songs left in no playlist
    Unlink {
        #[command(flatten)]
        target: CollectionArg,

        playlist: String,
    },
    /// Set the display order of every linked playlist
    Reorder {
        #[command(flatten)]
        target: CollectionArg,

        /// All linked playlists, in the new order
        #[arg(required = true)]
        playlists: Vec<String>,
    },
    /// Sync every linked playlist of a collection
    Sync {
        #[command(flatten)]
        target: CollectionArg,
    },
    /// Sync a single linked playlist
    SyncPlaylist {
        #[command(flatten)]
        target: CollectionArg,

        playlist: String,
    },
    /// List linked playlists
    Links {
        #[command(flatten)]
        target: CollectionArg,
    },
    /// List songs of a collection
    Songs {
        #[command(flatten)]
        target: CollectionArg,

        #[arg(long, value_enum, default_value_t = SortArg::Title)]
        sort: SortArg,

        /// Include songs flagged as removed
        #[arg(long)]
        include_removed: bool,

        /// Group songs by playlist, in playlist order
        #[arg(long, conflicts_with_all = ["sort", "include_removed"])]
        by_playlist: bool,
    },
    /// Restore a song flagged as removed
    Restore { song_id: i64 },
    /// Permanently delete a song flagged as removed
    Delete { song_id: i64 },
    /// Replace the notes of a song
    Notes { song_id: i64, notes: String },
    /// Set custom lyrics for a song
    Lyrics {
        song_id: i64,

        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        /// Read the lyrics from a file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Store the lyrics as looked up rather than customized. Customized
        /// lyrics are kept.
        #[arg(long)]
        fetched: bool,
    },
    /// Set or clear a manual bpm
    Bpm {
        song_id: i64,

        #[arg(conflicts_with = "clear", required_unless_present = "clear")]
        bpm: Option<f64>,

        #[arg(long)]
        clear: bool,

        /// Store the bpm as looked up rather than manual. A manual bpm is kept.
        #[arg(long, conflicts_with = "clear")]
        looked_up: bool,
    },
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Create a default config file, if it doesn't exist
    CreateDefault,
    /// Print the path to the config file
    Path,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SortArg {
    Title,
    Artist,
}

impl From<SortArg> for SongSort {
    fn from(sort: SortArg) -> Self {
        match sort {
            SortArg::Title => SongSort::Title,
            SortArg::Artist => SongSort::Artist,
        }
    }
}

type Engine = CollectionEngine<DirectorySource>;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let tracer_provider = init_tracing(&args.log_level, args.otlp_endpoint.as_deref())?;

    let result = run(args).await;

    if let Some(provider) = tracer_provider {
        provider
            .shutdown()
            .wrap_err("Failed to shut down tracer provider")?;
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let command = match args.command {
        Commands::Config(config_commands) => return config_command(config_commands),
        command => command,
    };

    tracing::debug!("Loading configuration");
    let config = {
        if let Some(config) = &args.config {
            Config::from_file(config)
        } else {
            Config::load()
        }
    }
    .wrap_err("Failed to load setlist-sync config")?;

    let database = Arc::new(Database::open(&config.database_path()).await?);
    let source = Arc::new(DirectorySource::new(config.source_directory()));
    let engine = Engine::new(database, source, &config.sync);

    match command {
        Commands::Link {
            target,
            playlist,
            sync,
        } => {
            let link = engine.link_playlist(target.collection, &playlist).await?;
            tracing::info!(playlist = %link.external_playlist_id, "Linked playlist");
            if sync {
                let report = engine
                    .sync_playlist(target.collection, &link.external_playlist_id)
                    .await?;
                print_json(&report)?;
            } else {
                print_json(&link)?;
            }
        }
        Commands::Unlink { target, playlist } => {
            let outcome = engine.unlink_playlist(target.collection, &playlist).await?;
            print_json(&outcome)?;
        }
        Commands::Reorder { target, playlists } => {
            let links = engine
                .reorder_playlists(target.collection, &playlists)
                .await?;
            print_json(&links)?;
        }
        Commands::Sync { target } => sync_collection(&engine, target.collection).await?,
        Commands::SyncPlaylist { target, playlist } => {
            let report = engine.sync_playlist(target.collection, &playlist).await?;
            print_json(&report)?;
        }
        Commands::Links { target } => {
            print_json(&engine.list_links(target.collection).await?)?;
        }
        Commands::Songs {
            target,
            sort,
            include_removed,
            by_playlist,
        } => {
            if by_playlist {
                print_json(&engine.songs_in_playlist_order(target.collection).await?)?;
            } else {
                let songs = engine
                    .list_songs(target.collection, sort.into(), include_removed)
                    .await?;
                print_json(&songs)?;
            }
        }
        Commands::Restore { song_id } => {
            if !engine.restore_song(song_id).await? {
                tracing::info!(song_id, "Song was not flagged as removed");
            }
            print_json(&engine.get_song(song_id).await?)?;
        }
        Commands::Delete { song_id } => {
            engine.delete_song(song_id).await?;
            println!("Deleted song {song_id}");
        }
        Commands::Notes { song_id, notes } => {
            print_json(&engine.update_notes(song_id, notes).await?)?;
        }
        Commands::Lyrics {
            song_id,
            text,
            file,
            fetched,
        } => {
            let text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(file)) => std::fs::read_to_string(&file)
                    .wrap_err(format!("Failed to read lyrics file: {}", file.display()))?,
                (None, None) => return Err(eyre!("Either --text or --file is required")),
            };
            let song = if fetched {
                written_song(engine.store_fetched_lyrics(song_id, text).await?, "lyrics")
            } else {
                engine.set_custom_lyrics(song_id, text).await?
            };
            print_json(&song)?;
        }
        Commands::Bpm {
            song_id,
            bpm,
            clear,
            looked_up,
        } => {
            let song = match bpm {
                Some(bpm) if looked_up => {
                    written_song(engine.store_looked_up_bpm(song_id, bpm).await?, "bpm")
                }
                Some(bpm) if !clear => engine.set_manual_bpm(song_id, bpm).await?,
                _ => engine.clear_manual_bpm(song_id).await?,
            };
            print_json(&song)?;
        }
        Commands::Config(config_commands) => config_command(config_commands)?,
    }

    Ok(())
}

fn config_command(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::CreateDefault => {
            let path = Config::create_default()?;
            println!("{}", path.display());
        }
        ConfigCommands::Path => match Config::config_path() {
            Some(path) => println!("{}", path.display()),
            None => println!("No default config path found"),
        },
    }
    Ok(())
}

/// Syncs a collection, cancelling on Ctrl-C. Merges already in progress finish.
async fn sync_collection(engine: &Engine, collection_id: i64) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing playlists already merging");
                cancel.cancel();
            }
        })
    };

    let (events, mut progress) = mpsc::channel(16);
    let printer = tokio::spawn(async move {
        while let Some(event) = progress.recv().await {
            match event {
                SyncEvent::Started { playlists, .. } => {
                    eprintln!("Syncing {playlists} playlists");
                }
                SyncEvent::PlaylistFinished(report) => match report.status {
                    PlaylistStatus::Synced => eprintln!(
                        "  {}: +{} ~{} -{}",
                        report.playlist_id, report.added, report.updated, report.pruned
                    ),
                    PlaylistStatus::Failed { error } => {
                        eprintln!("  {}: failed: {error}", report.playlist_id)
                    }
                },
                SyncEvent::Completed(_) => {}
            }
        }
    });

    let report = engine
        .sync_collection(collection_id, &cancel, Some(events))
        .await;
    ctrl_c.abort();
    printer.await.wrap_err("Progress printer panicked")?;

    let report = report?;
    if report.totals.is_quiet() {
        eprintln!("Nothing changed");
    }
    print_json(&report)
}

fn written_song(write: SongWrite, field: &str) -> Song {
    let changed = write.changed();
    let song = Song::from(write.into_model());
    if !changed {
        eprintln!("Song {} kept its {field}", song.id);
    }
    song
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).wrap_err("Failed to serialize output")?;
    println!("{json}");
    Ok(())
}
