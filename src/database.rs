use std::path::Path;
use std::time::Duration;

use color_eyre::{Result, eyre::Context};
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, ConnectionTrait, Database as SeaDatabase, DatabaseConnection};

pub struct Database {
    pub conn: DatabaseConnection,
}

impl Database {
    /// Open or create the catalog database at the given path and bring its schema up to date.
    pub async fn open(path: &Path) -> Result<Self> {
        tracing::debug!("Opening database at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context(format!(
                "Failed to create database directory: {}",
                parent.display()
            ))?;
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());

        let mut opt = ConnectOptions::new(url);
        opt.max_connections(8)
            .min_connections(1)
            .connect_timeout(Duration::from_secs(8))
            .acquire_timeout(Duration::from_secs(8))
            .sqlx_logging(false);

        let conn = SeaDatabase::connect(opt)
            .await
            .context(format!("Failed to open database: {}", path.display()))?;

        Self::prepare(conn).await
    }

    /// Wraps an existing connection, enabling foreign keys and running migrations.
    pub async fn prepare(conn: DatabaseConnection) -> Result<Self> {
        conn.execute_unprepared("PRAGMA foreign_keys = ON")
            .await
            .context("Failed to enable foreign keys")?;

        tracing::debug!("Running database migrations");
        migration::Migrator::up(&conn, None)
            .await
            .context("Failed to run database migrations")?;

        tracing::info!("Database ready");
        Ok(Database { conn })
    }
}
