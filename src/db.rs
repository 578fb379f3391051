use anyhow::Context;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use tracing::info;

use crate::models::{ManifestEntry, Stage, TagSet};

pub type Db = SqlitePool;

pub async fn connect(manifest_path: &str) -> anyhow::Result<Db> {
    // Ensure the data directory exists
    if let Some(parent) = std::path::Path::new(manifest_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create manifest dir {parent:?}"))?;
    }

    let url = format!("sqlite://{manifest_path}?mode=rwc");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&url)
        .await
        .with_context(|| format!("open manifest at {manifest_path}"))?;

    run_migrations(&pool).await?;

    info!("Manifest ready at {manifest_path}");
    Ok(pool)
}

async fn run_migrations(pool: &Db) -> anyhow::Result<()> {
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(pool)
        .await
        .context("set WAL mode")?;

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("run migrations")?;

    Ok(())
}

pub async fn get(db: &Db, episode_key: &str) -> sqlx::Result<Option<ManifestEntry>> {
    sqlx::query_as("SELECT * FROM manifest WHERE episode_key = ?")
        .bind(episode_key)
        .fetch_optional(db)
        .await
}

/// A complete container is on disk.
pub async fn record_download(
    db: &Db,
    episode_key: &str,
    url: &str,
    container_size: u64,
) -> sqlx::Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO manifest (episode_key, url, stage, container_size, updated_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(episode_key) DO UPDATE SET url=excluded.url, stage=excluded.stage, \
         container_size=excluded.container_size, audio_size=NULL, audio_sha256=NULL, \
         updated_at=excluded.updated_at",
    )
    .bind(episode_key)
    .bind(url)
    .bind(Stage::Downloaded.to_string())
    .bind(container_size as i64)
    .bind(&now)
    .execute(db)
    .await?;
    Ok(())
}

/// The audio artifact exists but carries no tags yet.
pub async fn record_extraction(
    db: &Db,
    episode_key: &str,
    url: &str,
    audio_size: u64,
) -> sqlx::Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO manifest (episode_key, url, stage, audio_size, updated_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(episode_key) DO UPDATE SET stage=excluded.stage, \
         audio_size=excluded.audio_size, audio_sha256=NULL, updated_at=excluded.updated_at",
    )
    .bind(episode_key)
    .bind(url)
    .bind(Stage::Extracted.to_string())
    .bind(audio_size as i64)
    .bind(&now)
    .execute(db)
    .await?;
    Ok(())
}

/// The artifact is final: tagged, with size and checksum of the tagged file.
pub async fn record_tagged(
    db: &Db,
    episode_key: &str,
    url: &str,
    audio_size: u64,
    audio_sha256: &str,
    tags: &TagSet,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let tags = serde_json::to_string(tags).context("serialize tags")?;
    sqlx::query(
        "INSERT INTO manifest (episode_key, url, stage, audio_size, audio_sha256, tags, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(episode_key) DO UPDATE SET stage=excluded.stage, \
         audio_size=excluded.audio_size, audio_sha256=excluded.audio_sha256, \
         tags=excluded.tags, updated_at=excluded.updated_at",
    )
    .bind(episode_key)
    .bind(url)
    .bind(Stage::Tagged.to_string())
    .bind(audio_size as i64)
    .bind(audio_sha256)
    .bind(&tags)
    .bind(&now)
    .execute(db)
    .await
    .context("record tagged episode")?;
    Ok(())
}

/// Forget an episode, e.g. after its stale container was discarded.
pub async fn remove(db: &Db, episode_key: &str) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM manifest WHERE episode_key = ?")
        .bind(episode_key)
        .execute(db)
        .await?;
    Ok(())
}
