//! Episode acquisition: container download → audio extraction → tagging.
//!
//! Progress is inferred from what is on disk, cross-checked against the
//! manifest, so a rerun picks up where the last one stopped. Downloads and
//! extractions are written under a `.part` name and renamed when complete,
//! which means a file at a canonical path is always a finished one.
use std::path::{Path, PathBuf};

use anyhow::Context;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{error, info, warn};

use crate::{
    db::{self, Db},
    error::{AppError, Result},
    models::{BroadcastDate, EpisodeRecord, ManifestEntry, Stage},
    tags::{self, TagWriter},
    transcode::Transcoder,
};

/// Write buffer for container downloads.
const CHUNK_SIZE: usize = 8192;

// ── Canonical paths ───────────────────────────────────────────────────────────

/// Where an episode's files live. Derived only from the show prefix and the
/// broadcast date, so reruns target the same files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodePaths {
    /// `<ShowPrefix>_vom_<date>`; also the manifest key.
    pub key: String,
    pub container: PathBuf,
    pub audio: PathBuf,
}

impl EpisodePaths {
    pub fn new(output_dir: &Path, show_prefix: &str, date: BroadcastDate) -> Self {
        let key = format!("{show_prefix}_vom_{date}");
        Self {
            container: output_dir.join(format!("{key}f.webm")),
            audio: output_dir.join(format!("{key}.mp3")),
            key,
        }
    }

    pub fn container_part(&self) -> PathBuf {
        part_path(&self.container)
    }

    pub fn audio_part(&self) -> PathBuf {
        part_path(&self.audio)
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

// ── State inference ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeState {
    /// Tagged artifact exists. Nothing to do.
    Final,
    /// Audio exists but tagging never completed. Re-tag only, and drop any
    /// container left behind.
    Untagged,
    /// A complete container exists. Skip the download.
    ContainerPresent,
    /// A container exists but does not match what the manifest recorded.
    StaleContainer,
    /// Nothing usable on disk.
    Fresh,
}

/// Decide the state from file facts and the manifest row, if any.
pub fn classify(
    audio_exists: bool,
    container_len: Option<u64>,
    entry: Option<&ManifestEntry>,
) -> EpisodeState {
    let stage = entry.and_then(ManifestEntry::stage);

    if audio_exists {
        // A `downloaded` row next to audio means the run stopped between the
        // audio rename and the manifest update.
        return match stage {
            Some(Stage::Downloaded | Stage::Extracted) => EpisodeState::Untagged,
            _ => EpisodeState::Final,
        };
    }

    match (container_len, entry) {
        (None, _) => EpisodeState::Fresh,
        (Some(len), Some(entry)) if stage == Some(Stage::Downloaded) => {
            match entry.container_size {
                Some(recorded) if recorded as u64 != len => EpisodeState::StaleContainer,
                _ => EpisodeState::ContainerPresent,
            }
        }
        (Some(_), _) => EpisodeState::ContainerPresent,
    }
}

async fn inspect(paths: &EpisodePaths, entry: Option<&ManifestEntry>) -> EpisodeState {
    let audio_exists = tokio::fs::try_exists(&paths.audio).await.unwrap_or(false);
    let container_len = tokio::fs::metadata(&paths.container)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len());
    classify(audio_exists, container_len, entry)
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A new tagged artifact was produced.
    Acquired(PathBuf),
    /// Audio was already there and only needed its tags.
    Retagged(PathBuf),
    /// The artifact already existed; nothing was done.
    AlreadyPresent(PathBuf),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub acquired: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct Pipeline<T, W> {
    pub client: reqwest::Client,
    pub db: Db,
    pub transcoder: T,
    pub tag_writer: W,
    pub output_dir: PathBuf,
    pub show_prefix: String,
    pub show_title: String,
}

impl<T, W> Pipeline<T, W>
where
    T: Transcoder,
    W: TagWriter + Clone + Send + 'static,
{
    pub fn paths_for(&self, date: BroadcastDate) -> EpisodePaths {
        EpisodePaths::new(&self.output_dir, &self.show_prefix, date)
    }

    /// Bring one episode to its final tagged state.
    pub async fn acquire(&self, record: &EpisodeRecord, url: &str) -> Result<Outcome> {
        let date = record.broadcast_date;
        let paths = self.paths_for(date);
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let entry = db::get(&self.db, &paths.key).await?;
        match inspect(&paths, entry.as_ref()).await {
            EpisodeState::Final => {
                info!("The episode of the {date} has already been downloaded and converted to mp3.");
                return Ok(Outcome::AlreadyPresent(paths.audio));
            }
            EpisodeState::Untagged => {
                info!("Audio for {date} exists but was never tagged");
                if tokio::fs::try_exists(&paths.container).await? {
                    tokio::fs::remove_file(&paths.container).await?;
                    info!("Leftover webm file for {date} removed.");
                }
                self.tag(record, &paths, url).await?;
                return Ok(Outcome::Retagged(paths.audio));
            }
            EpisodeState::ContainerPresent => {
                info!("Webm video file for {date} already exists.");
            }
            EpisodeState::StaleContainer => {
                warn!("Webm video file for {date} does not match the manifest, downloading again");
                tokio::fs::remove_file(&paths.container).await?;
                db::remove(&self.db, &paths.key).await?;
                self.download(url, &paths).await?;
            }
            EpisodeState::Fresh => {
                self.download(url, &paths).await?;
            }
        }

        self.extract(&paths, url).await?;
        self.tag(record, &paths, url).await?;
        Ok(Outcome::Acquired(paths.audio))
    }

    /// Fresh → ContainerPresent.
    async fn download(&self, url: &str, paths: &EpisodePaths) -> Result<()> {
        info!("Requesting {url}");
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(AppError::TransferFailed {
                status: resp.status(),
            });
        }

        info!("Downloading {}", paths.container.display());
        let part = paths.container_part();
        let expected = resp.content_length();
        let received = match stream_to_file(resp, &part).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        if let Some(expected) = expected {
            if received != expected {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(AppError::Incomplete { expected, received });
            }
        }

        tokio::fs::rename(&part, &paths.container).await?;
        db::record_download(&self.db, &paths.key, url, received).await?;
        info!("Webm video file downloaded successfully ({received} bytes).");
        Ok(())
    }

    /// ContainerPresent → Extracted, then drop the container.
    async fn extract(&self, paths: &EpisodePaths, url: &str) -> Result<()> {
        info!("Converting {} to mp3", paths.container.display());
        let part = paths.audio_part();
        if let Err(e) = self.transcoder.extract_audio(&paths.container, &part).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
        tokio::fs::rename(&part, &paths.audio).await?;

        let audio_size = tokio::fs::metadata(&paths.audio).await?.len();
        db::record_extraction(&self.db, &paths.key, url, audio_size).await?;

        // No way back from here: a failed tag step has to be retried from the
        // audio, the container is gone.
        tokio::fs::remove_file(&paths.container).await?;
        info!("Conversion to mp3 completed, webm file removed.");
        Ok(())
    }

    /// Extracted → Final.
    async fn tag(&self, record: &EpisodeRecord, paths: &EpisodePaths, url: &str) -> Result<()> {
        info!("Adding metadata to {}", paths.audio.display());
        let tags = tags::tag_set(record, &self.show_title);
        tokio::task::spawn_blocking({
            let writer = self.tag_writer.clone();
            let audio = paths.audio.clone();
            let tags = tags.clone();
            move || writer.write(&audio, &tags)
        })
        .await
        .context("tag writer task")??;

        let (audio_size, digest) = sha256_file(&paths.audio).await?;
        db::record_tagged(&self.db, &paths.key, url, audio_size, &digest, &tags).await?;
        info!("Metadata added successfully.");
        Ok(())
    }

    /// Acquire each episode in order. A failure is logged against its date and
    /// the batch moves on.
    pub async fn run_batch(&self, episodes: &[(&EpisodeRecord, String)]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let total = episodes.len();
        info!(
            "Downloaded mp3 files will be saved under {}",
            self.output_dir.display()
        );

        for (i, (record, url)) in episodes.iter().enumerate() {
            info!("Episode {}/{total}: {}", i + 1, record.broadcast_date);
            match self.acquire(record, url).await {
                Ok(Outcome::AlreadyPresent(_)) => summary.skipped += 1,
                Ok(Outcome::Acquired(_) | Outcome::Retagged(_)) => summary.acquired += 1,
                Err(e) => {
                    error!("Failed to process the episode of the {}: {e}", record.broadcast_date);
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

async fn stream_to_file(resp: reqwest::Response, path: &Path) -> Result<u64> {
    let file = tokio::fs::File::create(path).await?;
    let mut writer = BufWriter::with_capacity(CHUNK_SIZE, file);
    let mut stream = resp.bytes_stream();
    let mut received: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        received += chunk.len() as u64;
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(received)
}

async fn sha256_file(path: &Path) -> Result<(u64, String)> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size: u64 = 0;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, hex::encode(hasher.finalize())))
}
