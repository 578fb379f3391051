use std::{cell::OnceCell, collections::HashSet, fmt};

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ── Broadcast date ────────────────────────────────────────────────────────────

/// Calendar date an episode aired. The only externally known anchor for
/// locating its archive file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BroadcastDate(NaiveDate);

impl BroadcastDate {
    pub const FORMAT: &'static str = "%d.%m.%Y";

    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Pick the first `dd.mm.yyyy` out of free page text.
    pub fn from_display_text(text: &str) -> Option<Self> {
        static RE_DATE: once_cell::sync::Lazy<Regex> =
            once_cell::sync::Lazy::new(|| Regex::new(r"\b(\d{1,2}\.\d{1,2}\.\d{4})\b").unwrap());
        let caps = RE_DATE.captures(text)?;
        NaiveDate::parse_from_str(&caps[1], Self::FORMAT)
            .ok()
            .map(Self)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for BroadcastDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

// ── Episode record ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub broadcast_date: BroadcastDate,
    /// 1-based position in the scan. Only meaningful within one scan.
    pub episode_index: usize,
    pub synopsis: String,
    pub guest_text: String,
    pub guest_names: Vec<String>,
    resolved_url: OnceCell<String>,
}

impl EpisodeRecord {
    pub fn new(
        broadcast_date: BroadcastDate,
        episode_index: usize,
        synopsis: String,
        guest_text: String,
    ) -> Self {
        let guest_names = extract_guest_names(&guest_text);
        Self {
            broadcast_date,
            episode_index,
            synopsis,
            guest_text,
            guest_names,
            resolved_url: OnceCell::new(),
        }
    }

    pub fn resolved_url(&self) -> Option<&str> {
        self.resolved_url.get().map(String::as_str)
    }

    /// Store the archive URL. Returns `false` (and keeps the first URL) if one
    /// was already set.
    pub fn set_resolved_url(&self, url: String) -> bool {
        self.resolved_url.set(url).is_ok()
    }
}

/// Guest entries are lines of the form `Name, description`. Lines without a
/// comma (headings, blank lines) are not guests.
pub fn extract_guest_names(guest_text: &str) -> Vec<String> {
    guest_text
        .lines()
        .filter_map(|line| line.split_once(','))
        .map(|(name, _)| name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Scan result in tile order, unique by broadcast date.
#[derive(Debug, Default)]
pub struct EpisodeStore {
    records: Vec<EpisodeRecord>,
    dates: HashSet<BroadcastDate>,
}

impl EpisodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` and drops the record if its date is already present.
    pub fn insert(&mut self, record: EpisodeRecord) -> bool {
        if !self.dates.insert(record.broadcast_date) {
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EpisodeRecord> {
        self.records.iter()
    }
}

// ── Manifest ─────────────────────────────────────────────────────────────────

/// How far an episode got through the pipeline, as recorded in the manifest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Downloaded,
    Extracted,
    Tagged,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Downloaded => "downloaded",
            Stage::Extracted => "extracted",
            Stage::Tagged => "tagged",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Stage {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "downloaded" => Ok(Stage::Downloaded),
            "extracted" => Ok(Stage::Extracted),
            "tagged" => Ok(Stage::Tagged),
            other => Err(anyhow::anyhow!("unknown stage: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ManifestEntry {
    pub episode_key: String,
    pub url: String,
    pub stage: String,
    pub container_size: Option<i64>,
    pub audio_size: Option<i64>,
    pub audio_sha256: Option<String>,
    pub tags: String, // JSON blob
    pub updated_at: String,
}

impl ManifestEntry {
    pub fn stage(&self) -> Option<Stage> {
        self.stage.parse().ok()
    }
}

/// The three tag values written into every artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    pub artist: String,
    pub album: String,
    pub title: String,
}
