use anyhow::Context;
use serde::Deserialize;

use crate::resolver::SearchWindow;

/// Application configuration, loaded from environment variables / .env.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Page of the show in the Mediathek. The scan starts here and the file
    /// names and album tag are derived from its last path segment.
    #[serde(default = "default_show_url")]
    pub show_url: String,

    /// Scheme and host of the archive CDN.
    #[serde(default = "default_archive_base")]
    pub archive_base: String,

    /// Broadcaster segment of the archive path.
    #[serde(default = "default_archive_service")]
    pub archive_service: String,

    /// Short show code used in archive file names (`..._sendung_<code>_...`).
    #[serde(default = "default_archive_show_code")]
    pub archive_show_code: String,

    /// Directory where containers and finished MP3 files are stored.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Path to the SQLite manifest file.
    #[serde(default = "default_manifest_path")]
    pub manifest_path: String,

    /// Path to the ffmpeg binary.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// MP3 bitrate handed to ffmpeg (`-b:a`).
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,

    /// Timeout for a single archive probe and for the container request.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    /// Timeout for show and episode page requests.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Number of candidates probed per broadcast date.
    #[serde(default = "default_window_steps")]
    pub window_steps: u32,

    /// Distance in minutes between two candidates.
    #[serde(default = "default_window_step_minutes")]
    pub window_step_minutes: i64,

    /// Stop scanning the listing after this many tiles.
    #[serde(default = "default_max_episodes")]
    pub max_episodes: usize,

    /// Optional HTTP proxy for every request.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Emit log lines as JSON instead of the human-readable format.
    #[serde(default)]
    pub log_json: bool,
}

fn default_show_url() -> String {
    "https://www.zdf.de/gesellschaft/markus-lanz".to_string()
}
fn default_archive_base() -> String {
    "https://nrodlzdf-a.akamaihd.net".to_string()
}
fn default_archive_service() -> String {
    "zdf".to_string()
}
fn default_archive_show_code() -> String {
    "mla".to_string()
}
fn default_output_dir() -> String {
    "episodes".to_string()
}
fn default_manifest_path() -> String {
    "episodes/manifest.db".to_string()
}
fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}
fn default_audio_bitrate() -> String {
    "128k".to_string()
}
fn default_probe_timeout_secs() -> u64 {
    10
}
fn default_request_timeout_secs() -> u64 {
    20
}
fn default_window_steps() -> u32 {
    SearchWindow::DEFAULT.steps
}
fn default_window_step_minutes() -> i64 {
    SearchWindow::DEFAULT.step_minutes
}
fn default_max_episodes() -> usize {
    9
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env if present
        let _ = dotenvy::dotenv();

        let config =
            envy::from_env::<AppConfig>().context("Failed to load config from environment")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject window settings that cannot describe a backward search.
    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.window_steps > 0, "WINDOW_STEPS must be at least 1");
        anyhow::ensure!(
            self.window_step_minutes > 0,
            "WINDOW_STEP_MINUTES must be positive, got {}",
            self.window_step_minutes
        );
        Ok(())
    }

    /// Last path segment of the show URL, e.g. `markus-lanz`.
    pub fn show_slug(&self) -> &str {
        self.show_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }

    /// File name prefix, e.g. `Markus_Lanz`.
    pub fn show_prefix(&self) -> String {
        title_case_words(self.show_slug()).join("_")
    }

    /// Album tag, e.g. `Markus Lanz`.
    pub fn show_title(&self) -> String {
        title_case_words(self.show_slug()).join(" ")
    }

    pub fn search_window(&self) -> SearchWindow {
        SearchWindow {
            steps: self.window_steps,
            step_minutes: self.window_step_minutes,
        }
    }
}

fn title_case_words(slug: &str) -> Vec<String> {
    slug.split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect()
}
