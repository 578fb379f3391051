//! Audio extraction from the downloaded video container.
use std::future::Future;
use std::path::Path;

use tokio::process::Command;

use crate::error::{AppError, Result};

/// Writes the audio track of `container` to `output` as MP3.
pub trait Transcoder {
    fn extract_audio(&self, container: &Path, output: &Path) -> impl Future<Output = Result<()>>;
}

/// Shells out to ffmpeg: drop the video stream, encode the audio with LAME at a
/// fixed bitrate.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    pub ffmpeg_path: String,
    pub bitrate: String,
}

impl Ffmpeg {
    pub fn new(ffmpeg_path: impl Into<String>, bitrate: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            bitrate: bitrate.into(),
        }
    }
}

impl Transcoder for Ffmpeg {
    async fn extract_audio(&self, container: &Path, output: &Path) -> Result<()> {
        let out = Command::new(&self.ffmpeg_path)
            .arg("-hide_banner")
            .arg("-nostdin")
            .arg("-loglevel")
            .arg("error")
            .arg("-y")
            .arg("-i")
            .arg(container)
            .arg("-vn")
            .arg("-codec:a")
            .arg("libmp3lame")
            .arg("-b:a")
            .arg(&self.bitrate)
            // The output is written to a `.part` name, so the muxer can't be
            // inferred from the extension.
            .arg("-f")
            .arg("mp3")
            .arg(output)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Transcode(format!("spawn {}: {e}", self.ffmpeg_path)))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            // Last few lines are the ones that say what went wrong.
            let tail = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(AppError::Transcode(format!(
                "ffmpeg exited with status {} for {}\n{tail}",
                out.status.code().unwrap_or(-1),
                container.display(),
            )));
        }

        Ok(())
    }
}
