use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// The show or episode page no longer has the markup the scanner expects.
    /// Fatal for the whole run.
    #[error("page element not found: {0}")]
    ElementMissing(&'static str),

    #[error("download failed with HTTP status {status}")]
    TransferFailed { status: reqwest::StatusCode },

    #[error("download incomplete: got {received} bytes, expected {expected}")]
    Incomplete { expected: u64, received: u64 },

    #[error("transcoding failed: {0}")]
    Transcode(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("manifest error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("tag error: {0}")]
    Tag(#[from] id3::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    /// Whether the error means the scraper layer is out of step with the site,
    /// as opposed to a per-episode problem.
    pub fn is_environment_failure(&self) -> bool {
        matches!(self, AppError::ElementMissing(_))
    }
}

pub type Result<T, E = AppError> = std::result::Result<T, E>;
