use thiserror::Error;

/// A directory listing could not be fetched. Fatal to the whole crawl.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("failed to fetch {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to fetch {path}: HTTP {status}")]
    Status {
        path: String,
        status: reqwest::StatusCode,
    },
    #[error("invalid listing path {path}: {source}")]
    BadPath {
        path: String,
        #[source]
        source: crate::path::UrlParseError,
    },
    /// The server answered from a URL outside the audio root. Only reachable
    /// with a client that follows redirects without the root bound.
    #[error("listing {path} redirected outside the audio root to {target}")]
    Redirect { path: String, target: String },
    #[error("invalid audio root {url}: {reason}")]
    InvalidRoot { url: String, reason: String },
}

impl CrawlError {
    /// Path of the listing that failed, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            CrawlError::Fetch { path, .. }
            | CrawlError::Status { path, .. }
            | CrawlError::BadPath { path, .. }
            | CrawlError::Redirect { path, .. } => Some(path),
            CrawlError::InvalidRoot { .. } => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("No tracks to play.")]
    NoTracks,
    /// Raised by the playback capability itself, e.g. autoplay refused.
    #[error(transparent)]
    Player(#[from] anyhow::Error),
}
