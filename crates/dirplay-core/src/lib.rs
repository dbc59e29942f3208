//! Directory-listing crawler and playlist engine.
//!
//! A crawl walks the HTML listings under an audio root and returns the
//! root-relative paths of every audio file found. The controller merges
//! those paths with the order the user saved last time and sequences
//! playback over the result.

pub mod config;
pub mod crawler;
pub mod error;
pub mod order;
pub mod path;
pub mod platform;
pub mod playback;
pub mod playlist;
pub mod protocol;

pub use crawler::{Crawler, CrawlReport};
pub use error::{CrawlError, PlaybackError};
pub use path::AudioRoot;
pub use playback::{Controller, Player, StatusSink};
pub use playlist::{Playlist, Track};
