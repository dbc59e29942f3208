//! In-memory playlist: ordered tracks, the current index and the stopped flag.

use std::collections::HashSet;

use percent_encoding::percent_decode_str;
use serde::Serialize;

/// One playable file. `path` is the root-relative, still percent-encoded
/// path and is the track's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Track {
    pub path: String,
    pub title: String,
}

impl Track {
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let title = title_from_path(&path);
        Self { path, title }
    }
}

/// Decoded file name without its last extension.
fn title_from_path(path: &str) -> String {
    let without_query = path.split('?').next().unwrap_or_default();
    let segment = without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    let decoded = percent_decode_str(segment).decode_utf8_lossy();

    match decoded.rfind('.') {
        Some(dot) if dot > 0 => decoded[..dot].to_string(),
        _ => decoded.into_owned(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaybackState {
    /// `None` when no track is selected.
    pub current: Option<usize>,
    pub stopped: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current: None,
            stopped: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Playlist {
    tracks: Vec<Track>,
    state: PlaybackState,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&Track> {
        self.tracks.get(idx)
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current(&self) -> Option<usize> {
        self.state.current
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.state.current.and_then(|i| self.tracks.get(i))
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped
    }

    pub fn paths(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.path.clone()).collect()
    }

    /// Replace all tracks. Repeated paths keep their first occurrence.
    pub fn load(&mut self, tracks: Vec<Track>) {
        let mut seen = HashSet::new();
        self.tracks = tracks
            .into_iter()
            .filter(|t| seen.insert(t.path.clone()))
            .collect();

        if self.state.current.is_some_and(|i| i >= self.tracks.len()) {
            self.state.current = None;
        }
        if self.state.current.is_none() {
            self.state.stopped = true;
        }
    }

    /// Drop every track and return to the empty, stopped state.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.state = PlaybackState::default();
    }

    /// Select `idx` and mark playback as running. Out of range is ignored.
    pub fn set_current(&mut self, idx: usize) -> bool {
        if idx >= self.tracks.len() {
            return false;
        }
        self.state.current = Some(idx);
        self.state.stopped = false;
        true
    }

    pub fn set_stopped(&mut self) {
        self.state.stopped = true;
    }

    /// Step to the next track, wrapping to the first after the last.
    pub fn advance(&mut self) -> Option<usize> {
        if self.tracks.is_empty() {
            return None;
        }
        let next = match self.state.current {
            Some(i) => (i + 1) % self.tracks.len(),
            None => 0,
        };
        self.state.current = Some(next);
        Some(next)
    }

    /// Move the track at `from` to `to`, keeping `current` on the same track.
    ///
    /// Returns `false` without touching anything when the indices are equal,
    /// negative or out of bounds.
    pub fn move_track(&mut self, from: i64, to: i64) -> bool {
        let len = self.tracks.len();
        let (from, to) = match (usize::try_from(from), usize::try_from(to)) {
            (Ok(f), Ok(t)) if f != t && f < len && t < len => (f, t),
            _ => return false,
        };

        let track = self.tracks.remove(from);
        self.tracks.insert(to, track);

        if let Some(cur) = self.state.current {
            self.state.current = Some(if cur == from {
                to
            } else if from < cur && cur <= to {
                cur - 1
            } else if to <= cur && cur < from {
                cur + 1
            } else {
                cur
            });
        }
        true
    }
}
