//! Sequencing of the playback capability from the playlist.
//!
//! The controller owns the playlist, the order store and the player. It is
//! the only thing that mutates them, so the event loop holding it needs no
//! further locking.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::crawler::Crawler;
use crate::error::{CrawlError, PlaybackError};
use crate::order::{merge_order, KeyValueStore, OrderStore};
use crate::playlist::{Playlist, Track};

/// The media element the controller drives.
///
/// Implementations report "ended" out of band; the owner of the controller
/// forwards it to [`Controller::on_ended`].
pub trait Player {
    fn set_source(&mut self, path: &str);
    fn play(&mut self) -> anyhow::Result<()>;
    fn pause(&mut self);
    fn reset_position(&mut self);
}

/// Receiver of human-readable status lines.
pub trait StatusSink {
    fn status(&mut self, message: &str);
}

impl StatusSink for Vec<String> {
    fn status(&mut self, message: &str) {
        self.push(message.to_string());
    }
}

pub struct Controller<P, S> {
    playlist: Playlist,
    order: OrderStore<S>,
    player: P,
    now_playing: Option<String>,
}

impl<P: Player, S: KeyValueStore> Controller<P, S> {
    pub fn new(player: P, store: S) -> Self {
        Self {
            playlist: Playlist::new(),
            order: OrderStore::new(store),
            player,
            now_playing: None,
        }
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn order_store(&self) -> &OrderStore<S> {
        &self.order
    }

    /// Title shown as "now playing", cleared on stop.
    pub fn now_playing(&self) -> Option<&str> {
        self.now_playing.as_deref()
    }

    /// Order the discovered paths by the persisted order and load them.
    pub fn load_discovered(&mut self, discovered: &BTreeSet<String>) -> usize {
        let persisted = self.order.load();
        let tracks: Vec<Track> = merge_order(discovered, &persisted)
            .into_iter()
            .map(Track::from_path)
            .collect();
        let before = self.playlist.current_track().map(|t| t.path.clone());
        self.playlist.load(tracks);

        let after = self.playlist.current_track().map(|t| t.path.as_str());
        if let (Some(old), Some(new)) = (before.as_deref(), after) {
            if old != new {
                // The player keeps its source until the next load.
                debug!(
                    "reload: index {:?} now holds {} instead of {}",
                    self.playlist.current(),
                    new,
                    old
                );
            }
        }
        if self.playlist.is_stopped() {
            self.now_playing = None;
        }
        self.playlist.len()
    }

    /// Crawl from the audio root and rebuild the playlist.
    ///
    /// A failed crawl empties the playlist and stops playback.
    pub async fn refresh(
        &mut self,
        crawler: &Crawler,
        status: &mut impl StatusSink,
    ) -> Result<usize, CrawlError> {
        status.status("Scanning...");
        match crawler.crawl("").await {
            Ok(files) => {
                let count = self.load_discovered(&files);
                status.status(&format!("Loaded {} tracks.", count));
                Ok(count)
            }
            Err(e) => {
                warn!("crawl failed: {}", e);
                self.halt();
                self.playlist.clear();
                status.status(&format!("Error: {}", e));
                Err(e)
            }
        }
    }

    /// Start playback at the current track, or the first one if none.
    /// Resumes without reloading when already playing.
    pub fn play(&mut self) -> Result<(), PlaybackError> {
        if self.playlist.is_empty() {
            return Err(PlaybackError::NoTracks);
        }
        match self.playlist.current() {
            Some(idx) if !self.playlist.is_stopped() => {
                debug!("play: resuming track {}", idx);
                self.player.play()?;
                Ok(())
            }
            Some(idx) => self.start(idx),
            None => self.start(0),
        }
    }

    pub fn stop(&mut self) {
        info!("stopping playback");
        self.halt();
        self.playlist.set_stopped();
    }

    /// The player finished the current track: move on, wrapping around.
    pub fn on_ended(&mut self) -> Result<(), PlaybackError> {
        let Some(next) = self.playlist.advance() else {
            return Ok(());
        };
        self.load_track(next);
        if self.playlist.is_stopped() {
            return Ok(());
        }
        self.player.play()?;
        Ok(())
    }

    /// Skip to the following track and play it.
    pub fn next(&mut self) -> Result<(), PlaybackError> {
        if self.playlist.is_empty() {
            return Err(PlaybackError::NoTracks);
        }
        let next = self
            .playlist
            .current()
            .map_or(0, |i| (i + 1) % self.playlist.len());
        self.start(next)
    }

    /// Play `idx` immediately, whatever the previous state.
    /// Returns `Ok(false)` when there is no such track.
    pub fn select(&mut self, idx: usize) -> Result<bool, PlaybackError> {
        if idx >= self.playlist.len() {
            debug!("select: index {} out of range", idx);
            return Ok(false);
        }
        self.start(idx)?;
        Ok(true)
    }

    /// Reorder the playlist and persist the new order.
    /// Invalid indices are ignored and nothing is written.
    pub fn move_track(&mut self, from: i64, to: i64) -> anyhow::Result<bool> {
        if !self.playlist.move_track(from, to) {
            return Ok(false);
        }
        self.order.save(&self.playlist.paths())?;
        Ok(true)
    }

    fn start(&mut self, idx: usize) -> Result<(), PlaybackError> {
        if !self.playlist.set_current(idx) {
            return Err(PlaybackError::NoTracks);
        }
        self.load_track(idx);
        self.player.play()?;
        Ok(())
    }

    fn load_track(&mut self, idx: usize) {
        if let Some(track) = self.playlist.get(idx) {
            info!("loading track {}: {}", idx, track.path);
            self.player.set_source(&track.path);
            self.now_playing = Some(track.title.clone());
        }
    }

    fn halt(&mut self) {
        self.player.pause();
        self.player.reset_position();
        self.now_playing = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{MemoryStore, ORDER_KEY};

    #[derive(Debug, Default)]
    struct FakePlayer {
        source: Option<String>,
        playing: bool,
        resets: usize,
        refuse_play: bool,
    }

    impl Player for FakePlayer {
        fn set_source(&mut self, path: &str) {
            self.source = Some(path.to_string());
        }

        fn play(&mut self) -> anyhow::Result<()> {
            if self.refuse_play {
                anyhow::bail!("autoplay blocked");
            }
            self.playing = true;
            Ok(())
        }

        fn pause(&mut self) {
            self.playing = false;
        }

        fn reset_position(&mut self) {
            self.resets += 1;
        }
    }

    fn discovered(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|s| s.to_string()).collect()
    }

    fn controller(paths: &[&str]) -> Controller<FakePlayer, MemoryStore> {
        let mut c = Controller::new(FakePlayer::default(), MemoryStore::new());
        c.load_discovered(&discovered(paths));
        c
    }

    #[test]
    fn play_on_empty_playlist_fails_without_state_change() {
        let mut c = controller(&[]);
        assert!(matches!(c.play(), Err(PlaybackError::NoTracks)));
        assert!(c.playlist().is_stopped());
        assert_eq!(c.playlist().current(), None);
        assert!(!c.player().playing);
    }

    #[test]
    fn play_starts_at_first_track() {
        let mut c = controller(&["b.mp3", "a.mp3"]);
        c.play().unwrap();
        assert_eq!(c.playlist().current(), Some(0));
        assert!(!c.playlist().is_stopped());
        assert_eq!(c.player().source.as_deref(), Some("a.mp3"));
        assert_eq!(c.now_playing(), Some("a"));
        assert!(c.player().playing);
    }

    #[test]
    fn stop_pauses_rewinds_and_clears_display() {
        let mut c = controller(&["a.mp3"]);
        c.play().unwrap();
        c.stop();
        assert!(c.playlist().is_stopped());
        assert!(!c.player().playing);
        assert_eq!(c.player().resets, 1);
        assert_eq!(c.now_playing(), None);

        c.play().unwrap();
        assert_eq!(c.now_playing(), Some("a"));
    }

    #[test]
    fn ended_on_last_track_wraps_to_first() {
        let mut c = controller(&["a.mp3", "b.mp3", "c.mp3"]);
        assert!(c.select(2).unwrap());
        c.on_ended().unwrap();
        assert_eq!(c.playlist().current(), Some(0));
        assert!(!c.playlist().is_stopped());
        assert_eq!(c.player().source.as_deref(), Some("a.mp3"));
        assert!(c.player().playing);
    }

    #[test]
    fn ended_while_stopped_does_not_autoplay() {
        let mut c = controller(&["a.mp3", "b.mp3"]);
        c.select(0).unwrap();
        c.stop();
        c.on_ended().unwrap();
        assert!(c.playlist().is_stopped());
        assert!(!c.player().playing);
    }

    #[test]
    fn select_plays_regardless_of_state() {
        let mut c = controller(&["a.mp3", "b.mp3"]);
        assert!(c.select(1).unwrap());
        assert_eq!(c.player().source.as_deref(), Some("b.mp3"));
        assert!(!c.select(5).unwrap());
        assert_eq!(c.playlist().current(), Some(1));
    }

    #[test]
    fn next_wraps() {
        let mut c = controller(&["a.mp3", "b.mp3"]);
        c.next().unwrap();
        assert_eq!(c.playlist().current(), Some(0));
        c.next().unwrap();
        c.next().unwrap();
        assert_eq!(c.playlist().current(), Some(0));
    }

    #[test]
    fn player_errors_propagate() {
        let mut c = controller(&["a.mp3"]);
        c.player.refuse_play = true;
        let err = c.play().unwrap_err();
        assert!(matches!(err, PlaybackError::Player(_)));
        assert_eq!(err.to_string(), "autoplay blocked");
    }

    #[test]
    fn move_persists_new_order() {
        let mut c = controller(&["a.mp3", "b.mp3", "c.mp3"]);
        c.select(2).unwrap();
        assert!(c.move_track(0, 2).unwrap());
        assert_eq!(c.playlist().current(), Some(1));
        assert_eq!(c.order_store().load(), ["b.mp3", "c.mp3", "a.mp3"]);
        assert_eq!(c.order_store().inner().writes(), 1);
    }

    #[test]
    fn noop_move_writes_nothing() {
        let mut c = controller(&["a.mp3", "b.mp3", "c.mp3"]);
        c.select(2).unwrap();
        assert!(!c.move_track(1, 1).unwrap());
        assert!(!c.move_track(-1, 1).unwrap());
        assert!(!c.move_track(0, 9).unwrap());
        assert_eq!(c.order_store().inner().writes(), 0);
        assert_eq!(c.playlist().current(), Some(2));
    }

    #[test]
    fn reload_keeps_index_even_when_another_track_lands_on_it() {
        let mut c = Controller::new(FakePlayer::default(), MemoryStore::new());
        c.load_discovered(&discovered(&["a.mp3", "b.mp3", "c.mp3"]));
        c.select(1).unwrap();
        assert_eq!(c.now_playing(), Some("b"));

        c.load_discovered(&discovered(&["a.mp3", "aa.mp3", "b.mp3", "c.mp3"]));
        assert_eq!(c.playlist().current(), Some(1));
        assert_eq!(c.playlist().current_track().unwrap().path, "aa.mp3");
        assert!(!c.playlist().is_stopped());
        // Nothing was reloaded into the player.
        assert_eq!(c.player().source.as_deref(), Some("b.mp3"));
        assert_eq!(c.now_playing(), Some("b"));
    }

    #[test]
    fn load_respects_persisted_order() {
        let store = MemoryStore::with_entry(ORDER_KEY, r#"["c.mp3","gone.mp3","a.mp3"]"#);
        let mut c = Controller::new(FakePlayer::default(), store);
        let n = c.load_discovered(&discovered(&["a.mp3", "b.mp3", "c.mp3"]));
        assert_eq!(n, 3);
        assert_eq!(c.playlist().paths(), ["c.mp3", "a.mp3", "b.mp3"]);
    }
}
