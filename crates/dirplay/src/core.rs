/// PlayerCore: single-owner event loop for the playlist and playback.
///
/// Console commands, mpv events and the liveness heartbeat all arrive as
/// `CoreEvent`s on one channel. PlayerCore owns the `Controller` (and with
/// it the playlist, order store and mpv player); no other task touches it.
use dirplay_core::order::FileStore;
use dirplay_core::protocol::{Command, HELP};
use dirplay_core::{Controller, Crawler, PlaybackError, StatusSink};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::mpv::{MpvDriver, MpvEvent, MpvHandle, MpvPlayer};

/// All inputs into the PlayerCore loop.
#[derive(Debug)]
pub enum CoreEvent {
    /// A parsed console command.
    Command(Command),
    /// Raw mpv unsolicited event (forwarded from reader task).
    Mpv(MpvEvent),
    /// Heartbeat: check process liveness.
    HeartbeatTick,
    /// stdin reached EOF.
    InputClosed,
}

/// Status lines go to the console and the log.
pub struct ConsoleStatus;

impl StatusSink for ConsoleStatus {
    fn status(&mut self, message: &str) {
        info!("status: {}", message);
        println!("{}", message);
    }
}

pub struct PlayerCore {
    controller: Controller<MpvPlayer, FileStore>,
    crawler: Crawler,
    mpv_driver: MpvDriver,
    mpv_handle: MpvHandle,
    status: ConsoleStatus,
}

impl PlayerCore {
    pub fn new(
        crawler: Crawler,
        store: FileStore,
        mpv_driver: MpvDriver,
        mpv_handle: MpvHandle,
    ) -> Self {
        let player = MpvPlayer::new(mpv_handle.clone(), crawler.root().clone());
        Self {
            controller: Controller::new(player, store),
            crawler,
            mpv_driver,
            mpv_handle,
            status: ConsoleStatus,
        }
    }

    /// Run until `quit`, stdin EOF, or the event channel closes.
    pub async fn run(
        mut self,
        event_tx: mpsc::Sender<CoreEvent>,
        mut event_rx: mpsc::Receiver<CoreEvent>,
    ) -> anyhow::Result<()> {
        info!("PlayerCore: starting event loop");

        let heartbeat_tx = event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(10)).await;
                if heartbeat_tx.send(CoreEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });
        drop(event_tx);

        // The playlist is built before any command is handled.
        self.refresh().await;

        while let Some(evt) = event_rx.recv().await {
            match evt {
                CoreEvent::Command(Command::Quit) | CoreEvent::InputClosed => {
                    info!("PlayerCore: shutdown requested");
                    break;
                }
                CoreEvent::Command(cmd) => {
                    debug!("PlayerCore: command {:?}", cmd);
                    self.handle_command(cmd).await;
                }
                CoreEvent::Mpv(evt) => self.handle_mpv_event(evt),
                CoreEvent::HeartbeatTick => {
                    if !self.mpv_driver.process_alive() {
                        error!("PlayerCore: mpv process died");
                        self.status.status("mpv exited; restart dirplay to keep playing.");
                        break;
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    async fn refresh(&mut self) {
        // Errors were already reported through the status sink.
        let _ = self.controller.refresh(&self.crawler, &mut self.status).await;
    }

    async fn handle_command(&mut self, cmd: Command) {
        let result = match cmd {
            Command::Play => self.controller.play(),
            Command::Stop => {
                self.controller.stop();
                Ok(())
            }
            Command::Next => self.controller.next(),
            Command::Select { index } => match self.controller.select(index) {
                Ok(true) => Ok(()),
                Ok(false) => {
                    self.status.status(&format!("No track {}.", index));
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Command::Move { from, to } => {
                match self.controller.move_track(from, to) {
                    Ok(true) => self.print_list(),
                    Ok(false) => debug!("move {} -> {} ignored", from, to),
                    Err(e) => {
                        warn!("saving order failed: {:#}", e);
                        self.status.status(&format!("Could not save order: {}", e));
                    }
                }
                Ok(())
            }
            Command::Refresh => {
                self.refresh().await;
                Ok(())
            }
            Command::List => {
                self.print_list();
                Ok(())
            }
            Command::Quit => Ok(()),
        };

        match result {
            Ok(()) => self.report_now_playing(),
            Err(PlaybackError::NoTracks) => self.status.status(&PlaybackError::NoTracks.to_string()),
            Err(PlaybackError::Player(e)) => {
                warn!("player refused to play: {:#}", e);
                self.status.status(&format!("Playback failed: {}", e));
            }
        }
    }

    fn handle_mpv_event(&mut self, evt: MpvEvent) {
        match evt.end_reason() {
            Some("eof") => {
                info!("mpv: end-file reason=eof");
                if let Err(e) = self.controller.on_ended() {
                    self.status.status(&format!("Playback failed: {}", e));
                    return;
                }
                self.report_now_playing();
            }
            Some("error") => {
                let detail = evt.file_error().unwrap_or("unknown error");
                warn!("mpv: end-file reason=error: {}", detail);
                self.status.status(&format!("Playback error: {}", detail));
            }
            Some(reason) => debug!("mpv: end-file reason={}", reason),
            None => {}
        }
    }

    fn report_now_playing(&mut self) {
        if self.controller.playlist().is_stopped() {
            return;
        }
        if let Some(title) = self.controller.now_playing().map(str::to_string) {
            self.status.status(&format!("Now playing: {}", title));
        }
    }

    fn print_list(&self) {
        let playlist = self.controller.playlist();
        let current = playlist.current();
        for (idx, track) in playlist.tracks().iter().enumerate() {
            let marker = if Some(idx) == current { '>' } else { ' ' };
            println!("{} {:>3}  {}  ({})", marker, idx, track.title, track.path);
        }
        println!("{}", HELP);
    }

    async fn cleanup(&mut self) {
        if let Err(e) = self.mpv_handle.send(json!(["quit"])).await {
            debug!("mpv quit: {}", e);
        }
        self.mpv_driver.kill().await;
    }
}
