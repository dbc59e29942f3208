mod core;
mod mpv;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dirplay_core::config::Config;
use dirplay_core::order::{merge_order, FileStore, OrderStore};
use dirplay_core::playlist::Track;
use dirplay_core::protocol::{Command, ParseError, HELP};
use dirplay_core::{AudioRoot, Crawler};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::core::{CoreEvent, PlayerCore};
use crate::mpv::{MpvDriver, MpvEvent};

#[derive(Debug, Parser)]
#[command(name = "dirplay", version, about = "Play the audio files under an HTTP directory listing")]
struct Cli {
    /// Audio root URL, overriding `server.audio_root` from the config file.
    #[arg(long, global = true)]
    root: Option<String>,

    /// Order store file, overriding `store.path`.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Crawl once and print the ordered playlist.
    Scan,
    /// Crawl, then play through mpv driven by console commands.
    Play,
}

/// Forwards WARN and ERROR events to stderr so they are not lost in the log file.
struct ConsoleLayer;

impl<S> tracing_subscriber::Layer<S> for ConsoleLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("[{}] ", level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);
        eprintln!("{}", message);
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

fn init_logging() -> anyhow::Result<PathBuf> {
    let data_dir = dirplay_core::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("dirplay.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(ConsoleLayer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,dirplay=debug,dirplay_core=debug")
            }),
        )
        .init();

    Ok(log_path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_path = init_logging()?;
    info!("Log file: {:?}", log_path);

    let mut config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());
    if let Some(root) = cli.root {
        config.server.audio_root = root;
    }
    if let Some(store) = cli.store {
        config.store.path = store;
    }

    let root = AudioRoot::parse(&config.server.audio_root)?;
    let crawler = Crawler::from_config(&config.crawl, root).context("building HTTP client")?;
    let store = FileStore::new(config.store.path.clone());
    info!(
        "Audio root {}, order store {:?}",
        crawler.root().url(),
        store.path()
    );

    match cli.command.unwrap_or(Mode::Play) {
        Mode::Scan => scan(&crawler, store).await,
        Mode::Play => play(&config, crawler, store).await,
    }
}

async fn scan(crawler: &Crawler, store: FileStore) -> anyhow::Result<()> {
    let discovered = crawler.crawl("").await?;
    let order = OrderStore::new(store).load();
    for (idx, path) in merge_order(&discovered, &order).iter().enumerate() {
        let track = Track::from_path(path);
        println!("{}\t{}\t{}", idx, track.title, track.path);
    }
    Ok(())
}

async fn play(config: &Config, crawler: Crawler, store: FileStore) -> anyhow::Result<()> {
    let mpv_binary = dirplay_core::platform::find_mpv_binary(Some(config.player.mpv_path.as_path()))
        .context("mpv not found; install it or set player.mpv_path")?;
    info!("Using mpv at {:?}", mpv_binary);

    // Event channel: all external inputs funnel into PlayerCore
    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(256);

    let (mpv_event_tx, mut mpv_event_rx) = mpsc::channel::<MpvEvent>(64);
    let mut driver = MpvDriver::new();
    let handle = driver.spawn_and_connect(&mpv_binary, mpv_event_tx).await?;

    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(evt) = mpv_event_rx.recv().await {
            if forward_tx.send(CoreEvent::Mpv(evt)).await.is_err() {
                break;
            }
        }
        warn!("mpv event stream closed");
    });

    let input_tx = event_tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("reading stdin: {}", e);
                    break;
                }
            };
            match Command::parse(&line) {
                Err(ParseError::Empty) => continue,
                Ok(cmd) => {
                    if input_tx.send(CoreEvent::Command(cmd)).await.is_err() {
                        return;
                    }
                }
                Err(e) => println!("{}\n{}", e, HELP),
            }
        }
        let _ = input_tx.send(CoreEvent::InputClosed).await;
    });

    println!("{}", HELP);
    info!("PlayerCore initialised, running event loop");
    PlayerCore::new(crawler, store, driver, handle)
        .run(event_tx, event_rx)
        .await
}
