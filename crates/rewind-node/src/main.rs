use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use rewind_core::SessionId;
use rewind_logging::{ConsoleFormat, RewindSubscriberBuilder, SessionContext, SessionRole};
use rewind_node::{IngestLine, NodeConfig, RewindNode};
use rewind_replay::{PlayerEvent, PlayerState};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{Instrument, warn};

const DEFAULT_DATA_DIR: &str = "./rewind-data";

#[derive(Parser)]
#[command(name = "rewind", about = "Session replay event pipeline", version)]
struct Cli {
    /// Node configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory of the session store (overrides the config file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Console log format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Start the queue and run its health check
    Health,
    /// Ingest JSONL batches: one {"session_id": ..., "events": [...]} per line
    Ingest {
        /// Input file; stdin when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List stored sessions
    Sessions,
    /// Play a stored session headlessly and print the activity feed
    Replay {
        #[arg(long)]
        session: String,
        /// Playback speed multiplier
        #[arg(long)]
        speed: Option<f64>,
        /// Jump over spans without useful events
        #[arg(long)]
        skip_inactivity: bool,
        /// Stop at this offset (ms)
        #[arg(long)]
        until: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path).await?,
        None => NodeConfig::default(),
    };
    if let Some(dir) = cli.data_dir.clone() {
        config.data_dir = Some(dir);
    }
    if config.data_dir.is_none() {
        config.data_dir = Some(PathBuf::from(DEFAULT_DATA_DIR));
    }

    let mut logging = RewindSubscriberBuilder::new()
        .with_config(config.log.clone())
        .with_console(true)
        .with_console_format(match cli.log_format {
            LogFormat::Pretty => ConsoleFormat::Pretty,
            LogFormat::Json => ConsoleFormat::Json,
        });
    if cli.verbose {
        logging = logging.with_level("debug");
    }
    let _log_guard = logging.init();

    let node = RewindNode::start(config)
        .await
        .context("failed to start node")?;

    let result = match cli.command {
        Command::Health => {
            node.health_check().await?;
            println!("healthy");
            Ok(())
        }
        Command::Ingest { file } => ingest(&node, file).await,
        Command::Sessions => sessions(&node).await,
        Command::Replay {
            session,
            speed,
            skip_inactivity,
            until,
        } => replay(&node, session, speed, skip_inactivity, until).await,
    };

    node.stop().await;
    result
}

async fn ingest(node: &RewindNode, file: Option<PathBuf>) -> anyhow::Result<()> {
    let reader: Box<dyn tokio::io::AsyncRead + Unpin + Send> = match &file {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let mut lines = BufReader::new(reader).lines();
    let mut line_number = 0;
    let mut failures = 0;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let outcome = match serde_json::from_str::<IngestLine>(&line) {
            Ok(batch) => node
                .ingest_value(&batch.session_id, batch.events)
                .await
                .map(|receipt| (batch.session_id, receipt))
                .map_err(anyhow::Error::from),
            Err(e) => Err(e.into()),
        };
        match outcome {
            Ok((session_id, receipt)) => println!(
                "line {line_number}: session {session_id} accepted {} dropped {}",
                receipt.accepted, receipt.dropped
            ),
            Err(e) => {
                failures += 1;
                eprintln!("line {line_number}: {e}");
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {line_number} lines failed");
    }
    Ok(())
}

async fn sessions(node: &RewindNode) -> anyhow::Result<()> {
    let sessions = node.sessions().await?;
    if sessions.is_empty() {
        println!("no sessions");
        return Ok(());
    }

    println!(
        "{:<36} {:>8} {:>8} {:>12}  status",
        "session", "events", "pending", "duration"
    );
    for meta in sessions {
        println!(
            "{:<36} {:>8} {:>8} {:>10.1}s  {}",
            meta.id.as_str(),
            meta.event_count,
            meta.pending,
            meta.total_duration() as f64 / 1000.0,
            if meta.is_live { "live" } else { "finalized" }
        );
    }
    Ok(())
}

async fn replay(
    node: &RewindNode,
    session: String,
    speed: Option<f64>,
    skip_inactivity: bool,
    until: Option<u64>,
) -> anyhow::Result<()> {
    let session_id = SessionId::new(session)?;
    let span = SessionContext::new(SessionRole::Replay).span(&session_id);
    watch_replay(node, session_id, speed, skip_inactivity, until)
        .instrument(span)
        .await
}

async fn watch_replay(
    node: &RewindNode,
    session_id: SessionId,
    speed: Option<f64>,
    skip_inactivity: bool,
    until: Option<u64>,
) -> anyhow::Result<()> {
    let player = node.player();
    let mut events = player.subscribe();
    let mut snapshots = player.watch();

    player.load(session_id.clone()).await?;
    player
        .set_config(speed, skip_inactivity.then_some(true))
        .await?;
    let tail = player
        .snapshot()
        .is_live
        .then(|| node.tail(&player, session_id.clone()));

    let snapshot = player.snapshot();
    println!(
        "session {session_id}: {} events, {:.1}s{}",
        snapshot.event_count,
        snapshot.total_duration as f64 / 1000.0,
        if snapshot.is_live { ", live" } else { "" }
    );

    player.play(None).await?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event @ PlayerEvent::UsefulEventCrossed { .. }) => print_crossing(&event, until),
                Ok(PlayerEvent::StateChanged { to: PlayerState::Ended, .. }) => break,
                Ok(PlayerEvent::Error { message }) => eprintln!("player error: {message}"),
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "Dropped player events"),
                Err(RecvError::Closed) => break,
            },
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = snapshots.borrow_and_update().current_time;
                if let Some(until) = until
                    && current >= until
                {
                    player.pause(Some(until)).await?;
                    break;
                }
            }
        }
    }

    // Crossings published in the same tick as the last snapshot
    while let Ok(event) = events.try_recv() {
        print_crossing(&event, until);
    }

    if let Some(tail) = tail {
        tail.stop().await?;
    }
    player.close().await?;
    println!(
        "stopped at {:.3}s",
        player.snapshot().current_time as f64 / 1000.0
    );
    Ok(())
}

fn print_crossing(event: &PlayerEvent, until: Option<u64>) {
    if let PlayerEvent::UsefulEventCrossed {
        offset,
        kind,
        description,
        ..
    } = event
        && until.is_none_or(|until| *offset <= until)
    {
        println!("[{:>9.3}s] {kind} {description}", *offset as f64 / 1000.0);
    }
}
