//! Preview player - command-line entry point
//!
//! Opens a media source, optionally seeks, resizes or switches the audio
//! stream, plays for a while and prints the final engine status.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use preview_common::events::PlayerEvent;
use preview_common::time::format_timestamp;
use preview_player::config::PlayerConfig;
use preview_player::playback::SeekOptions;
use preview_player::render::TraceRenderSink;
use preview_player::PlaybackEngine;
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for preview-player
#[derive(Parser, Debug)]
#[command(name = "preview-player")]
#[command(about = "Synchronised audio/video preview player")]
#[command(version)]
struct Args {
    /// Media URL (e.g. synthetic://?duration=10&fps=25)
    url: String,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level; overrides the config file and RUST_LOG
    #[arg(long, env = "PREVIEW_PLAYER_LOG_LEVEL")]
    log_level: Option<String>,

    /// Play for this many seconds
    #[arg(long, value_name = "SECONDS")]
    play: Option<f64>,

    /// Seek to this time before playing; may be repeated
    #[arg(long, value_name = "SECONDS")]
    seek: Vec<f64>,

    /// Accept the first frames after a coarse seek
    #[arg(long)]
    imprecise: bool,

    /// Audio stream index
    #[arg(long)]
    audio_stream: Option<usize>,

    /// Display area, e.g. 1280x720
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    display: Option<(u32, u32)>,

    /// Volume in [0, 1]
    #[arg(long)]
    volume: Option<f32>,

    /// Print the final status as JSON
    #[arg(long)]
    json: bool,
}

fn parse_size(value: &str) -> std::result::Result<(u32, u32), String> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got {}", value))?;
    let w: u32 = w.trim().parse().map_err(|_| format!("invalid width: {}", w))?;
    let h: u32 = h.trim().parse().map_err(|_| format!("invalid height: {}", h))?;
    if w == 0 || h == 0 {
        return Err("display size must be positive".to_string());
    }
    Ok((w, h))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, source) = PlayerConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;

    // Initialize tracing
    let filter = match &args.log_level {
        Some(level) => tracing_subscriber::EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level: {}", level))?,
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.logging.level.as_str().into()),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    match source.path() {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let sink = Arc::new(TraceRenderSink::new());
    let engine = PlaybackEngine::open(&args.url, config, sink.clone(), args.audio_stream)
        .await
        .with_context(|| format!("Failed to open {}", args.url))?;

    let result = run(&engine, &args).await;
    let presented = sink.presented();

    let status = engine.status();
    engine.close().await.context("Failed to close engine")?;
    result?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialise status")?
        );
    } else {
        println!(
            "position {} (frame {}) of {}, {} frames presented{}",
            format_timestamp(status.position),
            status.frame,
            format_timestamp(status.duration),
            presented,
            if status.play_eof { ", end of stream" } else { "" }
        );
    }
    Ok(())
}

async fn run(engine: &PlaybackEngine, args: &Args) -> Result<()> {
    let mut events = engine.subscribe();
    let logger = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                PlayerEvent::Playback { .. } => {}
                PlayerEvent::AudioUnderrun { time } => warn!("Audio underrun at {:?}", time),
                other => debug!("Event: {:?}", other),
            }
        }
    });

    if let Some(volume) = args.volume {
        if !(0.0..=1.0).contains(&volume) {
            bail!("volume must be within [0, 1], got {}", volume);
        }
        engine.set_volume(volume).await.context("Failed to set volume")?;
    }
    if let Some((width, height)) = args.display {
        engine
            .set_display_size(width, height)
            .await
            .context("Failed to resize output")?;
    }

    // Issued back to back so intermediate targets coalesce
    let options = SeekOptions {
        imprecise: args.imprecise,
    };
    let seeks: Vec<_> = args.seek.iter().map(|&t| engine.seek(t, options)).collect();
    for (time, outcome) in args.seek.iter().zip(futures::future::join_all(seeks).await) {
        let outcome = outcome.with_context(|| format!("Seek to {} failed", time))?;
        debug!("Seek to {}: {:?}", time, outcome);
    }

    if let Some(seconds) = args.play {
        engine.play().await.context("Failed to start playback")?;
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))) => {}
            _ = wait_for_end(engine) => info!("Reached end of stream"),
            _ = shutdown_signal() => {}
        }
        engine.stop().await.context("Failed to stop playback")?;
    }

    logger.abort();
    Ok(())
}

async fn wait_for_end(engine: &PlaybackEngine) {
    let mut events = engine.subscribe();
    while let Some(event) = events.recv().await {
        if event == PlayerEvent::EndOfStream {
            return;
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping");
        },
    }
}
