//! Lilt Player - command-line host for the lilt engine
//!
//! - `play`: play a file (or a segment of it) on the default output device
//! - `render`: play a file through the offline output into a WAV file
//! - `inspect`: print the Ogg page table of a file
//!
//! Set RUST_LOG=debug for verbose engine output.

mod inspect;
mod render;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use lilt_core::config::{default_config_path, load_config, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "lilt-player", version, about = "Opus-in-Ogg session player")]
struct Args {
    /// Engine configuration (YAML); defaults to the user config dir
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

/// Segment and playback options shared by `play` and `render`
#[derive(clap::Args, Debug, Clone)]
struct PlayOptions {
    /// Ogg Opus file
    path: PathBuf,

    /// Start position in ms
    #[arg(long, default_value_t = 0)]
    seek: u32,

    /// End position in ms (0 = end of file)
    #[arg(long, default_value_t = 0)]
    end: u32,

    /// Number of passes (0 = loop forever)
    #[arg(long, default_value_t = 1)]
    loops: u32,

    /// Playback speed, 0.5 to 2.5
    #[arg(long, default_value_t = 1.0)]
    speed: f64,

    /// Volume, 0.0 to 1.0
    #[arg(long, default_value_t = 1.0)]
    volume: f32,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play on the output device
    Play(PlayOptions),

    /// Render to a mono 48 kHz WAV file
    Render {
        #[command(flatten)]
        options: PlayOptions,

        /// WAV file to write
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Print the page table of an Ogg file
    Inspect {
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    log::info!("lilt-player starting up");

    let config = engine_config(args.config.as_deref());
    match args.command {
        Command::Play(options) => play(config, &options),
        Command::Render { options, output } => render::render(config, &options, &output),
        Command::Inspect { path } => inspect::inspect(&path),
    }
}

fn engine_config(path: Option<&Path>) -> EngineConfig {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_config_path("engine.yaml"));
    log::info!("Using engine config {:?}", path);
    load_config(&path)
}

#[cfg(feature = "cpal-output")]
fn play(config: EngineConfig, options: &PlayOptions) -> Result<()> {
    use anyhow::Context;
    use lilt_core::audio::CpalOutput;
    use lilt_core::notify::{PlaybackInfo, ProgressCallback, StateCallback, StateChangeInfo};
    use lilt_core::{AudioPlayer, EngineContext, PlayState, SessionId};
    use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    let output = Arc::new(CpalOutput::new(config.output.clone()));
    let player = AudioPlayer::new(Arc::new(EngineContext::new(config, output)));
    player.init().context("Failed to start audio output")?;

    // Print roughly once per second of playback
    let last_second = Arc::new(AtomicU32::new(u32::MAX));
    let progress: ProgressCallback = Arc::new(move |_: SessionId, info: &PlaybackInfo| {
        let second = info.position_ms / 1000;
        if last_second.swap(second, Ordering::Relaxed) != second {
            println!(
                "{:>4}.{}s / {}.{}s",
                second,
                (info.position_ms % 1000) / 100,
                info.duration_ms / 1000,
                (info.duration_ms % 1000) / 100
            );
        }
    });

    let finished = Arc::new(AtomicU8::new(0));
    let flag = Arc::clone(&finished);
    let state: StateCallback = Arc::new(move |id: SessionId, info: &StateChangeInfo| {
        println!("session {}: {} -> {}", id, info.old_state, info.new_state);
        match info.new_state {
            PlayState::Stopped => flag.store(1, Ordering::Release),
            PlayState::Error => flag.store(2, Ordering::Release),
            _ => {}
        }
    });

    let session = player
        .play_ogg_at(
            options.path.clone(),
            options.seek,
            options.end,
            options.loops,
            Some(progress),
            Some(state),
        )
        .with_context(|| format!("Failed to play {:?}", options.path))?;
    player.set_speed(session.id(), options.speed)?;
    player.set_volume(session.id(), options.volume)?;

    // Deliver notifications on this thread until playback ends
    while finished.load(Ordering::Acquire) == 0 {
        if let Some(event) = player.notifications().recv_timeout(Duration::from_millis(100)) {
            player.notifications().dispatch(&event);
        }
    }
    player.notifications().pump();

    let failed = finished.load(Ordering::Acquire) == 2;
    let dropped = player.notifications().dropped_events();
    if dropped > 0 {
        log::debug!("{} progress events dropped", dropped);
    }
    player.shutdown();

    if failed {
        anyhow::bail!("Playback of {:?} failed", options.path);
    }
    Ok(())
}

#[cfg(not(feature = "cpal-output"))]
fn play(_config: EngineConfig, _options: &PlayOptions) -> Result<()> {
    anyhow::bail!("built without the cpal-output feature; use `render` instead")
}
