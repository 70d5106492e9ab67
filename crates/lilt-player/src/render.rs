//! `render` subcommand: play through the offline output into a WAV file
//!
//! The session clock follows the wall clock, so blocks are rendered at the
//! pace a device would pull them. Rendering ends when the session leaves
//! PLAYING or the expected length (plus a second of slack) has been written.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use lilt_core::audio::{AudioOutput, OfflineOutput};
use lilt_core::config::EngineConfig;
use lilt_core::{AudioPlayer, EngineContext, PlayState, SAMPLES_PER_MS, SAMPLE_RATE};

use crate::PlayOptions;

/// 10 ms at 48 kHz
const BLOCK_FRAMES: usize = 480;

pub fn render(config: EngineConfig, options: &PlayOptions, output_path: &Path) -> Result<()> {
    if options.loops == 0 {
        bail!("cannot render an endless loop; pass --loops N");
    }

    let output = Arc::new(OfflineOutput::new(1));
    let shared: Arc<dyn AudioOutput> = output.clone();
    let context = EngineContext::new(config, shared);
    let player = AudioPlayer::new(Arc::new(context));
    player.init().context("Failed to start offline output")?;

    let id = player
        .play(options.path.clone(), options.seek, options.end, options.loops)
        .with_context(|| format!("Failed to play {:?}", options.path))?;
    player.set_speed(id, options.speed)?;
    player.set_volume(id, options.volume)?;

    let duration_ms = player.duration(id)?;
    let limit = frame_limit(options, duration_ms);
    log::info!(
        "render: {:?} -> {:?}, at most {} frames",
        options.path,
        output_path,
        limit
    );

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(output_path, spec)
        .with_context(|| format!("Failed to create {:?}", output_path))?;

    let block_time = Duration::from_micros(BLOCK_FRAMES as u64 * 1_000_000 / SAMPLE_RATE as u64);
    let started = Instant::now();
    let mut block = vec![0.0f32; BLOCK_FRAMES];
    let mut written = 0usize;
    let mut final_state = PlayState::Playing;

    while written < limit {
        final_state = player.state(id)?;
        if final_state != PlayState::Playing {
            break;
        }
        output.render_into(&mut block);
        for &sample in &block {
            writer.write_sample(sample)?;
        }
        written += BLOCK_FRAMES;
        player.notifications().pump();

        let due = started + block_time * (written / BLOCK_FRAMES) as u32;
        if let Some(wait) = due.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    writer
        .finalize()
        .with_context(|| format!("Failed to finish {:?}", output_path))?;
    player.shutdown();

    log::info!(
        "render: wrote {} frames ({} ms)",
        written,
        written as i64 / SAMPLES_PER_MS
    );
    if final_state == PlayState::Error {
        bail!("Playback of {:?} failed", options.path);
    }
    Ok(())
}

/// Frames the whole segment should take, all passes, at the requested speed
fn frame_limit(options: &PlayOptions, duration_ms: u32) -> usize {
    let end = if options.end > options.seek {
        options.end.min(duration_ms)
    } else {
        duration_ms
    };
    let segment_ms = end.saturating_sub(options.seek) as f64;
    let speed = options.speed.clamp(0.5, 2.5);
    let total_ms = segment_ms * options.loops as f64 / speed + 1000.0;
    (total_ms * SAMPLES_PER_MS as f64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn options(seek: u32, end: u32, loops: u32, speed: f64) -> PlayOptions {
        PlayOptions {
            path: PathBuf::from("clip.opus"),
            seek,
            end,
            loops,
            speed,
            volume: 1.0,
        }
    }

    #[test]
    fn test_frame_limit_whole_file() {
        assert_eq!(frame_limit(&options(0, 0, 1, 1.0), 5000), 6000 * 48);
    }

    #[test]
    fn test_frame_limit_segment_loops_and_speed() {
        // 1 s segment, two passes at double speed
        assert_eq!(frame_limit(&options(1000, 2000, 2, 2.0), 5000), 2000 * 48);
    }

    #[test]
    fn test_frame_limit_clamps_end_and_speed() {
        assert_eq!(frame_limit(&options(4000, 9000, 1, 10.0), 5000), 1400 * 48);
    }
}
