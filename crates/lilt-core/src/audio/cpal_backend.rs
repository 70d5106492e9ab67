//! CPAL device output
//!
//! `cpal::Stream` is not `Send` on every platform, so the stream lives on a
//! dedicated thread for its whole life. The control side only talks to that
//! thread through channels.
//!
//! ```text
//! ┌──────────────────┐  start()  ┌──────────────────────────┐
//! │  Control thread  │──spawn───►│  lilt-audio-output       │
//! │                  │◄──ready───│  owns cpal::Stream       │
//! │                  │──stop────►│  drops stream, exits     │
//! └──────────────────┘           └────────────┬─────────────┘
//!                                             │ device callback
//!                                             ▼
//!                                  BusMixer::render(BusTable)
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};
use crossbeam::channel::{bounded, Sender};

use super::bus::{BusMixer, BusTable};
use super::config::{OutputConfig, MAX_BUFFER_SIZE};
use super::error::{AudioError, AudioResult};
use super::AudioOutput;
use crate::types::SAMPLE_RATE;

/// Handle to the running output thread
struct StreamThread {
    stop_tx: Sender<()>,
    thread_handle: JoinHandle<()>,
}

/// Device output through CPAL
pub struct CpalOutput {
    buses: Arc<BusTable>,
    config: OutputConfig,
    running: Mutex<Option<StreamThread>>,
    /// Negotiated buffer size in frames (0 = system default or not running)
    buffer_size: AtomicU32,
}

impl CpalOutput {
    pub fn new(config: OutputConfig) -> Self {
        Self {
            buses: Arc::new(BusTable::new()),
            config,
            running: Mutex::new(None),
            buffer_size: AtomicU32::new(0),
        }
    }

    /// Negotiated buffer size in frames, if a fixed size was requested
    pub fn buffer_size(&self) -> Option<u32> {
        match self.buffer_size.load(Ordering::Relaxed) {
            0 => None,
            frames => Some(frames),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl AudioOutput for CpalOutput {
    fn buses(&self) -> &BusTable {
        &self.buses
    }

    fn start(&self) -> AudioResult<()> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if running.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<AudioResult<Option<u32>>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let buses = Arc::clone(&self.buses);
        let config = self.config.clone();

        let thread_handle = thread::Builder::new()
            .name("lilt-audio-output".to_string())
            .spawn(move || {
                let stream = match open_stream(&config, buses) {
                    Ok((stream, frames)) => {
                        let _ = ready_tx.send(Ok(frames));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Park until stop() or the handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
                log::info!("Audio output thread stopped");
            })
            .map_err(|e| AudioError::OutputThread(e.to_string()))?;

        let frames = ready_rx
            .recv()
            .map_err(|_| AudioError::OutputThread("exited before reporting".to_string()))??;
        self.buffer_size.store(frames.unwrap_or(0), Ordering::Relaxed);

        *running = Some(StreamThread {
            stop_tx,
            thread_handle,
        });
        Ok(())
    }

    fn stop(&self) {
        let thread = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            let _ = thread.stop_tx.send(());
            if thread.thread_handle.join().is_err() {
                log::error!("stop: audio output thread panicked");
            }
            self.buffer_size.store(0, Ordering::Relaxed);
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Find the configured device, or the host default
fn select_device(config: &OutputConfig) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    match &config.device {
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(name.clone())),
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::NoDevice("host reports none".to_string())),
    }
}

/// Pick an f32 config at the engine sample rate
fn select_config(device: &cpal::Device, config: &OutputConfig) -> AudioResult<StreamConfig> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::Config(e.to_string()))?
        .collect();

    if supported.is_empty() {
        return Err(AudioError::Config("device reports no output configurations".to_string()));
    }

    let rate_ok = |c: &cpal::SupportedStreamConfigRange| {
        SAMPLE_RATE >= c.min_sample_rate().0 && SAMPLE_RATE <= c.max_sample_rate().0
    };

    let best = supported
        .iter()
        .filter(|c| c.sample_format() == SampleFormat::F32 && rate_ok(c))
        // Prefer the requested channel count
        .min_by_key(|c| (c.channels() as i32 - config.channels as i32).abs())
        .ok_or_else(|| {
            if supported.iter().any(|c| rate_ok(c)) {
                AudioError::Config("device offers no f32 output".to_string())
            } else {
                AudioError::Config(format!("device does not support {}Hz", SAMPLE_RATE))
            }
        })?;

    let range = best.clone().with_sample_rate(cpal::SampleRate(SAMPLE_RATE));
    let buffer_size = match config.buffer_size.as_frames() {
        Some(frames) => CpalBufferSize::Fixed(frames),
        None => CpalBufferSize::Default,
    };

    Ok(StreamConfig {
        channels: range.channels(),
        sample_rate: range.sample_rate(),
        buffer_size,
    })
}

fn open_stream(config: &OutputConfig, buses: Arc<BusTable>) -> AudioResult<(Stream, Option<u32>)> {
    let device = select_device(config)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let stream_config = select_config(&device, config)?;
    let channels = stream_config.channels as usize;
    let frames = match stream_config.buffer_size {
        CpalBufferSize::Fixed(frames) => Some(frames),
        CpalBufferSize::Default => None,
    };

    log::info!(
        "Audio config: {} channels, {}Hz, {} buffer",
        channels,
        stream_config.sample_rate.0,
        frames
            .map(|f| format!("{} frames", f))
            .unwrap_or_else(|| "default".to_string())
    );

    let mut mixer = BusMixer::new(frames.map(|f| f as usize).unwrap_or(MAX_BUFFER_SIZE));
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                mixer.render(&buses, data, channels);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamOpen(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamStart(e.to_string()))?;

    log::info!("Audio stream started");
    Ok((stream, frames))
}
