//! Input buses and the mixer that drains them
//!
//! Each playing session owns one bus. The delivering thread (device
//! callback or offline renderer) snapshots the active buses under a short
//! lock, then pulls every bus outside the lock and sums the result.
//!
//! ```text
//!  bus 0 ── pull(mono) ──► × volume ─┐
//!  bus 1 ── pull(mono) ──► × volume ─┼─► Σ ─► clip ±0.98 ─► every channel
//!  bus n ── (muted, skipped)         ┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::error::{AudioError, AudioResult};

/// Maximum number of concurrently allocated buses
pub const MAX_BUSES: usize = 16;

/// Output limiter threshold
pub const CLIP_LEVEL: f32 = 0.98;

/// Pull callback: fill the mono slice, return frames produced
pub type PullFn = Arc<dyn Fn(&mut [f32]) -> usize + Send + Sync>;

/// Handle to an allocated bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusId(pub usize);

#[derive(Default)]
struct Bus {
    in_use: bool,
    volume: f32,
    muted: bool,
    callback: Option<PullFn>,
}

/// Fixed table of input buses
pub struct BusTable {
    buses: Mutex<Vec<Bus>>,
}

impl BusTable {
    pub fn new() -> Self {
        Self {
            buses: Mutex::new((0..MAX_BUSES).map(|_| Bus::default()).collect()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Bus>> {
        self.buses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the first free bus (volume 1.0, unmuted, no callback)
    pub fn acquire(&self) -> AudioResult<BusId> {
        let mut buses = self.lock();
        let (index, bus) = buses
            .iter_mut()
            .enumerate()
            .find(|(_, b)| !b.in_use)
            .ok_or(AudioError::NoFreeBus(MAX_BUSES))?;
        *bus = Bus {
            in_use: true,
            volume: 1.0,
            muted: false,
            callback: None,
        };
        log::debug!("acquire: bus {}", index);
        Ok(BusId(index))
    }

    pub fn release(&self, bus: BusId) {
        if let Some(b) = self.lock().get_mut(bus.0) {
            *b = Bus::default();
        }
    }

    /// Set bus volume (clamped to 0..=1)
    pub fn set_volume(&self, bus: BusId, volume: f32) {
        if let Some(b) = self.lock().get_mut(bus.0).filter(|b| b.in_use) {
            b.volume = volume.clamp(0.0, 1.0);
        }
    }

    pub fn set_muted(&self, bus: BusId, muted: bool) {
        if let Some(b) = self.lock().get_mut(bus.0).filter(|b| b.in_use) {
            b.muted = muted;
        }
    }

    pub fn set_callback(&self, bus: BusId, callback: Option<PullFn>) {
        if let Some(b) = self.lock().get_mut(bus.0).filter(|b| b.in_use) {
            b.callback = callback;
        }
    }

    pub fn volume(&self, bus: BusId) -> Option<f32> {
        self.lock().get(bus.0).filter(|b| b.in_use).map(|b| b.volume)
    }

    pub fn is_muted(&self, bus: BusId) -> Option<bool> {
        self.lock().get(bus.0).filter(|b| b.in_use).map(|b| b.muted)
    }

    pub fn in_use(&self) -> usize {
        self.lock().iter().filter(|b| b.in_use).count()
    }

    /// Copy out (callback, volume) of every audible bus
    fn snapshot(&self, out: &mut Vec<(PullFn, f32)>) {
        out.clear();
        let buses = self.lock();
        for bus in buses.iter().filter(|b| b.in_use && !b.muted) {
            if let Some(cb) = &bus.callback {
                out.push((Arc::clone(cb), bus.volume));
            }
        }
    }
}

impl Default for BusTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Sums all audible buses into an interleaved output buffer
///
/// Owned by the delivering thread. Buffers are pre-allocated for
/// `max_frames`; larger requests grow them once.
pub struct BusMixer {
    active: Vec<(PullFn, f32)>,
    scratch: Vec<f32>,
    mix: Vec<f32>,
}

impl BusMixer {
    pub fn new(max_frames: usize) -> Self {
        Self {
            active: Vec::with_capacity(MAX_BUSES),
            scratch: vec![0.0; max_frames],
            mix: vec![0.0; max_frames],
        }
    }

    /// Fill `out` (interleaved, `channels` wide) from the bus table
    pub fn render(&mut self, table: &BusTable, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        if frames > self.mix.len() {
            self.mix.resize(frames, 0.0);
            self.scratch.resize(frames, 0.0);
        }

        let mix = &mut self.mix[..frames];
        mix.fill(0.0);

        table.snapshot(&mut self.active);
        for (pull, volume) in self.active.drain(..) {
            let scratch = &mut self.scratch[..frames];
            scratch.fill(0.0);
            let produced = pull(scratch).min(frames);
            for (m, s) in mix[..produced].iter_mut().zip(&scratch[..produced]) {
                *m += s * volume;
            }
        }

        for (frame, &sample) in out.chunks_exact_mut(channels).zip(mix.iter()) {
            frame.fill(sample.clamp(-CLIP_LEVEL, CLIP_LEVEL));
        }
        // Trailing partial frame, if any
        let whole = frames * channels;
        out[whole..].fill(0.0);
    }
}
