//! Time-stretching via signalsmith-stretch
//!
//! The session changes playback speed without changing pitch by pushing
//! decoded mono frames through a [`TimeStretch`] at time ratio `1 / speed`
//! and writing whatever comes out into the ring buffer.
//!
//! ```text
//!   960 frames ──► process() ──► FIFO ──► retrieve() ──► ring buffer
//!                 (ratio 0.5)    480 frames
//! ```

use std::collections::VecDeque;

use signalsmith_stretch::Stretch;

use crate::types::SAMPLE_RATE;

/// Stretcher contract used by the session
///
/// The time ratio is output length over input length: 0.5 halves the
/// duration (double speed), 2.0 doubles it (half speed).
pub trait TimeStretch: Send {
    fn set_time_ratio(&mut self, ratio: f64);

    fn time_ratio(&self) -> f64;

    /// Push mono input frames
    fn process(&mut self, input: &[f32]);

    /// Frames ready to retrieve
    fn available(&self) -> usize;

    /// Pop up to `out.len()` frames; returns the number written
    fn retrieve(&mut self, out: &mut [f32]) -> usize;

    /// Drop internal history and pending output
    fn reset(&mut self);
}

/// Creates one stretcher per session
pub trait StretcherFactory: Send + Sync {
    fn create(&self) -> Box<dyn TimeStretch>;
}

/// Mono only
const CHANNELS: u32 = 1;

/// Pitch-preserving stretcher for mono playback
pub struct SignalsmithStretcher {
    /// The underlying signalsmith stretcher
    stretcher: Stretch,
    ratio: f64,
    /// Scratch for one `process` call's output
    scratch: Vec<f32>,
    fifo: VecDeque<f32>,
}

impl SignalsmithStretcher {
    /// Create a stretcher at the engine sample rate
    pub fn new() -> Self {
        Self::with_stretch(Stretch::preset_default(CHANNELS, SAMPLE_RATE))
    }

    /// Faster, lower quality variant
    ///
    /// Uses signalsmith-stretch's `preset_cheaper`; useful on weak devices
    /// where several sessions stretch at once.
    pub fn new_cheaper() -> Self {
        Self::with_stretch(Stretch::preset_cheaper(CHANNELS, SAMPLE_RATE))
    }

    fn with_stretch(stretcher: Stretch) -> Self {
        Self {
            stretcher,
            ratio: 1.0,
            scratch: Vec::new(),
            fifo: VecDeque::new(),
        }
    }

    /// Input latency in samples
    pub fn input_latency(&self) -> usize {
        self.stretcher.input_latency()
    }

    /// Output latency in samples
    pub fn output_latency(&self) -> usize {
        self.stretcher.output_latency()
    }
}

impl Default for SignalsmithStretcher {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeStretch for SignalsmithStretcher {
    fn set_time_ratio(&mut self, ratio: f64) {
        if ratio.is_finite() && ratio > 0.0 {
            self.ratio = ratio;
        }
    }

    fn time_ratio(&self) -> f64 {
        self.ratio
    }

    fn process(&mut self, input: &[f32]) {
        if input.is_empty() {
            return;
        }
        // signalsmith derives the ratio from the input/output length pair
        let output_len = (input.len() as f64 * self.ratio).round() as usize;
        if output_len == 0 {
            return;
        }
        self.scratch.clear();
        self.scratch.resize(output_len, 0.0);
        self.stretcher.process(input, &mut self.scratch[..]);
        self.fifo.extend(self.scratch.iter().copied());
    }

    fn available(&self) -> usize {
        self.fifo.len()
    }

    fn retrieve(&mut self, out: &mut [f32]) -> usize {
        let count = out.len().min(self.fifo.len());
        for (dst, src) in out[..count].iter_mut().zip(self.fifo.drain(..count)) {
            *dst = src;
        }
        count
    }

    fn reset(&mut self) {
        self.stretcher.reset();
        self.fifo.clear();
    }
}

/// Default factory producing [`SignalsmithStretcher`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalsmithFactory {
    /// Use `preset_cheaper` instead of `preset_default`
    pub cheaper: bool,
}

impl StretcherFactory for SignalsmithFactory {
    fn create(&self) -> Box<dyn TimeStretch> {
        if self.cheaper {
            Box::new(SignalsmithStretcher::new_cheaper())
        } else {
            Box::new(SignalsmithStretcher::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stretcher_creation() {
        let stretcher = SignalsmithStretcher::new();
        assert_eq!(stretcher.time_ratio(), 1.0);
        assert!(stretcher.input_latency() > 0);
        assert!(stretcher.output_latency() > 0);
    }

    #[test]
    fn test_output_length_follows_ratio() {
        let mut stretcher = SignalsmithStretcher::new();
        let input = vec![0.0; 960];

        stretcher.set_time_ratio(0.5);
        stretcher.process(&input);
        assert_eq!(stretcher.available(), 480);

        stretcher.set_time_ratio(1.0 / 1.5);
        stretcher.process(&input);
        assert_eq!(stretcher.available(), 480 + 640);

        let mut out = vec![1.0; 2000];
        assert_eq!(stretcher.retrieve(&mut out), 1120);
        assert_eq!(stretcher.available(), 0);
    }

    #[test]
    fn test_rejects_nonsense_ratio() {
        let mut stretcher = SignalsmithStretcher::new();
        stretcher.set_time_ratio(0.0);
        stretcher.set_time_ratio(f64::NAN);
        assert_eq!(stretcher.time_ratio(), 1.0);
    }

    #[test]
    fn test_reset_drops_pending_output() {
        let mut stretcher = SignalsmithStretcher::new_cheaper();
        stretcher.set_time_ratio(2.0);
        stretcher.process(&[0.0; 256]);
        assert_eq!(stretcher.available(), 512);
        stretcher.reset();
        assert_eq!(stretcher.available(), 0);
    }
}
