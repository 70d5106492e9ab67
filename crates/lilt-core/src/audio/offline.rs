//! Deviceless output driven by the caller
//!
//! Used for rendering to a file and by tests: nothing happens until
//! [`OfflineOutput::render`] is called, which runs the same mixer a device
//! callback would.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use super::bus::{BusMixer, BusTable};
use super::config::DEFAULT_BUFFER_SIZE;
use super::error::AudioResult;
use super::AudioOutput;

pub struct OfflineOutput {
    buses: BusTable,
    mixer: Mutex<BusMixer>,
    channels: usize,
    running: AtomicBool,
}

impl OfflineOutput {
    pub fn new(channels: usize) -> Self {
        Self {
            buses: BusTable::new(),
            mixer: Mutex::new(BusMixer::new(DEFAULT_BUFFER_SIZE as usize)),
            channels: channels.max(1),
            running: AtomicBool::new(false),
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Render `frames` frames of interleaved output
    ///
    /// Produces silence while stopped.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * self.channels];
        self.render_into(&mut out);
        out
    }

    /// Render into a caller buffer (interleaved)
    pub fn render_into(&self, out: &mut [f32]) {
        if !self.is_running() {
            out.fill(0.0);
            return;
        }
        let mut mixer = self.mixer.lock().unwrap_or_else(PoisonError::into_inner);
        mixer.render(&self.buses, out, self.channels);
    }
}

impl AudioOutput for OfflineOutput {
    fn buses(&self) -> &BusTable {
        &self.buses
    }

    fn start(&self) -> AudioResult<()> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}
