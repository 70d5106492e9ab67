//! Shared engine collaborators
//!
//! One [`EngineContext`] is built by the host and shared (`Arc`) by the
//! registry and every session. It replaces process-wide state: two engines
//! in one process simply use two contexts.

use std::sync::Arc;

use crate::audio::AudioOutput;
use crate::config::EngineConfig;
use crate::notify::NotificationHub;
use crate::opus::{DecoderFactory, OpusDecoderFactory};
use crate::timestretch::{SignalsmithFactory, StretcherFactory};

pub struct EngineContext {
    pub config: EngineConfig,
    pub output: Arc<dyn AudioOutput>,
    pub decoders: Arc<dyn DecoderFactory>,
    pub stretchers: Arc<dyn StretcherFactory>,
    pub notifications: NotificationHub,
}

impl EngineContext {
    /// Context with the libopus decoder and signalsmith stretcher
    pub fn new(config: EngineConfig, output: Arc<dyn AudioOutput>) -> Self {
        let stretchers = Arc::new(SignalsmithFactory {
            cheaper: config.cheap_stretch,
        });
        Self {
            notifications: NotificationHub::new(config.notification_capacity),
            config,
            output,
            decoders: Arc::new(OpusDecoderFactory),
            stretchers,
        }
    }

    pub fn with_decoders(mut self, decoders: Arc<dyn DecoderFactory>) -> Self {
        self.decoders = decoders;
        self
    }

    pub fn with_stretchers(mut self, stretchers: Arc<dyn StretcherFactory>) -> Self {
        self.stretchers = stretchers;
        self
    }
}
