//! Engine tuning

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::OutputConfig;
use crate::types::FRAME_SIZE;

/// Engine configuration
///
/// Every field has a default; a YAML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ring buffer slots per session (one is always kept free)
    /// Default: 7680 samples, eight Opus frames (160ms)
    pub ring_buffer_capacity: usize,

    /// Decode until the ring buffer has less than this fraction free
    /// Default: 0.5
    pub refill_threshold: f32,

    /// How far before a seek target decoding restarts, in ms
    /// Default: 40
    pub preroll_ms: u32,

    /// Upper bound on live sessions
    /// Default: 8
    pub max_sessions: usize,

    /// How long a composite play command may take before the caller gets
    /// `Timeout`, in ms
    /// Default: 5000
    pub command_timeout_ms: u64,

    /// Command worker threads (0 = one per available core)
    pub worker_threads: usize,

    /// Pending notification events before progress events are dropped
    /// Default: 1024
    pub notification_capacity: usize,

    /// Bytes read from the file per refill
    /// Default: 16384
    pub read_chunk_size: usize,

    /// Use the cheaper time-stretch preset
    pub cheap_stretch: bool,

    pub output: OutputConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_buffer_capacity: FRAME_SIZE * 8,
            refill_threshold: 0.5,
            preroll_ms: 40,
            max_sessions: 8,
            command_timeout_ms: 5000,
            worker_threads: 0,
            notification_capacity: 1024,
            read_chunk_size: 16384,
            cheap_stretch: false,
            output: OutputConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Worker count with 0 resolved to the available parallelism
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            return self.worker_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
    }

    /// Free slots below which the session keeps decoding
    pub fn refill_watermark(&self) -> usize {
        let fraction = self.refill_threshold.clamp(0.05, 1.0);
        ((self.ring_buffer_capacity as f32 * fraction) as usize).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.ring_buffer_capacity, 7680);
        assert_eq!(config.refill_watermark(), 3840);
        assert_eq!(config.command_timeout(), Duration::from_secs(5));
        assert!(config.resolved_worker_threads() >= 1);
    }

    #[test]
    fn test_partial_yaml() {
        let config: EngineConfig = serde_yaml::from_str("max_sessions: 2\noutput:\n  channels: 1\n").unwrap();
        assert_eq!(config.max_sessions, 2);
        assert_eq!(config.output.channels, 1);
        assert_eq!(config.preroll_ms, 40);
    }
}
