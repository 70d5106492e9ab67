//! Output backend configuration

use serde::{Deserialize, Serialize};

/// Maximum device buffer the mixer pre-allocates for (frames)
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Default buffer size when no preference is specified (frames)
/// 480 frames is 10ms at 48kHz, half an Opus frame
pub const DEFAULT_BUFFER_SIZE: u32 = 480;

/// Preferred buffer size for the device stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// Let the system choose the default buffer size
    #[default]
    Default,
    /// Request a specific buffer size in frames (may be adjusted by the system)
    Fixed(u32),
    /// Small buffer for interactive use
    LowLatency,
}

impl BufferSize {
    /// Frames to request from the device, or None for the system default
    pub fn as_frames(&self) -> Option<u32> {
        match self {
            BufferSize::Default => None,
            BufferSize::Fixed(frames) => Some((*frames).clamp(64, MAX_BUFFER_SIZE as u32)),
            BufferSize::LowLatency => Some(240),
        }
    }

    /// Latency in milliseconds at a given sample rate
    pub fn latency_ms(&self, sample_rate: u32) -> Option<f32> {
        self.as_frames()
            .map(|frames| (frames as f32 / sample_rate as f32) * 1000.0)
    }
}

/// Configuration for the device output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Device name as reported by the system; None selects the default device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    pub buffer_size: BufferSize,
    /// Output channel count (mono buses are duplicated across all of them)
    pub channels: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            buffer_size: BufferSize::Default,
            channels: 2,
        }
    }
}
