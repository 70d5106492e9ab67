//! Common types for lilt
//!
//! Fundamental constants shared by the decoder, the session and the output
//! backends. The engine is mono downstream of decode and always runs at the
//! Opus native rate.

/// Sample rate of everything past the decoder (Opus always decodes at 48kHz)
pub const SAMPLE_RATE: u32 = 48000;

/// Samples per millisecond at [`SAMPLE_RATE`]
pub const SAMPLES_PER_MS: i64 = (SAMPLE_RATE / 1000) as i64;

/// Standard Opus frame (20ms at 48kHz)
pub const FRAME_SIZE: usize = 960;

/// Largest frame a single Opus packet can decode to (120ms at 48kHz)
pub const MAX_FRAME_SIZE: usize = 6 * FRAME_SIZE;

/// Largest channel count the engine decodes (anything wider is rejected)
pub const MAX_DECODE_CHANNELS: usize = 2;

/// Audio sample type
pub type Sample = f32;

/// Convert a granule/PCM position (48kHz units, pre-skip already removed)
/// to whole milliseconds.
#[inline]
pub fn samples_to_ms(samples: i64) -> u32 {
    if samples <= 0 {
        return 0;
    }
    (samples * 1000 / SAMPLE_RATE as i64).min(u32::MAX as i64) as u32
}

/// Convert milliseconds to a PCM position in 48kHz units.
///
/// Whole seconds and the sub-second remainder are converted separately so
/// the result is exact for every millisecond value.
#[inline]
pub fn ms_to_samples(ms: u32) -> i64 {
    let whole_seconds = (ms / 1000) as i64;
    let remainder_ms = (ms % 1000) as i64;
    whole_seconds * SAMPLE_RATE as i64 + remainder_ms * SAMPLES_PER_MS
}
