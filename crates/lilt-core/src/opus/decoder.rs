//! Packet decoder seam
//!
//! The session only needs "one compressed packet in, interleaved float PCM
//! out". [`OpusPacketDecoder`] provides that on top of libopus; tests and
//! alternative hosts plug in their own [`DecoderFactory`].

use opusic_c::{Channels, Decoder, SampleRate};

use super::header::OpusHeader;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::types::MAX_DECODE_CHANNELS;

/// Decodes one packet at a time into interleaved f32 PCM at 48kHz
pub trait PacketDecoder: Send {
    fn channels(&self) -> usize;

    /// Decode `packet` into `out` (interleaved); returns frames per channel
    fn decode(&mut self, packet: &[u8], out: &mut [f32]) -> EngineResult<usize>;

    /// Forget inter-packet state (after repositioning the stream)
    fn reset(&mut self) -> EngineResult<()>;
}

/// Creates a decoder matching a stream's identification header
pub trait DecoderFactory: Send + Sync {
    fn create(&self, header: &OpusHeader) -> EngineResult<Box<dyn PacketDecoder>>;
}

enum Inner {
    Mono(Decoder),
    Stereo(Decoder),
}

/// libopus decoder for mono or stereo streams
pub struct OpusPacketDecoder {
    inner: Inner,
}

impl OpusPacketDecoder {
    pub fn new(channels: usize) -> EngineResult<Self> {
        let inner = match channels {
            1 => Decoder::new(Channels::Mono, SampleRate::Hz48000).map(Inner::Mono),
            2 => Decoder::new(Channels::Stereo, SampleRate::Hz48000).map(Inner::Stereo),
            other => {
                return Err(EngineError::new(
                    ErrorKind::DecoderError,
                    format!(
                        "unsupported channel count {} (max {})",
                        other, MAX_DECODE_CHANNELS
                    ),
                ))
            }
        }
        .map_err(|e| {
            EngineError::new(
                ErrorKind::DecoderError,
                format!("failed to create Opus decoder: {:?}", e),
            )
        })?;

        Ok(Self { inner })
    }
}

impl PacketDecoder for OpusPacketDecoder {
    fn channels(&self) -> usize {
        match self.inner {
            Inner::Mono(_) => 1,
            Inner::Stereo(_) => 2,
        }
    }

    fn decode(&mut self, packet: &[u8], out: &mut [f32]) -> EngineResult<usize> {
        let result = match &mut self.inner {
            Inner::Mono(decoder) => decoder.decode_float_to_slice(packet, out, false),
            Inner::Stereo(decoder) => decoder.decode_float_to_slice(packet, out, false),
        };
        result.map_err(|e| {
            EngineError::new(ErrorKind::OpusDecodeError, format!("opus decode failed: {:?}", e))
        })
    }

    fn reset(&mut self) -> EngineResult<()> {
        let result = match &mut self.inner {
            Inner::Mono(decoder) => decoder.reset(),
            Inner::Stereo(decoder) => decoder.reset(),
        };
        result.map_err(|e| {
            EngineError::new(ErrorKind::DecoderError, format!("opus reset failed: {:?}", e))
        })
    }
}

/// Default factory producing [`OpusPacketDecoder`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct OpusDecoderFactory;

impl DecoderFactory for OpusDecoderFactory {
    fn create(&self, header: &OpusHeader) -> EngineResult<Box<dyn PacketDecoder>> {
        if header.mapping_family != 0 && header.channels as usize > MAX_DECODE_CHANNELS {
            return Err(EngineError::new(
                ErrorKind::DecoderError,
                format!("multichannel mapping family {} not supported", header.mapping_family),
            ));
        }
        Ok(Box::new(OpusPacketDecoder::new(header.channels as usize)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_surround() {
        let header = OpusHeader {
            version: 1,
            channels: 6,
            pre_skip: 312,
            input_sample_rate: 48000,
            output_gain: 0,
            mapping_family: 1,
        };
        let err = OpusDecoderFactory.create(&header).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DecoderError);
    }

    #[test]
    fn test_creates_mono_and_stereo() {
        assert_eq!(OpusPacketDecoder::new(1).unwrap().channels(), 1);
        assert_eq!(OpusPacketDecoder::new(2).unwrap().channels(), 2);
    }
}
