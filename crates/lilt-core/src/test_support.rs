//! Test fixtures: synthetic Opus-in-Ogg files and fake DSP
//!
//! Fixture packets do not hold Opus data. Each carries the absolute PCM
//! position of its first sample (u64 LE) and its frame count (u16 LE);
//! [`FakeDecoder`] turns that into samples whose value *is* their
//! position, so tests can assert exactly which samples were played.

use std::path::PathBuf;
use std::sync::Arc;

use crate::audio::{AudioOutput, OfflineOutput};
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::ogg::{OggPage, FLAG_BOS, FLAG_CONTINUED, FLAG_EOS, NO_GRANULE};
use crate::opus::{DecoderFactory, OpusHeader, PacketDecoder};
use crate::timestretch::{StretcherFactory, TimeStretch};
use crate::types::FRAME_SIZE;

const FIXTURE_SERIAL: u32 = 0x4c49_4c54;

pub(crate) struct FixtureSpec {
    pub pre_skip: u16,
    /// Final granule position (pre-skip included)
    pub total_samples: i64,
    pub channels: u8,
    pub packets_per_page: usize,
    pub strip_granules: bool,
    /// Corrupt the OpusHead magic
    pub bad_magic: bool,
    /// Pad every audio packet to this many bytes (minimum 10)
    pub packet_bytes: usize,
    /// Lay audio out like a streaming muxer: cut a page once its body
    /// reaches this many bytes, splitting packets across pages. Overrides
    /// `packets_per_page`.
    pub page_body_bytes: Option<usize>,
}

impl Default for FixtureSpec {
    fn default() -> Self {
        // 5000 ms after pre-skip
        Self {
            pre_skip: 312,
            total_samples: 240_312,
            channels: 1,
            packets_per_page: 5,
            strip_granules: false,
            bad_magic: false,
            packet_bytes: 10,
            page_body_bytes: None,
        }
    }
}

fn page(header_type: u8, granule: i64, sequence: u32, packets: &[Vec<u8>]) -> Vec<u8> {
    let mut lacing = Vec::new();
    let mut body = Vec::new();
    for packet in packets {
        let mut left = packet.len();
        while left >= 255 {
            lacing.push(255);
            left -= 255;
        }
        lacing.push(left as u8);
        body.extend_from_slice(packet);
    }
    OggPage {
        offset: 0,
        header_type,
        granule_position: granule,
        serial: FIXTURE_SERIAL,
        sequence,
        lacing,
        body,
    }
    .to_bytes()
}

/// Build a complete Ogg file in memory
pub(crate) fn ogg_fixture(spec: &FixtureSpec) -> Vec<u8> {
    let granule = |g: i64| if spec.strip_granules { NO_GRANULE } else { g };

    let mut head = OpusHeader {
        version: 1,
        channels: spec.channels,
        pre_skip: spec.pre_skip,
        input_sample_rate: 48_000,
        output_gain: 0,
        mapping_family: 0,
    }
    .to_bytes();
    if spec.bad_magic {
        head[..8].copy_from_slice(b"OpusHeaX");
    }
    let mut tags = b"OpusTags".to_vec();
    tags.extend_from_slice(&4u32.to_le_bytes());
    tags.extend_from_slice(b"lilt");
    tags.extend_from_slice(&0u32.to_le_bytes());

    let mut out = page(FLAG_BOS, granule(0), 0, &[head]);
    out.extend(page(0, granule(0), 1, &[tags]));

    // (packet, granule position at its end)
    let mut audio = Vec::new();
    let mut position = 0i64;
    while position < spec.total_samples {
        let frames = (spec.total_samples - position).min(FRAME_SIZE as i64);
        let mut packet = (position as u64).to_le_bytes().to_vec();
        packet.extend_from_slice(&(frames as u16).to_le_bytes());
        packet.resize(spec.packet_bytes.max(10), 0xaa);
        position += frames;
        audio.push((packet, position));
    }

    match spec.page_body_bytes {
        None => {
            let pages = audio.chunks(spec.packets_per_page.max(1));
            let count = pages.len();
            for (i, chunk) in pages.enumerate() {
                let flags = if i + 1 == count { FLAG_EOS } else { 0 };
                let end = chunk.last().map_or(0, |(_, end)| *end);
                let packets: Vec<Vec<u8>> = chunk.iter().map(|(p, _)| p.clone()).collect();
                out.extend(page(flags, granule(end), 2 + i as u32, &packets));
            }
        }
        Some(limit) => out.extend(mux_split(&audio, limit, spec.strip_granules)),
    }
    out
}

/// Pack packets into pages of about `limit` body bytes, continuing packets
/// across page boundaries
fn mux_split(audio: &[(Vec<u8>, i64)], limit: usize, strip_granules: bool) -> Vec<u8> {
    // (packet, byte offset, length, completes the packet)
    let mut segments = Vec::new();
    for (i, (packet, _)) in audio.iter().enumerate() {
        let mut offset = 0;
        loop {
            let len = (packet.len() - offset).min(255);
            segments.push((i, offset, len, len < 255));
            offset += len;
            if len < 255 {
                break;
            }
        }
    }

    let mut out = Vec::new();
    let mut segments = segments.into_iter().peekable();
    let mut sequence = 2;
    let mut continued = false;
    while segments.peek().is_some() {
        let mut lacing = Vec::new();
        let mut body = Vec::new();
        let mut granule_position = NO_GRANULE;
        let mut flags = if continued { FLAG_CONTINUED } else { 0 };

        while let Some(&(i, offset, len, last)) = segments.peek() {
            if lacing.len() == 255 || body.len() >= limit {
                break;
            }
            segments.next();
            lacing.push(len as u8);
            body.extend_from_slice(&audio[i].0[offset..offset + len]);
            continued = !last;
            if last && !strip_granules {
                granule_position = audio[i].1;
            }
        }
        if segments.peek().is_none() {
            flags |= FLAG_EOS;
        }

        out.extend(
            OggPage {
                offset: 0,
                header_type: flags,
                granule_position,
                serial: FIXTURE_SERIAL,
                sequence,
                lacing,
                body,
            }
            .to_bytes(),
        );
        sequence += 1;
    }
    out
}

/// Write a fixture into a fresh temp dir
pub(crate) fn fixture_file(spec: &FixtureSpec) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clip.opus");
    std::fs::write(&path, ogg_fixture(spec)).unwrap();
    (dir, path)
}

pub(crate) struct FakeDecoder {
    channels: usize,
}

impl PacketDecoder for FakeDecoder {
    fn channels(&self) -> usize {
        self.channels
    }

    fn decode(&mut self, packet: &[u8], out: &mut [f32]) -> EngineResult<usize> {
        if packet.len() < 10 {
            return Err(EngineError::new(ErrorKind::OpusDecodeError, "short fake packet"));
        }
        let mut start = [0u8; 8];
        start.copy_from_slice(&packet[..8]);
        let start = u64::from_le_bytes(start);
        let frames = u16::from_le_bytes([packet[8], packet[9]]) as usize;

        for (i, frame) in out
            .chunks_exact_mut(self.channels)
            .take(frames)
            .enumerate()
        {
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = (start + i as u64) as f32 + ch as f32;
            }
        }
        Ok(frames)
    }

    fn reset(&mut self) -> EngineResult<()> {
        Ok(())
    }
}

pub(crate) struct FakeDecoderFactory;

impl DecoderFactory for FakeDecoderFactory {
    fn create(&self, header: &OpusHeader) -> EngineResult<Box<dyn PacketDecoder>> {
        Ok(Box::new(FakeDecoder {
            channels: header.channels as usize,
        }))
    }
}

/// Nearest-sample stretcher: output `i` is input `floor(i / ratio)`
pub(crate) struct PickStretcher {
    ratio: f64,
    fifo: Vec<f32>,
}

impl TimeStretch for PickStretcher {
    fn set_time_ratio(&mut self, ratio: f64) {
        self.ratio = ratio;
    }

    fn time_ratio(&self) -> f64 {
        self.ratio
    }

    fn process(&mut self, input: &[f32]) {
        let len = (input.len() as f64 * self.ratio).round() as usize;
        for i in 0..len {
            let src = ((i as f64 / self.ratio) as usize).min(input.len() - 1);
            self.fifo.push(input[src]);
        }
    }

    fn available(&self) -> usize {
        self.fifo.len()
    }

    fn retrieve(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.fifo.len());
        out[..n].copy_from_slice(&self.fifo[..n]);
        self.fifo.drain(..n);
        n
    }

    fn reset(&mut self) {
        self.fifo.clear();
    }
}

pub(crate) struct PickStretcherFactory;

impl StretcherFactory for PickStretcherFactory {
    fn create(&self) -> Box<dyn TimeStretch> {
        Box::new(PickStretcher {
            ratio: 1.0,
            fifo: Vec::new(),
        })
    }
}

/// Context over a started offline output with fake DSP
pub(crate) fn test_context(config: EngineConfig) -> (Arc<EngineContext>, Arc<OfflineOutput>) {
    let output = Arc::new(OfflineOutput::new(1));
    output.start().unwrap();
    let context = EngineContext::new(config, output.clone())
        .with_decoders(Arc::new(FakeDecoderFactory))
        .with_stretchers(Arc::new(PickStretcherFactory));
    (Arc::new(context), output)
}
