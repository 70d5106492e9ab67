//! Demux + decode for one Opus-in-Ogg stream

use std::io::{Read, Seek, SeekFrom};

use super::page_index::{PageIndex, PageStartPos};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::ogg::{OggPacket, PacketAssembler, PageSync};
use crate::opus::{DecoderFactory, OpusHeader, PacketDecoder};
use crate::types::{samples_to_ms, MAX_FRAME_SIZE};

/// Default number of bytes pulled from the reader per refill
pub const DEFAULT_READ_CHUNK: usize = 16384;

/// An opened Opus-in-Ogg stream with its seek index
///
/// Opening scans the whole file once to validate the header and build the
/// [`PageIndex`], then rewinds so packets can be read from the start.
pub struct OggOpusStream<R: Read + Seek> {
    reader: R,
    sync: PageSync,
    packets: PacketAssembler,
    serial: u32,
    header: OpusHeader,
    decoder: Box<dyn PacketDecoder>,
    index: PageIndex,
    duration_ms: u32,
    chunk: Vec<u8>,
    /// Interleaved decode scratch (MAX_FRAME_SIZE frames of every channel)
    pcm: Vec<f32>,
    eof: bool,
    /// Granule position of the last page handed to the packet assembler
    page_granule: i64,
}

impl<R: Read + Seek> OggOpusStream<R> {
    /// Parse the stream, build the page index and create a decoder
    pub fn open(reader: R, decoders: &dyn DecoderFactory, read_chunk: usize) -> EngineResult<Self> {
        let mut reader = reader;
        let mut sync = PageSync::new();
        let mut packets = PacketAssembler::new();
        let mut chunk = vec![0u8; read_chunk.max(64)];
        let mut index = PageIndex::new();
        let mut header: Option<(u32, OpusHeader)> = None;

        reader
            .seek(SeekFrom::Start(0))
            .map_err(|e| EngineError::new(ErrorKind::SeekError, e.to_string()))?;

        loop {
            let n = read_some(&mut reader, &mut chunk)?;
            if n == 0 {
                break;
            }
            sync.feed(&chunk[..n]);

            while let Some(page) = sync.next_page() {
                match header {
                    None => {
                        packets.init(page.serial);
                        packets.push_page(&page)?;
                        let first = packets.next_packet().ok_or_else(|| {
                            EngineError::new(
                                ErrorKind::OggPacketCorrupt,
                                "first page carries no complete packet",
                            )
                        })?;
                        header = Some((page.serial, OpusHeader::parse(&first.data)?));
                    }
                    Some((serial, _)) if page.serial != serial => {
                        log::debug!(
                            "open: ignoring page of foreign stream {:#x} at offset {}",
                            page.serial,
                            page.offset
                        );
                        continue;
                    }
                    Some(_) => {}
                }
                index.push(page.offset, page.total_len(), page.granule_position);
            }
        }

        let (serial, header) = header.ok_or_else(|| {
            EngineError::new(ErrorKind::OggSyncError, "no Ogg page found in input")
        })?;

        let last_granule = index.last_granule().ok_or_else(|| {
            EngineError::new(ErrorKind::OggMetadataError, "stream has no granule position")
        })?;
        let duration_ms = samples_to_ms(last_granule - header.pre_skip as i64);

        let decoder = decoders.create(&header)?;
        let pcm = vec![0.0; MAX_FRAME_SIZE * decoder.channels()];

        log::info!(
            "open: {} ch, pre-skip {}, {} pages, {} ms",
            header.channels,
            header.pre_skip,
            index.len(),
            duration_ms
        );

        let mut stream = Self {
            reader,
            sync,
            packets,
            serial,
            header,
            decoder,
            index,
            duration_ms,
            chunk,
            pcm,
            eof: false,
            page_granule: 0,
        };
        stream.rewind()?;
        Ok(stream)
    }

    pub fn header(&self) -> &OpusHeader {
        &self.header
    }

    pub fn pre_skip(&self) -> i64 {
        self.header.pre_skip as i64
    }

    pub fn page_index(&self) -> &PageIndex {
        &self.index
    }

    pub fn duration_ms(&self) -> u32 {
        self.duration_ms
    }

    /// Granule position of the most recently read page
    pub fn page_granule(&self) -> i64 {
        self.page_granule
    }

    /// Reposition to the start of the file with clean sync/stream state
    pub fn rewind(&mut self) -> EngineResult<()> {
        self.seek_to_offset(0)
    }

    /// Reposition to a page boundary
    ///
    /// The decoder is reset too: packets after the new position have no
    /// relation to what was decoded before.
    pub fn seek_to_offset(&mut self, offset: u64) -> EngineResult<()> {
        self.reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| EngineError::new(ErrorKind::SeekError, e.to_string()))?;
        self.sync.reset(offset);
        self.packets.reset();
        self.decoder.reset()?;
        self.eof = false;
        self.page_granule = 0;
        Ok(())
    }

    /// See [`PageIndex::find_page_start_pos`]
    pub fn find_page_start_pos(&self, target: i64) -> Option<PageStartPos> {
        self.index.find_page_start_pos(target)
    }

    /// Next packet of the stream, `None` at end of file
    pub fn next_packet(&mut self) -> EngineResult<Option<OggPacket>> {
        loop {
            if let Some(packet) = self.packets.next_packet() {
                return Ok(Some(packet));
            }
            if let Some(page) = self.sync.next_page() {
                if page.serial != self.serial {
                    continue;
                }
                if page.has_granule() {
                    self.page_granule = page.granule_position;
                }
                self.packets.push_page(&page)?;
                continue;
            }
            if self.eof {
                return Ok(None);
            }
            let n = read_some(&mut self.reader, &mut self.chunk)?;
            if n == 0 {
                self.eof = true;
            } else {
                self.sync.feed(&self.chunk[..n]);
            }
        }
    }

    /// Decode one packet to mono
    ///
    /// `out` must hold at least [`MAX_FRAME_SIZE`] samples. Stereo is
    /// averaged down to one channel. Returns the number of frames written.
    pub fn decode_mono(&mut self, packet: &[u8], out: &mut [f32]) -> EngineResult<usize> {
        let channels = self.decoder.channels();
        let frames = self.decoder.decode(packet, &mut self.pcm)?;
        let frames = frames.min(MAX_FRAME_SIZE).min(out.len());

        match channels {
            1 => out[..frames].copy_from_slice(&self.pcm[..frames]),
            _ => {
                for (dst, frame) in out[..frames]
                    .iter_mut()
                    .zip(self.pcm.chunks_exact(channels))
                {
                    *dst = frame.iter().sum::<f32>() / channels as f32;
                }
            }
        }
        Ok(frames)
    }
}

fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> EngineResult<usize> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(EngineError::new(ErrorKind::FileReadError, e.to_string())),
        }
    }
}
