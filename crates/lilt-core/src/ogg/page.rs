//! Ogg page capture
//!
//! [`PageSync`] accepts arbitrary chunks of the file and hands back complete,
//! checksum-verified pages together with the absolute byte offset each page
//! started at. Garbage between pages (or a page with a bad checksum) is
//! skipped by hunting for the next `OggS` capture pattern.
//!
//! Page header layout (27 bytes + segment table):
//!
//! ```text
//!  0  "OggS"
//!  4  stream structure version (0)
//!  5  header type flags (0x01 continued, 0x02 BOS, 0x04 EOS)
//!  6  granule position   (i64 LE, -1 = no packet ends here)
//! 14  bitstream serial   (u32 LE)
//! 18  page sequence      (u32 LE)
//! 22  CRC checksum       (u32 LE)
//! 26  segment count
//! 27  lacing values...
//! ```

use super::crc;

pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
pub const HEADER_SIZE: usize = 27;
pub const MAX_SEGMENTS: usize = 255;

pub const FLAG_CONTINUED: u8 = 0x01;
pub const FLAG_BOS: u8 = 0x02;
pub const FLAG_EOS: u8 = 0x04;

/// Granule position value meaning "no packet finishes on this page"
pub const NO_GRANULE: i64 = -1;

/// One complete Ogg page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OggPage {
    /// Absolute file offset of the `OggS` capture pattern
    pub offset: u64,
    pub header_type: u8,
    pub granule_position: i64,
    pub serial: u32,
    pub sequence: u32,
    /// Lacing values (one per segment)
    pub lacing: Vec<u8>,
    pub body: Vec<u8>,
}

impl OggPage {
    pub fn header_len(&self) -> usize {
        HEADER_SIZE + self.lacing.len()
    }

    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Header plus body, in bytes
    pub fn total_len(&self) -> usize {
        self.header_len() + self.body_len()
    }

    pub fn is_continued(&self) -> bool {
        self.header_type & FLAG_CONTINUED != 0
    }

    pub fn is_bos(&self) -> bool {
        self.header_type & FLAG_BOS != 0
    }

    pub fn is_eos(&self) -> bool {
        self.header_type & FLAG_EOS != 0
    }

    pub fn has_granule(&self) -> bool {
        self.granule_position != NO_GRANULE
    }

    /// Number of packets that finish on this page
    pub fn packets_completed(&self) -> usize {
        self.lacing.iter().filter(|&&l| l < 255).count()
    }

    /// Serialize the page, computing its checksum
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len());
        out.extend_from_slice(CAPTURE_PATTERN);
        out.push(0);
        out.push(self.header_type);
        out.extend_from_slice(&self.granule_position.to_le_bytes());
        out.extend_from_slice(&self.serial.to_le_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.push(self.lacing.len() as u8);
        out.extend_from_slice(&self.lacing);
        out.extend_from_slice(&self.body);

        let checksum = crc::checksum(&out);
        out[22..26].copy_from_slice(&checksum.to_le_bytes());
        out
    }
}

/// Outcome of inspecting the bytes at the front of the sync buffer
enum Capture {
    Page(OggPage, usize),
    NeedMore,
    /// Skip this many bytes and try again
    Skip(usize),
}

/// Incremental page synchroniser
#[derive(Debug, Default)]
pub struct PageSync {
    buffer: Vec<u8>,
    /// Read cursor into `buffer`
    start: usize,
    /// Absolute file offset of `buffer[0]`
    base_offset: u64,
    skipped_bytes: u64,
}

impl PageSync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget buffered bytes; the next fed byte sits at `offset` in the file
    pub fn reset(&mut self, offset: u64) {
        self.buffer.clear();
        self.start = 0;
        self.base_offset = offset;
    }

    /// Append freshly read bytes
    pub fn feed(&mut self, data: &[u8]) {
        // Compact once the consumed prefix dominates the buffer
        if self.start > 0 && self.start >= self.buffer.len() / 2 {
            self.buffer.drain(..self.start);
            self.base_offset += self.start as u64;
            self.start = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes discarded while hunting for a capture pattern
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// Bytes buffered but not yet returned as a page
    pub fn pending(&self) -> usize {
        self.buffer.len() - self.start
    }

    /// Next complete page, or `None` if more input is needed
    pub fn next_page(&mut self) -> Option<OggPage> {
        loop {
            match self.capture() {
                Capture::Page(page, len) => {
                    self.start += len;
                    return Some(page);
                }
                Capture::NeedMore => return None,
                Capture::Skip(n) => {
                    log::debug!(
                        "next_page: lost sync at offset {}, skipping {} bytes",
                        self.base_offset + self.start as u64,
                        n
                    );
                    self.start += n;
                    self.skipped_bytes += n as u64;
                }
            }
        }
    }

    fn capture(&self) -> Capture {
        let data = &self.buffer[self.start..];

        if data.len() < CAPTURE_PATTERN.len() {
            return Capture::NeedMore;
        }
        if &data[..4] != CAPTURE_PATTERN {
            // Jump to the next candidate 'O'; keep a partial tail around
            let next = data[1..]
                .iter()
                .position(|&b| b == b'O')
                .map(|p| p + 1)
                .unwrap_or(data.len());
            return Capture::Skip(next);
        }
        if data.len() < HEADER_SIZE {
            return Capture::NeedMore;
        }
        if data[4] != 0 {
            return Capture::Skip(1);
        }

        let segments = data[26] as usize;
        let header_len = HEADER_SIZE + segments;
        if data.len() < header_len {
            return Capture::NeedMore;
        }
        let lacing = &data[HEADER_SIZE..header_len];
        let body_len: usize = lacing.iter().map(|&l| l as usize).sum();
        let total = header_len + body_len;
        if data.len() < total {
            return Capture::NeedMore;
        }

        let stored = u32::from_le_bytes([data[22], data[23], data[24], data[25]]);
        let computed = crc::update(
            crc::update(crc::update(0, &data[..22]), &[0; 4]),
            &data[26..total],
        );
        if stored != computed {
            return Capture::Skip(1);
        }

        let mut granule = [0u8; 8];
        granule.copy_from_slice(&data[6..14]);

        let page = OggPage {
            offset: self.base_offset + self.start as u64,
            header_type: data[5],
            granule_position: i64::from_le_bytes(granule),
            serial: u32::from_le_bytes([data[14], data[15], data[16], data[17]]),
            sequence: u32::from_le_bytes([data[18], data[19], data[20], data[21]]),
            lacing: lacing.to_vec(),
            body: data[header_len..total].to_vec(),
        };
        Capture::Page(page, total)
    }
}
