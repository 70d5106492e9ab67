//! Packet reassembly for one logical Ogg stream
//!
//! Pages are pushed in file order; complete packets come out in order. A
//! packet may span several pages (lacing value 255 on the last segment of a
//! page). After a seek the first page seen is usually a continuation whose
//! leading segments belong to a packet we never saw the start of; those are
//! dropped.

use std::collections::VecDeque;

use super::page::{OggPage, NO_GRANULE};
use crate::error::{EngineError, EngineResult, ErrorKind};

/// One reassembled packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OggPacket {
    pub data: Vec<u8>,
    /// Granule position of the page if this packet is the last one to
    /// finish on it, otherwise [`NO_GRANULE`]
    pub granule_position: i64,
    pub bos: bool,
    pub eos: bool,
    /// Sequence number of this packet within the stream since the last reset
    pub packet_no: u64,
}

/// Reassembles packets of a single logical stream
#[derive(Debug, Default)]
pub struct PacketAssembler {
    serial: Option<u32>,
    partial: Vec<u8>,
    /// True while `partial` holds the head of a packet continuing on the next page
    in_packet: bool,
    /// Drop continuation data until the next packet boundary
    skip_continuation: bool,
    expected_sequence: Option<u32>,
    ready: VecDeque<OggPacket>,
    packet_no: u64,
}

impl PacketAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to the stream with `serial`, discarding all state
    pub fn init(&mut self, serial: u32) {
        self.reset();
        self.serial = Some(serial);
        self.packet_no = 0;
    }

    /// Drop partial data and queued packets (keeps the bound serial)
    ///
    /// Used after repositioning the file: the next page is treated as a
    /// fresh entry point.
    pub fn reset(&mut self) {
        self.partial.clear();
        self.in_packet = false;
        self.skip_continuation = true;
        self.expected_sequence = None;
        self.ready.clear();
    }

    pub fn serial(&self) -> Option<u32> {
        self.serial
    }

    /// Feed the next page of the stream
    pub fn push_page(&mut self, page: &OggPage) -> EngineResult<()> {
        let serial = match self.serial {
            Some(serial) => serial,
            None => {
                return Err(EngineError::new(
                    ErrorKind::OggStreamError,
                    "push_page: stream not initialised",
                ))
            }
        };
        if page.serial != serial {
            return Err(EngineError::new(
                ErrorKind::OggStreamError,
                format!(
                    "push_page: page serial {:#x} does not match stream {:#x}",
                    page.serial, serial
                ),
            ));
        }

        if let Some(expected) = self.expected_sequence {
            if page.sequence != expected && self.in_packet {
                log::debug!(
                    "push_page: sequence gap (expected {}, got {}), dropping partial packet",
                    expected,
                    page.sequence
                );
                self.partial.clear();
                self.in_packet = false;
                self.skip_continuation = true;
            }
        }
        self.expected_sequence = Some(page.sequence.wrapping_add(1));

        if !page.is_continued() {
            if self.in_packet {
                log::debug!("push_page: unterminated packet before page {}", page.sequence);
                self.partial.clear();
                self.in_packet = false;
            }
            self.skip_continuation = false;
        } else if !self.in_packet {
            // Continuation of a packet we never saw the start of
            self.skip_continuation = true;
        }

        let last_complete = page.lacing.iter().rposition(|&l| l < 255);
        let mut body_pos = 0;
        let mut first_bos = page.is_bos();

        for (i, &lacing) in page.lacing.iter().enumerate() {
            let len = lacing as usize;
            let segment = page.body.get(body_pos..body_pos + len).ok_or_else(|| {
                EngineError::new(ErrorKind::OggPacketCorrupt, "push_page: lacing exceeds body")
            })?;
            body_pos += len;

            if self.skip_continuation {
                if lacing < 255 {
                    self.skip_continuation = false;
                }
                continue;
            }

            self.partial.extend_from_slice(segment);
            self.in_packet = true;

            if lacing < 255 {
                let is_last = Some(i) == last_complete;
                self.ready.push_back(OggPacket {
                    data: std::mem::take(&mut self.partial),
                    granule_position: if is_last {
                        page.granule_position
                    } else {
                        NO_GRANULE
                    },
                    bos: first_bos,
                    eos: is_last && page.is_eos(),
                    packet_no: self.packet_no,
                });
                self.packet_no += 1;
                self.in_packet = false;
                first_bos = false;
            }
        }

        Ok(())
    }

    /// Next complete packet, if any
    pub fn next_packet(&mut self) -> Option<OggPacket> {
        self.ready.pop_front()
    }
}
