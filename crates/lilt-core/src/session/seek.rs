//! Sample-accurate seeking
//!
//! Opus needs a few tens of ms of decoded history before its output is
//! exact, so a seek starts decoding `preroll_ms` before the target:
//!
//! ```text
//!   page start        preroll            target
//!   ─────┼───────────────┼──────────────────┼──────────────►
//!        │ decode+discard (decoder warms up)│ written to buffer
//! ```

use super::lock;
use super::session::{AudioSession, DecodeState};
use super::state::PlayState;
use super::timing::LoopAnchor;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::ogg::NO_GRANULE;
use crate::opus::{is_opus_head, is_opus_tags};
use crate::types::{ms_to_samples, SAMPLES_PER_MS};

impl AudioSession {
    /// Move playback to `ms` (clamped to the file duration)
    ///
    /// Allowed from PLAYING, PAUSED and READY; the state is kept. Elapsed
    /// time restarts from zero at the new position. A failure leaves the
    /// session in ERROR.
    pub fn seek_to_time(&self, ms: u32) -> EngineResult<()> {
        let _control = lock(&self.control);
        let state = self.state();
        if !matches!(
            state,
            PlayState::Playing | PlayState::Paused | PlayState::Ready
        ) {
            return Err(EngineError::new(
                ErrorKind::NotReady,
                format!("seek_to_time: session {} is {}", self.id(), state),
            ));
        }

        let result = if ms == 0 {
            self.seek_begin_inner()
        } else {
            self.seek_inner(ms)
        };
        result.map_err(|e| self.fail(e))?;
        log::debug!("seek_to_time: session {} at {} ms", self.id(), ms);
        Ok(())
    }

    /// Rewind to the start of the file
    pub(super) fn seek_begin_inner(&self) -> EngineResult<()> {
        let mut decode = lock(&self.decode);
        self.buffer.clear();

        let stream = decode.stream_mut()?;
        stream.rewind()?;
        let pre_skip = stream.pre_skip();
        decode.position = 0;
        decode.skip = pre_skip.max(0) as usize;
        self.reset_stretcher();

        {
            let mut timing = lock(&self.timing);
            timing.seek_time_ms = 0;
            timing.target_pcm_pos = pre_skip;
            timing.preroll_file_pos = 0;
            timing.preroll_granule_pos = 0;
            timing.duration_ms = timing.end_time_ms;
        }

        self.fill_buffer(&mut decode)?;
        lock(&self.timing).restart_clock();
        Ok(())
    }

    /// Preroll seek to `ms` from the nearest preceding page
    pub(super) fn seek_inner(&self, ms: u32) -> EngineResult<()> {
        let ms = ms.min(self.duration_ms());
        let mut decode = lock(&self.decode);

        let (target, page) = {
            let stream = decode.stream_mut()?;
            let target = ms_to_samples(ms) + stream.pre_skip();
            let preroll = (target - self.preroll_samples()).max(0);
            let page = stream.find_page_start_pos(preroll).ok_or_else(|| {
                EngineError::new(
                    ErrorKind::SeekError,
                    format!("no page reaches granule {}", preroll),
                )
            })?;
            (target, page)
        };

        {
            let mut timing = lock(&self.timing);
            timing.seek_time_ms = ms;
            timing.target_pcm_pos = target;
            timing.preroll_file_pos = page.file_offset;
            timing.preroll_granule_pos = page.granule_position;
            timing.duration_ms = timing.end_time_ms.saturating_sub(ms);
        }

        log::debug!(
            "seek_inner: {} ms -> page {} at offset {}, granule {}, target {}",
            ms,
            page.index,
            page.file_offset,
            page.granule_position,
            target
        );
        self.buffer.clear();
        self.preroll_seek(&mut decode, page.file_offset, page.granule_position, target)
    }

    /// Restart a loop pass at its recorded anchor
    pub(super) fn restart_at(&self, anchor: LoopAnchor) -> EngineResult<()> {
        let mut decode = lock(&self.decode);
        {
            let mut timing = lock(&self.timing);
            timing.seek_time_ms = timing.loop_start_ms;
            timing.target_pcm_pos = anchor.target_pcm_pos;
            timing.preroll_file_pos = anchor.preroll_file_pos;
            timing.preroll_granule_pos = anchor.preroll_granule_pos;
            timing.duration_ms = timing.end_time_ms.saturating_sub(timing.loop_start_ms);
        }
        self.buffer.clear();
        self.preroll_seek(
            &mut decode,
            anchor.preroll_file_pos,
            anchor.preroll_granule_pos,
            anchor.target_pcm_pos,
        )
    }

    fn preroll_samples(&self) -> i64 {
        self.context.config.preroll_ms as i64 * SAMPLES_PER_MS
    }

    /// Reposition to a page, decode up to `target` and refill
    fn preroll_seek(
        &self,
        decode: &mut DecodeState,
        file_pos: u64,
        granule_pos: i64,
        target: i64,
    ) -> EngineResult<()> {
        decode.stream_mut()?.seek_to_offset(file_pos)?;
        decode.position = granule_pos;
        decode.skip = 0;
        self.reset_stretcher();

        self.preroll_decode(decode, target)?;
        self.fill_buffer(decode)?;
        lock(&self.timing).restart_clock();
        Ok(())
    }

    /// Decode and discard until `target`, writing the tail of the packet
    /// that crosses it
    ///
    /// The page we land on may open with the tail of a packet that started on
    /// the page before; that packet is dropped, so the previous page's
    /// granule is not where our first packet starts. Packets are held back
    /// until one carries a granule position, and the start is counted back
    /// from it. The tail goes into the buffer at 1x.
    fn preroll_decode(&self, decode: &mut DecodeState, target: i64) -> EngineResult<()> {
        let DecodeState {
            stream,
            mono,
            stretched,
            position,
            ..
        } = decode;
        let stream = stream
            .as_mut()
            .ok_or_else(|| EngineError::new(ErrorKind::NotReady, "no file loaded"))?;

        let mut held: Vec<f32> = Vec::new();
        let mut anchored = false;
        loop {
            let packet = stream.next_packet()?.ok_or_else(|| {
                EngineError::new(
                    ErrorKind::FileReadError,
                    format!("stream ended before seek target {}", target),
                )
            })?;
            if is_opus_head(&packet.data) || is_opus_tags(&packet.data) {
                continue;
            }

            let frames = stream.decode_mono(&packet.data, mono)?;
            let run: &[f32] = if anchored {
                &mono[..frames]
            } else {
                held.extend_from_slice(&mono[..frames]);
                if packet.granule_position == NO_GRANULE {
                    continue;
                }
                anchored = true;
                // An end-trimmed last page reports fewer samples than were
                // decoded; keep the previous page's granule there
                if !packet.eos {
                    *position = packet.granule_position - held.len() as i64;
                }
                &held
            };

            let start = *position;
            *position += run.len() as i64;
            if *position < target {
                continue;
            }

            let offset = (target - start).clamp(0, run.len() as i64) as usize;
            let mut end = run.len();
            if packet.eos && packet.granule_position >= 0 {
                end = (packet.granule_position - start).clamp(0, run.len() as i64) as usize;
            }
            if offset < end {
                self.write_samples(&run[offset..end], stretched, false)?;
            }
            return Ok(());
        }
    }
}
