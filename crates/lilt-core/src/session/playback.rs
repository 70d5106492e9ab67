//! Play/pause/stop/speed and the audio-thread pull path

use std::time::Instant;

use super::session::{AudioSession, DecodeState};
use super::state::PlayState;
use super::{lock, try_lock};
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::notify::{PlaybackInfo, SessionEvent};
use crate::opus::{is_opus_head, is_opus_tags};

impl AudioSession {
    /// Start playback of `[seek_ms, seek_ms + duration_ms)`
    ///
    /// `duration_ms == 0` plays to the end of the file; the end is clamped to
    /// the file duration. `loop_count` is the number of passes, 0 loops
    /// forever. Allowed from READY and STOPPED.
    pub fn play_at(&self, seek_ms: u32, duration_ms: u32, loop_count: u32) -> EngineResult<()> {
        let _control = lock(&self.control);
        let state = self.state();
        if !matches!(state, PlayState::Ready | PlayState::Stopped) {
            return Err(EngineError::new(
                ErrorKind::InvalidState,
                format!("play_at: session {} is {}", self.id(), state),
            ));
        }

        let file_duration = self.duration_ms();
        if seek_ms >= file_duration {
            return Err(EngineError::new(
                ErrorKind::InvalidParameter,
                format!(
                    "play_at: seek {} ms is past the end ({} ms)",
                    seek_ms, file_duration
                ),
            ));
        }
        let end_time_ms = match duration_ms {
            0 => file_duration,
            d => seek_ms.saturating_add(d).min(file_duration),
        };

        {
            let mut timing = lock(&self.timing);
            timing.reset_for_play(loop_count);
            timing.end_time_ms = end_time_ms;
            timing.loop_start_ms = seek_ms;
        }
        self.apply_speed(1.0);

        let positioned = if seek_ms > 0 {
            self.seek_inner(seek_ms)
        } else {
            self.seek_begin_inner()
        };
        if let Err(e) = positioned {
            return Err(self.fail(e));
        }
        if seek_ms > 0 {
            let mut timing = lock(&self.timing);
            let anchor = timing.preroll_anchor();
            timing.loop_anchor = Some(anchor);
        }

        self.set_muted(false);
        self.transition(PlayState::Playing)?;
        log::info!(
            "play_at: session {} playing {}..{} ms, loops {}",
            self.id(),
            seek_ms,
            end_time_ms,
            loop_count
        );
        Ok(())
    }

    pub fn pause(&self) -> EngineResult<()> {
        self.pause_at(Instant::now())
    }

    pub(crate) fn pause_at(&self, now: Instant) -> EngineResult<()> {
        let _control = lock(&self.control);
        self.require(PlayState::Playing, "pause")?;
        lock(&self.timing).pause(now);
        self.set_muted(true);
        self.transition(PlayState::Paused)?;
        Ok(())
    }

    pub fn resume(&self) -> EngineResult<()> {
        self.resume_at(Instant::now())
    }

    pub(crate) fn resume_at(&self, now: Instant) -> EngineResult<()> {
        let _control = lock(&self.control);
        self.require(PlayState::Paused, "resume")?;
        lock(&self.timing).resume(now);
        self.set_muted(false);
        self.transition(PlayState::Playing)?;
        Ok(())
    }

    /// Stop playback and drop buffered audio; a no-op when already stopped
    pub fn stop(&self) -> EngineResult<()> {
        let _control = lock(&self.control);
        self.stop_inner()
    }

    pub(super) fn stop_inner(&self) -> EngineResult<()> {
        match self.state() {
            PlayState::Stopped => Ok(()),
            PlayState::Playing | PlayState::Paused => {
                // Leave PLAYING first so the audio thread stops reading
                self.transition(PlayState::Stopped)?;
                self.set_muted(true);
                self.buffer.clear();
                lock(&self.timing).pause(Instant::now());
                log::info!("stop: session {} stopped", self.id());
                Ok(())
            }
            other => Err(EngineError::new(
                ErrorKind::InvalidState,
                format!("stop: session {} is {}", self.id(), other),
            )),
        }
    }

    /// Change playback speed without changing pitch
    ///
    /// Time already played is accounted at the old speed. Allowed from
    /// PLAYING, PAUSED and READY.
    pub fn set_playback_speed(&self, speed: f64) -> EngineResult<()> {
        self.set_playback_speed_at(speed, Instant::now())
    }

    pub(crate) fn set_playback_speed_at(&self, speed: f64, now: Instant) -> EngineResult<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(EngineError::new(
                ErrorKind::InvalidParameter,
                format!("set_playback_speed: {} is not a positive speed", speed),
            ));
        }
        let _control = lock(&self.control);
        let state = self.state();
        if !matches!(
            state,
            PlayState::Playing | PlayState::Paused | PlayState::Ready
        ) {
            return Err(EngineError::new(
                ErrorKind::InvalidState,
                format!("set_playback_speed: session {} is {}", self.id(), state),
            ));
        }

        lock(&self.timing).set_speed(speed, now);
        self.apply_speed(speed);
        log::debug!("set_playback_speed: session {} at {:.2}x", self.id(), speed);
        Ok(())
    }

    fn require(&self, expected: PlayState, op: &str) -> EngineResult<()> {
        let state = self.state();
        if state != expected {
            return Err(EngineError::new(
                ErrorKind::InvalidState,
                format!("{}: session {} is {}, not {}", op, self.id(), state, expected),
            ));
        }
        Ok(())
    }

    /// Pull mono samples for the output; runs on the audio thread
    ///
    /// Returns the number of samples written. The rest of `out` is silence.
    pub fn audio_callback(&self, out: &mut [f32]) -> usize {
        self.pull_at(out, Instant::now())
    }

    pub(crate) fn pull_at(&self, out: &mut [f32], now: Instant) -> usize {
        if self.state() != PlayState::Playing {
            out.fill(0.0);
            return 0;
        }

        let mut read = self.buffer.read(out);

        let (elapsed_ms, seek_time_ms, segment_ms) = {
            let mut timing = lock(&self.timing);
            timing.anchor_if_needed(now);
            (
                timing.current_play_time(now) as u32,
                timing.seek_time_ms,
                timing.duration_ms,
            )
        };
        self.context.notifications.post(SessionEvent::Progress {
            session: self.id(),
            info: PlaybackInfo {
                position_ms: seek_time_ms.saturating_add(elapsed_ms),
                elapsed_ms,
                duration_ms: self.duration_ms(),
            },
        });

        if elapsed_ms >= segment_ms {
            self.finish_pass();
            return read;
        }

        if read < out.len() {
            self.refill_from_callback();
            read += self.buffer.read(&mut out[read..]);
        }
        read
    }

    /// End of the play segment: loop back or stop
    fn finish_pass(&self) {
        let Some(_control) = try_lock(&self.control) else {
            return;
        };
        // A control op may have moved us on while we waited
        if self.state() != PlayState::Playing {
            return;
        }

        let next = {
            let mut timing = lock(&self.timing);
            if timing.should_loop() {
                timing.current_loop += 1;
                Some((timing.current_loop, timing.loop_anchor))
            } else {
                None
            }
        };

        match next {
            Some((pass, anchor)) => {
                log::debug!("audio_callback: session {} loop pass {}", self.id(), pass);
                let restarted = match anchor {
                    Some(anchor) => self.restart_at(anchor),
                    None => self.seek_begin_inner(),
                };
                if let Err(e) = restarted {
                    self.fail(e);
                }
            }
            None => {
                log::info!("audio_callback: session {} reached the end", self.id());
                if let Err(e) = self.stop_inner() {
                    log::warn!("audio_callback: stop failed: {}", e);
                }
            }
        }
    }

    /// Top up the buffer from the audio thread if no control op is running
    fn refill_from_callback(&self) {
        let Some(_control) = try_lock(&self.control) else {
            return;
        };
        if self.state() != PlayState::Playing {
            return;
        }
        let result = {
            let mut decode = lock(&self.decode);
            self.fill_buffer(&mut decode)
        };
        if let Err(e) = result {
            self.fail(e);
        }
    }

    /// Decode until the ring buffer is past the refill watermark or the
    /// stream ends
    pub(super) fn fill_buffer(&self, decode: &mut DecodeState) -> EngineResult<()> {
        while self.buffer.available_for_write() >= self.refill_watermark {
            if !self.decode_next(decode)? {
                break;
            }
        }
        Ok(())
    }

    /// Decode one packet into the buffer; false at end of stream
    fn decode_next(&self, decode: &mut DecodeState) -> EngineResult<bool> {
        let stream = decode.stream_mut()?;
        let Some(packet) = stream.next_packet()? else {
            return Ok(false);
        };
        if is_opus_head(&packet.data) || is_opus_tags(&packet.data) {
            return Ok(true);
        }

        let DecodeState {
            stream,
            mono,
            stretched,
            position,
            skip,
        } = decode;
        let Some(stream) = stream.as_mut() else {
            return Ok(false);
        };
        let frames = stream.decode_mono(&packet.data, mono)?;
        let start = *position;
        *position += frames as i64;

        let begin = (*skip).min(frames);
        *skip -= begin;

        // The last page's granule marks where real audio ends
        let mut end = frames;
        if packet.eos && packet.granule_position >= 0 {
            end = (packet.granule_position - start).clamp(0, frames as i64) as usize;
        }

        if begin < end {
            self.write_samples(&mono[begin..end], stretched, true)?;
        }
        Ok(true)
    }

    /// Write decoded mono samples; with `apply_speed`, through the
    /// stretcher when not at 1x
    pub(super) fn write_samples(
        &self,
        samples: &[f32],
        stretched: &mut Vec<f32>,
        apply_speed: bool,
    ) -> EngineResult<()> {
        let mut slot = lock(&self.stretcher);
        let output: &[f32] = match slot.as_mut() {
            Some(stretcher)
                if apply_speed && (stretcher.time_ratio() - 1.0).abs() > f64::EPSILON =>
            {
                let expected = (samples.len() as f64 * stretcher.time_ratio()).round() as usize;
                stretcher.process(samples);
                let available = stretcher.available();
                if available == 0 {
                    if expected == 0 {
                        return Ok(());
                    }
                    return Err(EngineError::new(
                        ErrorKind::ResampleError,
                        format!("time stretch of {} samples produced nothing", samples.len()),
                    ));
                }
                stretched.resize(available, 0.0);
                let n = stretcher.retrieve(stretched);
                &stretched[..n]
            }
            _ => samples,
        };

        let written = self.buffer.write(output);
        if written < output.len() {
            return Err(EngineError::new(
                ErrorKind::BufferOverflow,
                format!(
                    "ring buffer took {} of {} samples",
                    written,
                    output.len()
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::SessionId;
    use super::*;
    use crate::audio::AudioOutput;
    use crate::config::EngineConfig;
    use crate::test_support::{fixture_file, test_context, FixtureSpec};
    use std::sync::Arc;
    use std::time::Duration;

    fn loaded(config: EngineConfig) -> (tempfile::TempDir, Arc<AudioSession>) {
        let (dir, path) = fixture_file(&FixtureSpec::default());
        let (context, _output) = test_context(config);
        let session = AudioSession::new(SessionId(1), context);
        session.load_file(&path).unwrap();
        (dir, session)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_play_from_start_skips_pre_skip() {
        let (_dir, session) = loaded(EngineConfig::default());
        session.play_at(0, 0, 1).unwrap();
        assert_eq!(session.state(), PlayState::Playing);

        let mut out = [0.0f32; 8];
        assert_eq!(session.pull_at(&mut out, Instant::now()), 8);
        // The fake decoder emits each sample's absolute PCM position
        assert_eq!(out, [312.0, 313.0, 314.0, 315.0, 316.0, 317.0, 318.0, 319.0]);
    }

    #[test]
    fn test_play_past_end_rejected() {
        let (_dir, session) = loaded(EngineConfig::default());
        let err = session.play_at(5000, 0, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(session.state(), PlayState::Ready);

        let err = session.play_at(6000, 0, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(session.state(), PlayState::Ready);
    }

    #[test]
    fn test_play_while_playing_is_invalid() {
        let (_dir, session) = loaded(EngineConfig::default());
        session.play_at(0, 0, 1).unwrap();
        let err = session.play_at(0, 0, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(session.state(), PlayState::Playing);
    }

    #[test]
    fn test_pull_when_not_playing_is_silent() {
        let (_dir, session) = loaded(EngineConfig::default());
        let mut out = [1.0f32; 16];
        assert_eq!(session.pull_at(&mut out, Instant::now()), 0);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_pull_reports_progress() {
        let (_dir, session) = loaded(EngineConfig::default());
        let hub = &session.context.notifications;
        session.play_at(1000, 0, 1).unwrap();
        hub.pump();

        let t0 = Instant::now();
        let mut out = [0.0f32; 480];
        session.pull_at(&mut out, t0);
        session.pull_at(&mut out, t0 + ms(250));

        let mut last = None;
        while let Some(event) = hub.recv_timeout(ms(1)) {
            if let SessionEvent::Progress { info, .. } = event {
                last = Some(info);
            }
        }
        let info = last.unwrap();
        assert_eq!(info.elapsed_ms, 250);
        assert_eq!(info.position_ms, 1250);
        assert_eq!(info.duration_ms, 5000);
    }

    #[test]
    fn test_plays_whole_file_then_stops() {
        let (_dir, session) = loaded(EngineConfig::default());
        session.play_at(0, 0, 1).unwrap();

        let t0 = Instant::now();
        let mut out = vec![0.0f32; 480];
        let mut total = 0;
        let mut expected = 312.0;
        loop {
            let n = session.pull_at(&mut out, t0);
            if n == 0 {
                break;
            }
            for &s in &out[..n] {
                assert_eq!(s, expected);
                expected += 1.0;
            }
            total += n;
        }
        // Every sample between pre-skip and the final granule, nothing more
        assert_eq!(total, 240_000);

        session.pull_at(&mut out, t0 + ms(5000));
        assert_eq!(session.state(), PlayState::Stopped);
    }

    #[test]
    fn test_segment_end_stops_single_pass() {
        let (_dir, session) = loaded(EngineConfig::default());
        session.play_at(1000, 500, 1).unwrap();

        let t0 = Instant::now();
        let mut out = [0.0f32; 480];
        session.pull_at(&mut out, t0);
        session.pull_at(&mut out, t0 + ms(499));
        assert_eq!(session.state(), PlayState::Playing);
        session.pull_at(&mut out, t0 + ms(500));
        assert_eq!(session.state(), PlayState::Stopped);
    }

    #[test]
    fn test_loop_count_is_honoured() {
        let (_dir, session) = loaded(EngineConfig::default());
        session.play_at(1000, 500, 2).unwrap();

        let mut out = [0.0f32; 480];
        let t0 = Instant::now();
        session.pull_at(&mut out, t0);
        session.pull_at(&mut out, t0 + ms(500));
        assert_eq!(session.state(), PlayState::Playing);

        // Second pass restarts at the loop start with a fresh clock
        let t1 = t0 + ms(600);
        session.pull_at(&mut out, t1);
        assert_eq!(out[0], 48_312.0);
        session.pull_at(&mut out, t1 + ms(500));
        assert_eq!(session.state(), PlayState::Stopped);
    }

    #[test]
    fn test_infinite_loop_keeps_playing() {
        let (_dir, session) = loaded(EngineConfig::default());
        session.play_at(0, 200, 0).unwrap();

        let mut out = [0.0f32; 480];
        let mut t = Instant::now();
        for _ in 0..5 {
            session.pull_at(&mut out, t);
            assert_eq!(out[0], 312.0);
            session.pull_at(&mut out, t + ms(200));
            assert_eq!(session.state(), PlayState::Playing);
            t += ms(300);
        }
    }

    #[test]
    fn test_pause_and_resume() {
        let (_dir, session) = loaded(EngineConfig::default());
        let output = Arc::clone(&session.context.output);
        assert_eq!(
            session.pause().unwrap_err().kind(),
            ErrorKind::InvalidState
        );

        session.play_at(0, 0, 1).unwrap();
        let bus = session.bus_id().unwrap();
        assert_eq!(output.buses().is_muted(bus), Some(false));

        let t0 = Instant::now();
        let mut out = [0.0f32; 480];
        session.pull_at(&mut out, t0);
        session.pause_at(t0 + ms(400)).unwrap();
        assert_eq!(session.state(), PlayState::Paused);
        assert_eq!(output.buses().is_muted(bus), Some(true));
        assert_eq!(session.current_time_at(t0 + ms(3000)), 400);

        // Paused sessions produce nothing
        assert_eq!(session.pull_at(&mut out, t0 + ms(3000)), 0);

        session.resume_at(t0 + ms(3000)).unwrap();
        assert_eq!(session.state(), PlayState::Playing);
        assert_eq!(output.buses().is_muted(bus), Some(false));
        assert_eq!(session.current_time_at(t0 + ms(3100)), 500);
        assert_eq!(
            session.resume().unwrap_err().kind(),
            ErrorKind::InvalidState
        );
    }

    #[test]
    fn test_stop_is_idempotent() {
        let (_dir, session) = loaded(EngineConfig::default());
        assert_eq!(session.stop().unwrap_err().kind(), ErrorKind::InvalidState);

        session.play_at(0, 0, 1).unwrap();
        session.stop().unwrap();
        assert_eq!(session.state(), PlayState::Stopped);
        assert_eq!(session.buffered_samples(), 0);
        session.stop().unwrap();

        // STOPPED sessions can be played again
        session.play_at(0, 0, 1).unwrap();
        assert_eq!(session.state(), PlayState::Playing);
    }

    #[test]
    fn test_speed_changes_accumulate_time() {
        let (_dir, session) = loaded(EngineConfig::default());
        session.play_at(0, 0, 1).unwrap();

        let t0 = Instant::now();
        let mut out = [0.0f32; 480];
        session.pull_at(&mut out, t0);
        session.set_playback_speed_at(2.0, t0).unwrap();
        session.set_playback_speed_at(1.0, t0 + ms(1000)).unwrap();
        assert_eq!(session.current_time_at(t0 + ms(2000)), 3000);
    }

    #[test]
    fn test_speed_validation() {
        let (_dir, session) = loaded(EngineConfig::default());
        for bad in [0.0, -1.0, f64::NAN] {
            let err = session.set_playback_speed(bad).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        }

        session.set_playback_speed(1.5).unwrap();
        assert_eq!(session.speed(), 1.5);

        // Every play starts at normal speed
        session.play_at(0, 0, 1).unwrap();
        assert_eq!(session.speed(), 1.0);
        session.stop().unwrap();
        let err = session.set_playback_speed(2.0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_double_speed_halves_buffered_audio() {
        let (_dir, session) = loaded(EngineConfig::default());
        session.play_at(0, 0, 1).unwrap();
        session.set_playback_speed(2.0).unwrap();

        session.seek_to_time(1000).unwrap();
        let mut out = [0.0f32; 652];
        session.pull_at(&mut out, Instant::now());
        // The tail of the packet holding the seek target goes in at 1x
        assert_eq!(out[..4], [48_312.0, 48_313.0, 48_314.0, 48_315.0]);
        assert_eq!(out[647], 48_959.0);
        // From the next packet on, the test stretcher keeps every other
        // input sample at 2x
        assert_eq!(out[648..], [48_960.0, 48_962.0, 48_964.0, 48_966.0]);
    }

    #[test]
    fn test_overflow_fails_session() {
        // Smaller than one decoded packet
        let config = EngineConfig {
            ring_buffer_capacity: 500,
            ..EngineConfig::default()
        };
        let (_dir, session) = loaded(config);
        let err = session.play_at(0, 0, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BufferOverflow);
        assert_eq!(session.state(), PlayState::Error);
    }

    #[test]
    fn test_buffer_filled_to_watermark() {
        let (_dir, session) = loaded(EngineConfig::default());
        session.play_at(0, 0, 1).unwrap();
        let free = session.buffer.available_for_write();
        assert!(free < session.refill_watermark);
        assert!(session.buffered_samples() > 0);
    }
}
