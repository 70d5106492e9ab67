//! Session object, loading and teardown

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;

use super::state::PlayState;
use super::timing::PlaybackTiming;
use super::{lock, SessionId};
use crate::audio::{BusId, PullFn};
use crate::buffer::RingBuffer;
use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::notify::{ProgressCallback, SessionEvent, StateCallback, StateChangeInfo};
use crate::stream::OggOpusStream;
use crate::timestretch::TimeStretch;
use crate::types::{FRAME_SIZE, MAX_FRAME_SIZE};

/// Stretcher warm-up: ratio and silent frames pushed through on load
const PRIME_RATIO: f64 = 0.8;
const PRIME_FRAMES: usize = FRAME_SIZE * 3;

/// Demux/decode position, guarded by the session's `decode` lock
pub(super) struct DecodeState {
    pub stream: Option<OggOpusStream<File>>,
    /// Mono scratch for one decoded packet
    pub mono: Vec<f32>,
    /// Scratch for stretcher output
    pub stretched: Vec<f32>,
    /// Absolute PCM position of the next decoded sample
    pub position: i64,
    /// Samples still to discard (pre-skip at the start of the file)
    pub skip: usize,
}

impl DecodeState {
    fn new() -> Self {
        Self {
            stream: None,
            mono: vec![0.0; MAX_FRAME_SIZE],
            stretched: Vec::with_capacity(MAX_FRAME_SIZE * 2),
            position: 0,
            skip: 0,
        }
    }

    pub fn stream_mut(&mut self) -> EngineResult<&mut OggOpusStream<File>> {
        self.stream
            .as_mut()
            .ok_or_else(|| EngineError::new(ErrorKind::NotReady, "no file loaded"))
    }
}

struct BusSlot {
    id: Option<BusId>,
    volume: f32,
}

/// One playback session
///
/// Always handled through `Arc`; the bus callback keeps only a weak
/// reference so dropping the last handle tears the session down.
pub struct AudioSession {
    id: SessionId,
    pub(super) context: Arc<EngineContext>,
    weak_self: Weak<AudioSession>,

    /// Serialises control operations
    pub(super) control: Mutex<()>,
    state: Mutex<PlayState>,
    /// Lock-free copy of `state` for the audio thread
    state_mirror: AtomicU8,

    pub(super) buffer: RingBuffer,
    pub(super) refill_watermark: usize,
    pub(super) decode: Mutex<DecodeState>,
    pub(super) timing: Mutex<PlaybackTiming>,
    pub(super) stretcher: Mutex<Option<Box<dyn TimeStretch>>>,
    bus: Mutex<BusSlot>,

    file_name: Mutex<Option<PathBuf>>,
    duration_ms: AtomicU32,
}

impl AudioSession {
    pub fn new(id: SessionId, context: Arc<EngineContext>) -> Arc<Self> {
        let capacity = context.config.ring_buffer_capacity;
        let refill_watermark = context.config.refill_watermark();
        Arc::new_cyclic(|weak_self| Self {
            id,
            context,
            weak_self: weak_self.clone(),
            control: Mutex::new(()),
            state: Mutex::new(PlayState::Idle),
            state_mirror: AtomicU8::new(PlayState::Idle as u8),
            buffer: RingBuffer::new(capacity),
            refill_watermark,
            decode: Mutex::new(DecodeState::new()),
            timing: Mutex::new(PlaybackTiming::default()),
            stretcher: Mutex::new(None),
            bus: Mutex::new(BusSlot {
                id: None,
                volume: 1.0,
            }),
            file_name: Mutex::new(None),
            duration_ms: AtomicU32::new(0),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> PlayState {
        PlayState::from_u8(self.state_mirror.load(Ordering::Acquire))
    }

    /// Path of the last file loaded into this session
    pub fn file_name(&self) -> Option<PathBuf> {
        lock(&self.file_name).clone()
    }

    /// File duration in ms (0 before a successful load)
    pub fn duration_ms(&self) -> u32 {
        self.duration_ms.load(Ordering::Acquire)
    }

    /// Playback time of the current segment in ms, speed-compensated
    pub fn current_time_ms(&self) -> u32 {
        self.current_time_at(Instant::now())
    }

    pub(crate) fn current_time_at(&self, now: Instant) -> u32 {
        lock(&self.timing).current_play_time(now) as u32
    }

    /// Absolute position in the file in ms
    pub fn position_ms(&self) -> u32 {
        let now = Instant::now();
        let timing = lock(&self.timing);
        timing
            .seek_time_ms
            .saturating_add(timing.current_play_time(now) as u32)
    }

    pub fn speed(&self) -> f64 {
        lock(&self.timing).speed()
    }

    pub fn volume(&self) -> f32 {
        lock(&self.bus).volume
    }

    /// Samples decoded but not yet pulled
    pub fn buffered_samples(&self) -> usize {
        self.buffer.available_for_read()
    }

    /// Set bus volume (clamped to `0.0..=1.0`); kept across bus changes
    pub fn set_volume(&self, volume: f32) {
        let volume = volume.clamp(0.0, 1.0);
        let mut bus = lock(&self.bus);
        bus.volume = volume;
        if let Some(id) = bus.id {
            self.context.output.set_bus_volume(id, volume);
        }
    }

    pub fn set_progress_callback(&self, callback: Option<ProgressCallback>) {
        self.context
            .notifications
            .set_progress_callback(self.id, callback);
    }

    pub fn set_state_callback(&self, callback: Option<StateCallback>) {
        self.context.notifications.set_state_callback(self.id, callback);
    }

    /// Open and index a file, leaving the session READY
    ///
    /// Allowed from IDLE and ERROR. Any failure leaves the session in ERROR.
    pub fn load_file(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        let _control = lock(&self.control);
        self.transition(PlayState::Loading)?;

        log::info!("load_file: session {} loading {}", self.id, path.display());
        match self.load_inner(path) {
            Ok(()) => {
                self.transition(PlayState::Ready)?;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn load_inner(&self, path: &Path) -> EngineResult<()> {
        let file = File::open(path).map_err(|e| {
            let kind = match e.kind() {
                io::ErrorKind::NotFound => ErrorKind::FileNotFound,
                _ => ErrorKind::FileReadError,
            };
            EngineError::new(kind, format!("{}: {}", path.display(), e))
        })?;
        let stream = OggOpusStream::open(
            file,
            self.context.decoders.as_ref(),
            self.context.config.read_chunk_size,
        )?;
        let pre_skip = stream.pre_skip();
        let duration_ms = stream.duration_ms();

        self.ensure_bus()?;
        self.prime_stretcher();
        self.buffer.clear();

        {
            let mut decode = lock(&self.decode);
            decode.stream = Some(stream);
            decode.position = 0;
            decode.skip = pre_skip.max(0) as usize;
        }
        *lock(&self.timing) = PlaybackTiming::default();
        self.duration_ms.store(duration_ms, Ordering::Release);
        *lock(&self.file_name) = Some(path.to_path_buf());

        log::info!(
            "load_file: session {} ready, {} ms, pre-skip {}",
            self.id,
            duration_ms,
            pre_skip
        );
        Ok(())
    }

    /// Acquire a bus and install the pull callback, once per session
    fn ensure_bus(&self) -> EngineResult<BusId> {
        let mut bus = lock(&self.bus);
        if let Some(id) = bus.id {
            return Ok(id);
        }

        let output = &self.context.output;
        let id = output.acquire_bus()?;
        let session = self.weak_self.clone();
        let pull: PullFn = Arc::new(move |out: &mut [f32]| match session.upgrade() {
            Some(session) => session.audio_callback(out),
            None => {
                out.fill(0.0);
                0
            }
        });
        output.set_bus_callback(id, Some(pull));
        output.set_bus_volume(id, bus.volume);
        output.mute_bus(id, true);
        bus.id = Some(id);

        log::debug!("ensure_bus: session {} on bus {}", self.id, id.0);
        Ok(id)
    }

    pub(super) fn set_muted(&self, muted: bool) {
        let bus = lock(&self.bus);
        if let Some(id) = bus.id {
            self.context.output.mute_bus(id, muted);
        }
    }

    /// Create the stretcher if needed and run silence through it
    ///
    /// The first real block then comes out without the start-up transient.
    fn prime_stretcher(&self) {
        let mut slot = lock(&self.stretcher);
        let stretcher = slot.get_or_insert_with(|| self.context.stretchers.create());
        stretcher.reset();
        stretcher.set_time_ratio(PRIME_RATIO);
        stretcher.process(&vec![0.0; PRIME_FRAMES]);
        let mut sink = vec![0.0; stretcher.available()];
        stretcher.retrieve(&mut sink);
        stretcher.set_time_ratio(1.0);
    }

    /// Drop stretcher history while keeping its ratio
    pub(super) fn reset_stretcher(&self) {
        if let Some(stretcher) = lock(&self.stretcher).as_mut() {
            stretcher.reset();
        }
    }

    /// Apply a time ratio of `1 / speed`
    pub(super) fn apply_speed(&self, speed: f64) {
        if let Some(stretcher) = lock(&self.stretcher).as_mut() {
            stretcher.set_time_ratio(1.0 / speed);
        }
    }

    /// Stop, give back the bus and drop decode state; ends in IDLE
    pub fn release(&self) -> EngineResult<()> {
        let _control = lock(&self.control);
        if matches!(self.state(), PlayState::Playing | PlayState::Paused) {
            self.stop_inner()?;
        }

        if let Some(id) = lock(&self.bus).id.take() {
            let output = &self.context.output;
            output.set_bus_callback(id, None);
            output.release_bus(id);
        }
        *lock(&self.stretcher) = None;
        lock(&self.decode).stream = None;
        self.buffer.clear();

        if self.state() != PlayState::Idle {
            self.transition(PlayState::Idle)?;
        }
        log::info!("release: session {} released", self.id);
        Ok(())
    }

    /// Recover from ERROR and clear timing/buffer for reuse
    pub fn reset(&self) -> EngineResult<()> {
        let _control = lock(&self.control);
        if self.state() == PlayState::Error {
            self.transition(PlayState::Idle)?;
        }
        *lock(&self.timing) = PlaybackTiming::default();
        self.buffer.clear();
        Ok(())
    }

    /// Validated state change; posts a StateChanged event
    ///
    /// Must not be called with the timing lock held.
    pub(super) fn transition(&self, to: PlayState) -> EngineResult<PlayState> {
        let from = {
            let mut state = lock(&self.state);
            let from = *state;
            if !from.can_transition_to(to) {
                return Err(EngineError::new(
                    ErrorKind::InvalidState,
                    format!("session {}: {} -> {} not allowed", self.id, from, to),
                ));
            }
            *state = to;
            self.state_mirror.store(to as u8, Ordering::Release);
            from
        };

        log::debug!("transition: session {} {} -> {}", self.id, from, to);
        self.context.notifications.post(SessionEvent::StateChanged {
            session: self.id,
            info: StateChangeInfo {
                old_state: from,
                new_state: to,
                position_ms: self.current_time_ms(),
            },
        });
        Ok(from)
    }

    /// Move to ERROR (if not already there) and hand the error back
    pub(super) fn fail(&self, error: EngineError) -> EngineError {
        log::error!("session {}: {}", self.id, error);
        if self.state() != PlayState::Error {
            if let Err(e) = self.transition(PlayState::Error) {
                log::warn!("fail: session {} not moved to ERROR: {}", self.id, e);
            }
        }
        error
    }

    #[cfg(test)]
    pub(crate) fn force_state(&self, state: PlayState) {
        *lock(&self.state) = state;
        self.state_mirror.store(state as u8, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn bus_id(&self) -> Option<BusId> {
        lock(&self.bus).id
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        if let Some(id) = lock(&self.bus).id.take() {
            self.context.output.set_bus_callback(id, None);
            self.context.output.release_bus(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioOutput;
    use crate::test_support::{fixture_file, test_context, FixtureSpec};

    #[test]
    fn test_load_makes_ready() {
        let (dir, path) = fixture_file(&FixtureSpec::default());
        let (context, output) = test_context(Default::default());
        let session = AudioSession::new(SessionId(1), context);

        session.load_file(&path).unwrap();
        assert_eq!(session.state(), PlayState::Ready);
        assert_eq!(session.duration_ms(), 5000);
        assert_eq!(session.file_name(), Some(path));
        assert_eq!(output.buses().in_use(), 1);
        drop(dir);
    }

    #[test]
    fn test_fail_moves_every_state_to_error() {
        let (context, _output) = test_context(Default::default());
        let session = AudioSession::new(SessionId(1), context);

        for state in PlayState::ALL {
            session.force_state(state);
            let err = session.fail(EngineError::new(ErrorKind::OpusDecodeError, "bad packet"));
            assert_eq!(err.kind(), ErrorKind::OpusDecodeError);
            assert_eq!(session.state(), PlayState::Error);
        }
    }

    #[test]
    fn test_load_missing_file_fails() {
        let (context, _output) = test_context(Default::default());
        let session = AudioSession::new(SessionId(1), context);

        let err = session.load_file("/nonexistent/clip.opus").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
        assert_eq!(session.state(), PlayState::Error);

        // ERROR -> LOADING is allowed, so a retry is possible
        let err = session.load_file("/nonexistent/clip.opus").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);
    }

    #[test]
    fn test_load_rejects_non_opus() {
        let spec = FixtureSpec {
            bad_magic: true,
            ..FixtureSpec::default()
        };
        let (_dir, path) = fixture_file(&spec);
        let (context, _output) = test_context(Default::default());
        let session = AudioSession::new(SessionId(1), context);

        let err = session.load_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidFormat);
        assert_eq!(session.state(), PlayState::Error);
    }

    #[test]
    fn test_load_twice_is_invalid() {
        let (_dir, path) = fixture_file(&FixtureSpec::default());
        let (context, _output) = test_context(Default::default());
        let session = AudioSession::new(SessionId(1), context);
        session.load_file(&path).unwrap();

        let err = session.load_file(&path).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(session.state(), PlayState::Ready);
    }

    #[test]
    fn test_disallowed_transitions_leave_state() {
        let (context, _output) = test_context(Default::default());
        let session = AudioSession::new(SessionId(1), context);

        for from in PlayState::ALL {
            for to in PlayState::ALL {
                if from.can_transition_to(to) {
                    continue;
                }
                session.force_state(from);
                let err = session.transition(to).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::InvalidState, "{from} -> {to}");
                assert_eq!(session.state(), from);
            }
        }
    }

    #[test]
    fn test_release_frees_bus_and_idles() {
        let (_dir, path) = fixture_file(&FixtureSpec::default());
        let (context, output) = test_context(Default::default());
        let session = AudioSession::new(SessionId(1), context);
        session.load_file(&path).unwrap();
        session.play_at(0, 0, 1).unwrap();

        session.release().unwrap();
        assert_eq!(session.state(), PlayState::Idle);
        assert_eq!(output.buses().in_use(), 0);
        assert!(session.bus_id().is_none());

        // Released twice is fine
        session.release().unwrap();
    }

    #[test]
    fn test_reset_recovers_from_error() {
        let (context, _output) = test_context(Default::default());
        let session = AudioSession::new(SessionId(1), context);
        let _ = session.load_file("/nonexistent/clip.opus");
        assert_eq!(session.state(), PlayState::Error);

        session.reset().unwrap();
        assert_eq!(session.state(), PlayState::Idle);
    }

    #[test]
    fn test_volume_clamped_and_applied() {
        let (_dir, path) = fixture_file(&FixtureSpec::default());
        let (context, output) = test_context(Default::default());
        let session = AudioSession::new(SessionId(1), context);
        session.set_volume(3.0);
        session.load_file(&path).unwrap();

        let bus = session.bus_id().unwrap();
        assert_eq!(session.volume(), 1.0);
        assert_eq!(output.buses().volume(bus), Some(1.0));
        session.set_volume(0.25);
        assert_eq!(output.buses().volume(bus), Some(0.25));
    }

    #[test]
    fn test_drop_releases_bus() {
        let (_dir, path) = fixture_file(&FixtureSpec::default());
        let (context, output) = test_context(Default::default());
        let session = AudioSession::new(SessionId(1), context);
        session.load_file(&path).unwrap();
        assert_eq!(output.buses().in_use(), 1);

        drop(session);
        assert_eq!(output.buses().in_use(), 0);
    }
}
