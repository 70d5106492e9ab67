//! AudioPlayer - session registry and host-facing API
//!
//! Owns up to `max_sessions` sessions keyed by [`SessionId`]. Sessions bound
//! to a file that is not playing are reused before new ones are allocated.
//!
//! [`AudioPlayer::play_ogg_at`] is the composite operation: it runs on the
//! worker pool (finding or loading a session can hit the disk) and the caller
//! waits for it with the configured command timeout. A `Timeout` means the
//! outcome is unknown, not that the command was cancelled.
//!
//! # Example Usage
//!
//! ```ignore
//! let player = AudioPlayer::new(Arc::new(EngineContext::new(config, output)));
//! player.init()?;
//! let id = player.play("clip.opus", 0, 0, 1)?;
//! player.set_speed(id, 1.25)?;
//! player.notifications().pump();
//! player.shutdown();
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult, ErrorKind};
use crate::notify::{NotificationHub, ProgressCallback, StateCallback};
use crate::pool::CommandWorkerPool;
use crate::session::{AudioSession, PlayState, SessionId};

/// Host-boundary speed limits
pub const MIN_SPEED: f64 = 0.5;
pub const MAX_SPEED: f64 = 2.5;

/// Session map shared with pool tasks
struct Registry {
    context: Arc<EngineContext>,
    sessions: RwLock<HashMap<SessionId, Arc<AudioSession>>>,
    next_id: AtomicU32,
}

impl Registry {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, Arc<AudioSession>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, Arc<AudioSession>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_session(&self) -> Option<Arc<AudioSession>> {
        let mut sessions = self.write();
        if sessions.len() >= self.context.config.max_sessions {
            log::warn!(
                "create_session: limit of {} sessions reached",
                self.context.config.max_sessions
            );
            return None;
        }
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let session = AudioSession::new(id, Arc::clone(&self.context));
        sessions.insert(id, Arc::clone(&session));
        log::debug!("create_session: session {} ({} live)", id, sessions.len());
        Some(session)
    }

    fn destroy_session(&self, id: SessionId) -> Option<Arc<AudioSession>> {
        let session = self.write().remove(&id)?;
        if let Err(e) = session.release() {
            log::warn!("destroy_session: releasing session {} failed: {}", id, e);
        }
        self.context.notifications.remove_session(id);
        Some(session)
    }

    fn get(&self, id: SessionId) -> EngineResult<Arc<AudioSession>> {
        self.read().get(&id).cloned().ok_or_else(|| {
            EngineError::new(ErrorKind::SessionNotFound, format!("no session {}", id))
        })
    }

    /// A session bound to `path` in one of `states`, lowest id first
    fn find_bound(&self, path: &Path, states: &[PlayState]) -> Option<Arc<AudioSession>> {
        let sessions = self.read();
        let mut candidates: Vec<_> = sessions
            .values()
            .filter(|s| states.contains(&s.state()))
            .filter(|s| s.file_name().as_deref() == Some(path))
            .collect();
        candidates.sort_by_key(|s| s.id());
        candidates.first().map(|s| Arc::clone(s))
    }

    /// Reuse a READY/STOPPED session for `path` or load a new one
    fn load_file(&self, path: &Path) -> EngineResult<Arc<AudioSession>> {
        if let Some(session) = self.find_bound(path, &[PlayState::Ready, PlayState::Stopped]) {
            log::info!("load_file: reusing session {} for {}", session.id(), path.display());
            return Ok(session);
        }

        let session = self.create_session().ok_or_else(|| {
            EngineError::new(
                ErrorKind::MaxSessionsReached,
                format!("{} sessions already live", self.context.config.max_sessions),
            )
        })?;
        if let Err(e) = session.load_file(path) {
            self.destroy_session(session.id());
            return Err(e);
        }
        Ok(session)
    }

    /// Body of the composite play command; runs on a worker thread
    fn play_task(
        &self,
        path: &Path,
        seek_ms: u32,
        end_ms: u32,
        loop_count: u32,
        progress: Option<ProgressCallback>,
        state: Option<StateCallback>,
    ) -> EngineResult<Arc<AudioSession>> {
        let reusable = [PlayState::Stopped, PlayState::Ready, PlayState::Idle];
        let (session, reused) = match self.find_bound(path, &reusable) {
            Some(session) => (session, true),
            None => {
                if !path.exists() {
                    return Err(EngineError::new(
                        ErrorKind::FileNotFound,
                        path.display().to_string(),
                    ));
                }
                (self.load_file(path)?, false)
            }
        };

        let started = Self::start_playback(
            &session, path, reused, seek_ms, end_ms, loop_count, progress, state,
        );
        if let Err(e) = started {
            // The caller gets no id back, so an ERROR session would leak its slot
            if session.state() == PlayState::Error {
                log::warn!(
                    "play_ogg_at: destroying failed session {}: {}",
                    session.id(),
                    e
                );
                self.destroy_session(session.id());
            }
            return Err(e);
        }
        Ok(session)
    }

    #[allow(clippy::too_many_arguments)]
    fn start_playback(
        session: &AudioSession,
        path: &Path,
        reused: bool,
        seek_ms: u32,
        end_ms: u32,
        loop_count: u32,
        progress: Option<ProgressCallback>,
        state: Option<StateCallback>,
    ) -> EngineResult<()> {
        if reused {
            log::info!("play_ogg_at: reusing session {}", session.id());
            session.reset()?;
            // Released sessions keep their file name but not the stream
            if session.state() == PlayState::Idle {
                session.load_file(path)?;
            }
        }

        if progress.is_some() {
            session.set_progress_callback(progress);
        }
        if state.is_some() {
            session.set_state_callback(state);
        }

        let duration_ms = end_ms.saturating_sub(seek_ms);
        session.play_at(seek_ms, duration_ms, loop_count)
    }
}

pub struct AudioPlayer {
    registry: Arc<Registry>,
    pool: CommandWorkerPool,
    initialized: AtomicBool,
}

impl AudioPlayer {
    pub fn new(context: Arc<EngineContext>) -> Self {
        let threads = context.config.resolved_worker_threads();
        Self {
            registry: Arc::new(Registry {
                context,
                sessions: RwLock::new(HashMap::new()),
                next_id: AtomicU32::new(1),
            }),
            pool: CommandWorkerPool::new("lilt-command", threads),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.registry.context
    }

    pub fn notifications(&self) -> &NotificationHub {
        &self.registry.context.notifications
    }

    /// Start the output device and the worker pool
    pub fn init(&self) -> EngineResult<()> {
        self.registry.context.output.start()?;
        self.pool.start()?;
        self.initialized.store(true, Ordering::Release);
        log::info!("init: audio player ready");
        Ok(())
    }

    /// Release every session, then stop the pool and the output
    pub fn shutdown(&self) {
        let ids: Vec<_> = self.registry.read().keys().copied().collect();
        for id in ids {
            self.registry.destroy_session(id);
        }
        self.pool.stop();
        self.registry.context.output.stop();
        self.initialized.store(false, Ordering::Release);
        log::info!("shutdown: audio player stopped");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// New empty session; `None` once the session limit is reached
    pub fn create_session(&self) -> Option<Arc<AudioSession>> {
        self.registry.create_session()
    }

    /// Release and forget a session
    pub fn destroy_session(&self, id: SessionId) -> bool {
        self.registry.destroy_session(id).is_some()
    }

    pub fn session(&self, id: SessionId) -> EngineResult<Arc<AudioSession>> {
        self.registry.get(id)
    }

    pub fn session_count(&self) -> usize {
        self.registry.read().len()
    }

    /// Session READY for `path`, reusing a READY/STOPPED one if possible
    pub fn load_file(&self, path: impl AsRef<Path>) -> EngineResult<Arc<AudioSession>> {
        self.registry.load_file(path.as_ref())
    }

    /// Find or load a session for `path` and play `[seek_ms, end_ms)`
    ///
    /// `end_ms == 0` (or not after `seek_ms`) plays to the end of the file.
    /// Runs on the worker pool; waits at most the configured command timeout.
    pub fn play_ogg_at(
        &self,
        path: impl Into<PathBuf>,
        seek_ms: u32,
        end_ms: u32,
        loop_count: u32,
        progress: Option<ProgressCallback>,
        state: Option<StateCallback>,
    ) -> EngineResult<Arc<AudioSession>> {
        if !self.is_initialized() {
            return Err(EngineError::new(
                ErrorKind::NotInitialized,
                "play_ogg_at: init() has not been called",
            ));
        }
        let path = path.into();
        log::info!(
            "play_ogg_at: {} from {} ms to {} ms, loops {}",
            path.display(),
            seek_ms,
            end_ms,
            loop_count
        );

        let registry = Arc::clone(&self.registry);
        let handle = self.pool.submit_with_result(move || {
            registry.play_task(&path, seek_ms, end_ms, loop_count, progress, state)
        })?;
        handle.wait_timeout(self.registry.context.config.command_timeout())
    }

    /// [`Self::play_ogg_at`] without callbacks, returning the session id
    pub fn play(
        &self,
        path: impl Into<PathBuf>,
        seek_ms: u32,
        end_ms: u32,
        loop_count: u32,
    ) -> EngineResult<SessionId> {
        self.play_ogg_at(path, seek_ms, end_ms, loop_count, None, None)
            .map(|session| session.id())
    }

    pub fn set_callbacks(
        &self,
        id: SessionId,
        progress: Option<ProgressCallback>,
        state: Option<StateCallback>,
    ) -> EngineResult<()> {
        let session = self.registry.get(id)?;
        session.set_progress_callback(progress);
        session.set_state_callback(state);
        Ok(())
    }

    pub fn pause(&self, id: SessionId) -> EngineResult<()> {
        self.registry.get(id)?.pause()
    }

    pub fn resume(&self, id: SessionId) -> EngineResult<()> {
        self.registry.get(id)?.resume()
    }

    pub fn stop(&self, id: SessionId) -> EngineResult<()> {
        self.registry.get(id)?.stop()
    }

    /// Seek, dropping progress queued for the old position; a paused
    /// session starts playing again
    pub fn seek(&self, id: SessionId, ms: u32) -> EngineResult<()> {
        let session = self.registry.get(id)?;
        self.notifications().clear_session(id);
        session.seek_to_time(ms)?;
        if session.state() == PlayState::Paused {
            session.resume()?;
        }
        Ok(())
    }

    /// Speed clamped to `MIN_SPEED..=MAX_SPEED`
    pub fn set_speed(&self, id: SessionId, speed: f64) -> EngineResult<()> {
        if speed.is_nan() {
            return Err(EngineError::new(ErrorKind::InvalidParameter, "speed is NaN"));
        }
        let speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        self.registry.get(id)?.set_playback_speed(speed)
    }

    pub fn set_volume(&self, id: SessionId, volume: f32) -> EngineResult<()> {
        self.registry.get(id)?.set_volume(volume);
        Ok(())
    }

    pub fn duration(&self, id: SessionId) -> EngineResult<u32> {
        Ok(self.registry.get(id)?.duration_ms())
    }

    pub fn current_time(&self, id: SessionId) -> EngineResult<u32> {
        Ok(self.registry.get(id)?.current_time_ms())
    }

    pub fn state(&self, id: SessionId) -> EngineResult<PlayState> {
        Ok(self.registry.get(id)?.state())
    }

    /// Release the session and drop its id; later calls get `SessionNotFound`
    pub fn release(&self, id: SessionId) -> EngineResult<()> {
        self.registry
            .destroy_session(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::new(ErrorKind::SessionNotFound, format!("no session {}", id)))
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        if self.is_initialized() {
            self.shutdown();
        }
    }
}
