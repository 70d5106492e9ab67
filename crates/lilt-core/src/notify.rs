//! Progress and state-change notifications
//!
//! Sessions never call host code directly. They post [`SessionEvent`]s on a
//! bounded queue; whichever thread owns delivery (usually the host's main
//! loop) calls [`NotificationHub::pump`] to run the registered callbacks.
//!
//! ```text
//!  audio thread ──try_send──┐
//!  worker thread ──try_send─┼─► bounded queue ──pump()──► host callbacks
//!  control thread ─try_send─┘        (full: drop + count)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::session::{PlayState, SessionId};

/// Playback position report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackInfo {
    /// Absolute position in the file (ms)
    pub position_ms: u32,
    /// Playback time since the current segment started (ms)
    pub elapsed_ms: u32,
    /// Total file duration (ms)
    pub duration_ms: u32,
}

/// State transition report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChangeInfo {
    pub old_state: PlayState,
    pub new_state: PlayState,
    /// Elapsed playback time at the transition (ms)
    pub position_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Progress {
        session: SessionId,
        info: PlaybackInfo,
    },
    StateChanged {
        session: SessionId,
        info: StateChangeInfo,
    },
}

impl SessionEvent {
    pub fn session(&self) -> SessionId {
        match self {
            SessionEvent::Progress { session, .. } | SessionEvent::StateChanged { session, .. } => {
                *session
            }
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(SessionId, &PlaybackInfo) + Send + Sync>;
pub type StateCallback = Arc<dyn Fn(SessionId, &StateChangeInfo) + Send + Sync>;

#[derive(Clone, Default)]
struct SessionCallbacks {
    progress: Option<ProgressCallback>,
    state: Option<StateCallback>,
}

/// Bounded event queue plus the per-session callbacks it delivers to
pub struct NotificationHub {
    sender: Sender<SessionEvent>,
    receiver: Receiver<SessionEvent>,
    callbacks: RwLock<HashMap<SessionId, SessionCallbacks>>,
    dropped: AtomicU64,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            callbacks: RwLock::new(HashMap::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Queue an event without blocking; returns false if it was dropped
    pub fn post(&self, event: SessionEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                if let SessionEvent::StateChanged { session, info } = event {
                    log::warn!(
                        "post: queue full, dropped {} -> {} for session {}",
                        info.old_state,
                        info.new_state,
                        session
                    );
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Events dropped because the queue was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    pub fn set_progress_callback(&self, session: SessionId, callback: Option<ProgressCallback>) {
        let mut callbacks = self.callbacks.write().unwrap_or_else(PoisonError::into_inner);
        callbacks.entry(session).or_default().progress = callback;
    }

    pub fn set_state_callback(&self, session: SessionId, callback: Option<StateCallback>) {
        let mut callbacks = self.callbacks.write().unwrap_or_else(PoisonError::into_inner);
        callbacks.entry(session).or_default().state = callback;
    }

    /// Forget a session's callbacks and queued events
    pub fn remove_session(&self, session: SessionId) {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&session);
        self.clear_session(session);
    }

    /// Discard queued events of one session, keeping the order of the rest
    pub fn clear_session(&self, session: SessionId) {
        let keep: Vec<_> = self
            .receiver
            .try_iter()
            .filter(|e| e.session() != session)
            .collect();
        for event in keep {
            self.post(event);
        }
    }

    /// Deliver every queued event; returns how many were taken off the queue
    pub fn pump(&self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.receiver.try_recv() {
            self.dispatch(&event);
            count += 1;
        }
        count
    }

    /// Wait for the next event (for hosts that block on the queue)
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Run the callbacks registered for the event's session
    pub fn dispatch(&self, event: &SessionEvent) {
        // Clone out of the lock so callbacks may register/unregister freely
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event.session())
            .cloned();
        let Some(callbacks) = callbacks else {
            return;
        };

        match event {
            SessionEvent::Progress { session, info } => {
                if let Some(cb) = callbacks.progress {
                    cb(*session, info);
                }
            }
            SessionEvent::StateChanged { session, info } => {
                if let Some(cb) = callbacks.state {
                    cb(*session, info);
                }
            }
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn progress(session: u32, position_ms: u32) -> SessionEvent {
        SessionEvent::Progress {
            session: SessionId(session),
            info: PlaybackInfo {
                position_ms,
                elapsed_ms: position_ms,
                duration_ms: 5000,
            },
        }
    }

    #[test]
    fn test_pump_delivers_in_order_to_owner() {
        let hub = NotificationHub::new(16);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hub.set_progress_callback(
            SessionId(1),
            Some(Arc::new(move |_, info| sink.lock().unwrap().push(info.position_ms))),
        );

        hub.post(progress(1, 10));
        hub.post(progress(2, 99));
        hub.post(progress(1, 20));
        assert_eq!(hub.pump(), 3);
        assert_eq!(*seen.lock().unwrap(), vec![10, 20]);
    }

    #[test]
    fn test_full_queue_drops_and_counts() {
        let hub = NotificationHub::new(2);
        assert!(hub.post(progress(1, 1)));
        assert!(hub.post(progress(1, 2)));
        assert!(!hub.post(progress(1, 3)));
        assert_eq!(hub.dropped_events(), 1);
    }

    #[test]
    fn test_clear_session_keeps_others() {
        let hub = NotificationHub::new(8);
        hub.post(progress(1, 1));
        hub.post(progress(2, 2));
        hub.post(progress(1, 3));
        hub.post(progress(2, 4));
        hub.clear_session(SessionId(1));

        assert_eq!(hub.pending(), 2);
        let next = hub.recv_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(next, progress(2, 2));
    }

    #[test]
    fn test_state_callback() {
        let hub = NotificationHub::new(8);
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        hub.set_state_callback(
            SessionId(4),
            Some(Arc::new(move |id, info| *sink.lock().unwrap() = Some((id, info.new_state)))),
        );
        hub.post(SessionEvent::StateChanged {
            session: SessionId(4),
            info: StateChangeInfo {
                old_state: PlayState::Ready,
                new_state: PlayState::Playing,
                position_ms: 0,
            },
        });
        hub.pump();
        assert_eq!(*seen.lock().unwrap(), Some((SessionId(4), PlayState::Playing)));
    }
}
