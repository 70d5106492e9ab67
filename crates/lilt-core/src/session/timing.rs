//! Playback time accounting
//!
//! Elapsed playback time is never a raw wall-clock delta. It is
//! `accumulated + (now - reference) × speed`, where `reference` moves every
//! time the speed changes or playback resumes and `accumulated` absorbs the
//! time played before that. Pausing folds the running segment in and drops
//! the reference.

use std::time::Instant;

/// Where a loop pass restarts decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopAnchor {
    /// File offset of the page decoding restarts from
    pub preroll_file_pos: u64,
    /// Granule position the first packet on that page starts at
    pub preroll_granule_pos: i64,
    /// Absolute PCM position of the first sample to play
    pub target_pcm_pos: i64,
}

#[derive(Debug, Clone)]
pub struct PlaybackTiming {
    /// Position the current play segment started at (absolute ms)
    pub seek_time_ms: u32,
    /// Target of the last preroll seek (absolute PCM, pre-skip included)
    pub target_pcm_pos: i64,
    /// File offset of the page the last preroll started from
    pub preroll_file_pos: u64,
    /// Granule position the last preroll started counting from
    pub preroll_granule_pos: i64,

    /// Loop passes requested (0 = forever)
    pub total_loops: u32,
    /// Passes completed so far
    pub current_loop: u32,

    /// Where a loop pass restarts (ms), and the preroll anchor for it
    pub loop_start_ms: u32,
    pub loop_anchor: Option<LoopAnchor>,

    /// Absolute end of playback in ms
    pub end_time_ms: u32,
    /// Length of the current segment in playback ms
    pub duration_ms: u32,

    speed: f64,
    accumulated_ms: f64,
    /// Last speed change/resume; `None` until the first pull after a
    /// (re)start and while paused
    reference: Option<Instant>,
    /// Cleared while paused so a late pull cannot restart the clock
    running: bool,
}

impl Default for PlaybackTiming {
    fn default() -> Self {
        Self {
            seek_time_ms: 0,
            target_pcm_pos: 0,
            preroll_file_pos: 0,
            preroll_granule_pos: 0,
            total_loops: 1,
            current_loop: 0,
            loop_start_ms: 0,
            loop_anchor: None,
            end_time_ms: 0,
            duration_ms: 0,
            speed: 1.0,
            accumulated_ms: 0.0,
            reference: None,
            running: false,
        }
    }
}

impl PlaybackTiming {
    /// Fresh timing for a new `play_at`; speed goes back to 1.0
    pub fn reset_for_play(&mut self, total_loops: u32) {
        *self = Self {
            total_loops,
            running: true,
            ..Self::default()
        };
    }

    /// Current loop anchor derived from the last preroll seek
    pub fn preroll_anchor(&self) -> LoopAnchor {
        LoopAnchor {
            preroll_file_pos: self.preroll_file_pos,
            preroll_granule_pos: self.preroll_granule_pos,
            target_pcm_pos: self.target_pcm_pos,
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn has_start_time(&self) -> bool {
        self.reference.is_some()
    }

    /// Elapsed playback ms at `now` (speed-compensated)
    pub fn current_play_time(&self, now: Instant) -> f64 {
        self.accumulated_ms + self.running_ms(now)
    }

    fn running_ms(&self, now: Instant) -> f64 {
        match self.reference {
            Some(reference) => {
                now.saturating_duration_since(reference).as_secs_f64() * 1000.0 * self.speed
            }
            None => 0.0,
        }
    }

    /// Start the clock on the first pull after a (re)start
    pub fn anchor_if_needed(&mut self, now: Instant) {
        if self.running && self.reference.is_none() {
            self.reference = Some(now);
            self.accumulated_ms = 0.0;
        }
    }

    /// Fold the running segment into the accumulated time
    fn fold(&mut self, now: Instant) {
        if self.reference.is_some() {
            self.accumulated_ms += self.running_ms(now);
            self.reference = Some(now);
        }
    }

    /// Change speed; time already played is accounted at the old speed
    pub fn set_speed(&mut self, speed: f64, now: Instant) {
        self.fold(now);
        self.speed = speed;
    }

    pub fn pause(&mut self, now: Instant) {
        self.fold(now);
        self.reference = None;
        self.running = false;
    }

    pub fn resume(&mut self, now: Instant) {
        self.reference = Some(now);
        self.running = true;
    }

    /// Restart elapsed time from zero (after a seek or loop)
    pub fn restart_clock(&mut self) {
        self.reference = None;
        self.accumulated_ms = 0.0;
    }

    /// Whether the loop counter allows another pass
    pub fn should_loop(&self) -> bool {
        self.total_loops == 0 || self.current_loop + 1 < self.total_loops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn running() -> PlaybackTiming {
        let mut timing = PlaybackTiming::default();
        timing.reset_for_play(1);
        timing
    }

    #[test]
    fn test_speed_changes_accumulate() {
        let t0 = Instant::now();
        let mut timing = running();
        timing.anchor_if_needed(t0);

        timing.set_speed(2.0, t0);
        timing.set_speed(1.0, t0 + ms(1000));
        let elapsed = timing.current_play_time(t0 + ms(2000));
        assert!((elapsed - 3000.0).abs() < 1e-6);
    }

    #[test]
    fn test_pause_freezes_time() {
        let t0 = Instant::now();
        let mut timing = running();
        timing.anchor_if_needed(t0);

        timing.pause(t0 + ms(500));
        assert!((timing.current_play_time(t0 + ms(5000)) - 500.0).abs() < 1e-6);
        assert!(!timing.has_start_time());

        // A pull racing the pause must not restart the clock
        timing.anchor_if_needed(t0 + ms(600));
        assert!(!timing.has_start_time());

        timing.resume(t0 + ms(5000));
        assert!((timing.current_play_time(t0 + ms(5250)) - 750.0).abs() < 1e-6);
    }

    #[test]
    fn test_speed_change_while_paused() {
        let t0 = Instant::now();
        let mut timing = running();
        timing.anchor_if_needed(t0);
        timing.pause(t0 + ms(100));
        timing.set_speed(2.0, t0 + ms(900));
        timing.resume(t0 + ms(1000));
        assert!((timing.current_play_time(t0 + ms(1100)) - 300.0).abs() < 1e-6);
    }

    #[test]
    fn test_anchor_only_once() {
        let t0 = Instant::now();
        let mut timing = running();
        timing.anchor_if_needed(t0);
        timing.anchor_if_needed(t0 + ms(300));
        assert!((timing.current_play_time(t0 + ms(400)) - 400.0).abs() < 1e-6);

        timing.restart_clock();
        assert_eq!(timing.current_play_time(t0 + ms(500)), 0.0);
    }

    #[test]
    fn test_loop_counter() {
        let mut timing = PlaybackTiming::default();
        timing.reset_for_play(2);
        assert!(timing.should_loop());
        timing.current_loop = 1;
        assert!(!timing.should_loop());

        timing.reset_for_play(0);
        timing.current_loop = 1000;
        assert!(timing.should_loop());
    }

    #[test]
    fn test_reset_for_play_restores_speed() {
        let mut timing = running();
        timing.set_speed(2.0, Instant::now());
        timing.reset_for_play(1);
        assert_eq!(timing.speed(), 1.0);
    }
}
