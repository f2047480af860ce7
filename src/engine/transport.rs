//! Transport State Machine
//!
//! Tracks play/pause state and the playhead against a wall clock. While
//! playing, the playhead is derived from a captured clock anchor rather than
//! accumulated, so it never drifts from the clock that drives it.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// Clock
// ============================================================================

/// Source of monotonic wall-clock time in seconds
pub trait Clock: Send + Sync {
    fn now_secs(&self) -> f64;
}

/// Clock backed by `std::time::Instant`
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Manually advanced clock for deterministic tests and offline previews
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward by `secs`
    pub fn advance(&self, secs: f64) {
        if let Ok(mut now) = self.now.lock() {
            *now += secs;
        }
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> f64 {
        self.now.lock().map(|now| *now).unwrap_or(0.0)
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Transport play state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayState {
    /// Not playing (default state)
    #[default]
    Stopped,
    /// Playhead advancing with the clock
    Playing,
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayState::Stopped => write!(f, "Stopped"),
            PlayState::Playing => write!(f, "Playing"),
        }
    }
}

/// Snapshot of the transport for display and serialization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportState {
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f32,
}

/// Playback clock and master volume
///
/// `current_time` is kept within `[0, duration]` after every operation.
pub struct Transport {
    state: PlayState,
    current_time: f64,
    duration: f64,
    volume: f32,
    /// Clock reading that corresponds to `current_time == 0`
    anchor: f64,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state)
            .field("current_time", &self.current_time)
            .field("duration", &self.duration)
            .field("volume", &self.volume)
            .finish()
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock::new()))
    }
}

impl Transport {
    /// Create a stopped transport at time 0 with unity volume
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: PlayState::Stopped,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            anchor: 0.0,
            clock,
        }
    }

    /// Start advancing from the current position
    ///
    /// State transition: Stopped -> Playing (no-op when already playing)
    pub fn play(&mut self) {
        if self.state == PlayState::Playing {
            debug!("[TRANSPORT] Already playing");
            return;
        }
        self.anchor = self.clock.now_secs() - self.current_time;
        self.state = PlayState::Playing;
        debug!("[TRANSPORT] Play from {:.3}s", self.current_time);
    }

    /// Stop advancing, keeping the current position
    ///
    /// State transition: Playing -> Stopped (no-op when already stopped)
    pub fn pause(&mut self) {
        if self.state == PlayState::Stopped {
            debug!("[TRANSPORT] Already stopped");
            return;
        }
        self.update();
        self.state = PlayState::Stopped;
        debug!("[TRANSPORT] Paused at {:.3}s", self.current_time);
    }

    /// Jump to `time`, clamped to `[0, duration]`
    ///
    /// Valid in either state and never changes it. The clock anchor is
    /// re-captured so advancement continues from the new position.
    pub fn seek(&mut self, time: f64) {
        let time = if time.is_finite() { time } else { 0.0 };
        self.current_time = time.clamp(0.0, self.duration);
        self.anchor = self.clock.now_secs() - self.current_time;
        debug!("[TRANSPORT] Seek to {:.3}s", self.current_time);
    }

    /// Set master volume, clamped to `[0, 1]`
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    /// Set the track duration, re-clamping the playhead
    pub fn set_duration(&mut self, duration: f64) {
        self.duration = if duration.is_finite() {
            duration.max(0.0)
        } else {
            0.0
        };
        if self.current_time > self.duration {
            self.seek(self.duration);
        }
    }

    /// Force Stopped with time and duration zeroed
    pub fn reset(&mut self) {
        self.state = PlayState::Stopped;
        self.current_time = 0.0;
        self.duration = 0.0;
        self.anchor = 0.0;
        debug!("[TRANSPORT] Reset");
    }

    /// Advance the playhead from the clock
    ///
    /// Returns true exactly when this update reached the end of the track and
    /// auto-stopped the transport.
    pub fn update(&mut self) -> bool {
        if self.state != PlayState::Playing {
            return false;
        }

        let elapsed = self.clock.now_secs() - self.anchor;
        if elapsed >= self.duration {
            self.current_time = self.duration;
            self.state = PlayState::Stopped;
            debug!("[TRANSPORT] Reached end at {:.3}s", self.duration);
            true
        } else {
            self.current_time = elapsed.max(0.0);
            false
        }
    }

    // ========================================================================
    // State Queries
    // ========================================================================

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    pub fn play_state(&self) -> PlayState {
        self.state
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// True when the playhead sits at the end of a non-empty track
    pub fn at_end(&self) -> bool {
        self.duration > 0.0 && self.current_time >= self.duration
    }

    pub fn snapshot(&self) -> TransportState {
        TransportState {
            is_playing: self.is_playing(),
            current_time: self.current_time,
            duration: self.duration,
            volume: self.volume,
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn transport_with_clock(duration: f64) -> (Transport, ManualClock) {
        let clock = ManualClock::new();
        let mut transport = Transport::new(Arc::new(clock.clone()));
        transport.set_duration(duration);
        (transport, clock)
    }

    #[test]
    fn test_default_state() {
        let (transport, _) = transport_with_clock(0.0);
        assert!(!transport.is_playing());
        assert_eq!(transport.play_state(), PlayState::Stopped);
        assert_eq!(transport.current_time(), 0.0);
        assert_eq!(transport.volume(), 1.0);
    }

    #[test]
    fn test_play_pause_transitions() {
        let (mut transport, clock) = transport_with_clock(10.0);
        transport.play();
        assert!(transport.is_playing());

        clock.advance(1.5);
        transport.pause();
        assert!(!transport.is_playing());
        assert!((transport.current_time() - 1.5).abs() < 1e-9);

        // Paused time does not advance
        clock.advance(3.0);
        transport.update();
        assert!((transport.current_time() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_resume_continues_from_pause_point() {
        let (mut transport, clock) = transport_with_clock(10.0);
        transport.play();
        clock.advance(2.0);
        transport.pause();
        clock.advance(5.0);
        transport.play();
        clock.advance(1.0);
        transport.update();
        assert!((transport.current_time() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_seek_clamps_to_duration() {
        let (mut transport, _) = transport_with_clock(5.0);
        transport.seek(7.0);
        assert_eq!(transport.current_time(), 5.0);
        transport.seek(-2.0);
        assert_eq!(transport.current_time(), 0.0);
    }

    #[test]
    fn test_seek_keeps_play_state_and_reanchors() {
        let (mut transport, clock) = transport_with_clock(20.0);
        transport.play();
        clock.advance(4.0);
        transport.seek(10.0);
        assert!(transport.is_playing());

        clock.advance(0.5);
        transport.update();
        assert!((transport.current_time() - 10.5).abs() < 1e-9);

        transport.pause();
        transport.seek(2.0);
        assert!(!transport.is_playing());
        assert_eq!(transport.current_time(), 2.0);
    }

    #[test]
    fn test_auto_stop_at_end() {
        let (mut transport, clock) = transport_with_clock(3.0);
        transport.play();
        clock.advance(2.0);
        assert!(!transport.update());
        clock.advance(2.0);
        assert!(transport.update());
        assert!(!transport.is_playing());
        assert_eq!(transport.current_time(), 3.0);
        assert!(transport.at_end());
        // Only reported once
        assert!(!transport.update());
    }

    #[test]
    fn test_volume_clamped() {
        let (mut transport, _) = transport_with_clock(1.0);
        transport.set_volume(1.7);
        assert_eq!(transport.volume(), 1.0);
        transport.set_volume(-0.3);
        assert_eq!(transport.volume(), 0.0);
        transport.set_volume(0.25);
        assert_eq!(transport.volume(), 0.25);
    }

    #[test]
    fn test_set_duration_reclamps_time() {
        let (mut transport, _) = transport_with_clock(10.0);
        transport.seek(8.0);
        transport.set_duration(4.0);
        assert_eq!(transport.current_time(), 4.0);
    }

    #[test]
    fn test_reset() {
        let (mut transport, clock) = transport_with_clock(10.0);
        transport.play();
        clock.advance(3.0);
        transport.reset();
        assert!(!transport.is_playing());
        assert_eq!(transport.current_time(), 0.0);
        assert_eq!(transport.duration(), 0.0);
    }

    #[test]
    fn test_double_play_is_no_op() {
        let (mut transport, clock) = transport_with_clock(10.0);
        transport.play();
        clock.advance(2.0);
        transport.play();
        transport.update();
        assert!((transport.current_time() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_play_state_display() {
        assert_eq!(format!("{}", PlayState::Stopped), "Stopped");
        assert_eq!(format!("{}", PlayState::Playing), "Playing");
    }
}
