use crate::game::time::Time;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A seekable, pausable source of playback time shared between the driver
/// and whoever produces sound.
pub trait PlaybackClock: Send + Sync {
    fn current_time(&self) -> Time;
    fn pause(&self);
    fn resume(&self);
    fn seek(&self, time: &Time);
    fn is_paused(&self) -> bool;
}

struct ElapsedState {
    origin: Time,
    accumulated: Duration,
    running_since: Option<Instant>,
}

/// Wall-clock playback time for sessions without audio. Starts paused at 0.
pub struct ElapsedClock {
    state: Mutex<ElapsedState>,
}

impl Default for ElapsedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ElapsedClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ElapsedState {
                origin: Time::zero(),
                accumulated: Duration::ZERO,
                running_since: None,
            }),
        }
    }
}

impl PlaybackClock for ElapsedClock {
    fn current_time(&self) -> Time {
        let state = self.state.lock().unwrap();
        let running = state.running_since.map_or(Duration::ZERO, |t| t.elapsed());
        &state.origin + &Time::from_duration(state.accumulated + running)
    }

    fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(since) = state.running_since.take() {
            state.accumulated += since.elapsed();
        }
    }

    fn resume(&self) {
        let mut state = self.state.lock().unwrap();
        if state.running_since.is_none() {
            state.running_since = Some(Instant::now());
        }
    }

    fn seek(&self, time: &Time) {
        let mut state = self.state.lock().unwrap();
        state.origin = time.clone();
        state.accumulated = Duration::ZERO;
        if state.running_since.is_some() {
            state.running_since = Some(Instant::now());
        }
    }

    fn is_paused(&self) -> bool {
        self.state.lock().unwrap().running_since.is_none()
    }
}

/// Clock that only moves when told to.
#[cfg(test)]
pub struct ManualClock {
    now: Mutex<Time>,
    paused: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Time::zero()),
            paused: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn set(&self, time: Time) {
        *self.now.lock().unwrap() = time;
    }

    pub fn advance(&self, by: &Time) {
        let mut now = self.now.lock().unwrap();
        *now = &*now + by;
    }
}

#[cfg(test)]
impl PlaybackClock for ManualClock {
    fn current_time(&self) -> Time {
        self.now.lock().unwrap().clone()
    }

    fn pause(&self) {
        self.paused.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    fn seek(&self, time: &Time) {
        self.set(time.clone());
    }

    fn is_paused(&self) -> bool {
        self.paused.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn elapsed_clock_starts_paused_at_zero() {
        let clock = ElapsedClock::new();
        assert!(clock.is_paused());
        thread::sleep(Duration::from_millis(5));
        assert_eq!(clock.current_time(), Time::zero());
    }

    #[test]
    fn elapsed_clock_runs_and_freezes() {
        let clock = ElapsedClock::new();
        clock.resume();
        thread::sleep(Duration::from_millis(20));
        clock.pause();
        let frozen = clock.current_time();
        assert!(frozen >= Time::from_ratio(20, 1000));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.current_time(), frozen);

        clock.resume();
        thread::sleep(Duration::from_millis(5));
        assert!(clock.current_time() > frozen);
    }

    #[test]
    fn elapsed_clock_seek_keeps_run_state() {
        let clock = ElapsedClock::new();
        clock.seek(&Time::from_seconds(-2));
        assert_eq!(clock.current_time(), Time::from_seconds(-2));

        clock.resume();
        clock.seek(&Time::from_seconds(30));
        thread::sleep(Duration::from_millis(5));
        let now = clock.current_time();
        assert!(now > Time::from_seconds(30) && now < Time::from_seconds(31));
        assert!(!clock.is_paused());
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new();
        clock.advance(&Time::from_ratio(1, 2));
        clock.advance(&Time::from_ratio(1, 2));
        assert_eq!(clock.current_time(), Time::from_seconds(1));
        clock.seek(&Time::from_seconds(5));
        assert_eq!(clock.current_time(), Time::from_seconds(5));
    }
}
