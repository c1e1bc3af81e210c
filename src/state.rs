//! Circuit state machine storage.

use atomic::Atomic;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

/// Represents the possible states of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// Calls are admitted; health is evaluated on every admission check.
    Closed = 0,

    /// Calls are rejected until the sleep window has elapsed.
    Open = 1,

    /// A single probe call has been admitted to test recovery.
    HalfOpen = 2,
}

impl State {
    /// Lowercase name, as used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state plus the instant it was entered.
///
/// Reads of the state are lock-free. Every transition happens while holding
/// the timestamp lock, so the state and the time it was entered never
/// disagree for a caller that takes the lock.
pub struct StateManager {
    state: Atomic<State>,
    since: Mutex<Instant>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl StateManager {
    /// Creates a state manager in the closed state.
    pub fn new() -> Self {
        Self {
            state: Atomic::new(State::Closed),
            since: Mutex::new(Instant::now()),
        }
    }

    /// Gets the current state.
    pub fn current(&self) -> State {
        self.state.load(Ordering::Acquire)
    }

    /// Moves from `from` to `to`. Returns false if the state was not `from`.
    pub fn transition_from_to(&self, from: State, to: State) -> bool {
        let mut since = self.since.lock();
        let moved = self
            .state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            *since = Instant::now();
        }
        moved
    }

    /// Moves from Open to HalfOpen once `sleep_window` has elapsed.
    ///
    /// At most one caller wins for a given open period.
    pub fn attempt_half_open(&self, sleep_window: Duration) -> bool {
        let mut since = self.since.lock();
        if self.current() != State::Open || since.elapsed() < sleep_window {
            return false;
        }
        self.state.store(State::HalfOpen, Ordering::Release);
        *since = Instant::now();
        true
    }

    /// Admits a replacement probe when the circuit has been half-open for a
    /// full `sleep_window` without the previous probe reporting back.
    pub fn rearm_probe(&self, sleep_window: Duration) -> bool {
        let mut since = self.since.lock();
        if self.current() != State::HalfOpen || since.elapsed() < sleep_window {
            return false;
        }
        *since = Instant::now();
        true
    }

    /// Moves to Open from any other state. Returns the state it left.
    pub fn trip_open(&self) -> Option<State> {
        let mut since = self.since.lock();
        let previous = self.state.swap(State::Open, Ordering::AcqRel);
        if previous == State::Open {
            return None;
        }
        *since = Instant::now();
        Some(previous)
    }

    /// Moves from HalfOpen back to Open with a fresh sleep window.
    pub fn revert_to_open(&self) -> bool {
        self.transition_from_to(State::HalfOpen, State::Open)
    }

    /// Moves from HalfOpen to Closed.
    pub fn reset_closed(&self) -> bool {
        self.transition_from_to(State::HalfOpen, State::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn starts_closed() {
        assert_eq!(StateManager::new().current(), State::Closed);
    }

    #[test]
    fn transition_requires_expected_state() {
        let state = StateManager::new();
        assert!(!state.reset_closed());
        assert_eq!(state.trip_open(), Some(State::Closed));
        assert_eq!(state.trip_open(), None);
        assert!(!state.revert_to_open());
    }

    #[test]
    fn half_open_waits_for_sleep_window() {
        let state = StateManager::new();
        state.trip_open();
        assert!(!state.attempt_half_open(Duration::from_secs(60)));
        assert!(state.attempt_half_open(Duration::ZERO));
        assert_eq!(state.current(), State::HalfOpen);
        assert!(!state.attempt_half_open(Duration::ZERO));
    }

    #[test]
    fn only_one_thread_becomes_the_probe() {
        let state = std::sync::Arc::new(StateManager::new());
        state.trip_open();

        let winners: usize = (0..16)
            .map(|_| {
                let state = std::sync::Arc::clone(&state);
                thread::spawn(move || state.attempt_half_open(Duration::ZERO))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();

        assert_eq!(winners, 1);
    }

    #[test]
    fn rearm_only_after_sleep_window() {
        let state = StateManager::new();
        assert!(!state.rearm_probe(Duration::ZERO));
        state.trip_open();
        state.attempt_half_open(Duration::ZERO);
        assert!(!state.rearm_probe(Duration::from_secs(60)));
        assert!(state.rearm_probe(Duration::ZERO));
    }
}
