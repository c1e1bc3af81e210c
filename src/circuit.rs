//! Health-based admission control for one command.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::event::{CommandEvent, EventKind};
use crate::hook::HookRegistry;
use crate::state::{State, StateManager};
use crate::window::{HealthSnapshot, RollingWindow};

struct CircuitInner {
    name: String,
    state_manager: StateManager,
    window: RollingWindow,
    error_threshold_pct: u32,
    request_volume_threshold: u64,
    sleep_window: Duration,
    hooks: Arc<HookRegistry>,
}

/// Circuit breaker of a named command.
///
/// Closed circuits admit everything until the rolling window shows both
/// enough volume and too high an error rate. Open circuits reject until the
/// sleep window elapses, then admit exactly one probe (half-open) whose
/// outcome decides between closing and re-opening.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<CircuitInner>,
}

impl CircuitBreaker {
    /// Creates a closed circuit for `name`.
    pub fn new(name: impl Into<String>, settings: &Settings, hooks: Arc<HookRegistry>) -> Self {
        let inner = CircuitInner {
            name: name.into(),
            state_manager: StateManager::new(),
            window: RollingWindow::new(settings.rolling_window, settings.window_buckets),
            error_threshold_pct: settings.error_threshold_pct,
            request_volume_threshold: settings.request_volume_threshold,
            sleep_window: settings.sleep_window,
            hooks,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Command name this circuit guards.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Gets the current state without evaluating health.
    pub fn state(&self) -> State {
        self.inner.state_manager.current()
    }

    /// Current contents of the rolling window.
    pub fn snapshot(&self) -> HealthSnapshot {
        self.inner.window.snapshot()
    }

    /// Whether new calls are currently being refused, tripping first if the
    /// window has become unhealthy.
    pub fn is_open(&self) -> bool {
        match self.state() {
            State::Closed => self.trip_if_unhealthy(),
            State::Open | State::HalfOpen => true,
        }
    }

    /// Decides whether a new call may run.
    pub fn allow_request(&self) -> bool {
        let inner = &self.inner;
        match inner.state_manager.current() {
            State::Closed => !self.trip_if_unhealthy(),
            State::Open => {
                if inner.state_manager.attempt_half_open(inner.sleep_window) {
                    info!(command = %inner.name, "circuit half-open, admitting probe");
                    inner
                        .hooks
                        .execute_state_transition_hook(&inner.name, State::HalfOpen);
                    return true;
                }
                false
            }
            State::HalfOpen => {
                if inner.state_manager.rearm_probe(inner.sleep_window) {
                    debug!(command = %inner.name, "previous probe never reported, admitting another");
                    return true;
                }
                false
            }
        }
    }

    /// Records an outcome and applies its effect on the half-open state.
    ///
    /// While half-open, a success closes the circuit and only a failure or a
    /// timeout re-opens it. Other error kinds (rejections, short-circuits and
    /// fallback failures) did not reach the dependency and leave the probe
    /// outstanding.
    pub fn report_event(&self, kind: EventKind, start: Instant, run_duration: Duration) {
        let inner = &self.inner;
        inner.window.record(kind);

        if inner.state_manager.current() == State::HalfOpen {
            if kind == EventKind::Success {
                if inner.state_manager.reset_closed() {
                    inner.window.reset();
                    info!(command = %inner.name, "probe succeeded, circuit closed");
                    inner
                        .hooks
                        .execute_state_transition_hook(&inner.name, State::Closed);
                }
            } else if kind.is_execution_error() && inner.state_manager.revert_to_open() {
                warn!(command = %inner.name, event = %kind, "probe failed, circuit re-opened");
                inner
                    .hooks
                    .execute_state_transition_hook(&inner.name, State::Open);
            }
        }

        let event = CommandEvent {
            kind,
            start,
            run_duration,
        };
        inner.hooks.execute_event_hook(&inner.name, &event);
    }

    /// Forces the circuit open. Returns false if it already was.
    pub fn force_open(&self) -> bool {
        let Some(from) = self.inner.state_manager.trip_open() else {
            return false;
        };
        warn!(command = %self.inner.name, from = %from, "circuit forced open");
        self.inner
            .hooks
            .execute_state_transition_hook(&self.inner.name, State::Open);
        true
    }

    /// Forces the circuit closed and clears its window. Returns false if it already was.
    pub fn force_closed(&self) -> bool {
        let state_manager = &self.inner.state_manager;
        let closed = match state_manager.current() {
            State::Closed => false,
            from => state_manager.transition_from_to(from, State::Closed),
        };

        if closed {
            self.inner.window.reset();
            info!(command = %self.inner.name, "circuit forced closed");
            self.inner
                .hooks
                .execute_state_transition_hook(&self.inner.name, State::Closed);
        }
        closed
    }

    /// Trips the circuit if the window is over both thresholds. Returns true
    /// if the circuit is open afterwards.
    fn trip_if_unhealthy(&self) -> bool {
        let inner = &self.inner;
        let health = inner.window.snapshot();
        if health.total_requests < inner.request_volume_threshold
            || health.error_percentage() < u64::from(inner.error_threshold_pct)
        {
            return false;
        }

        if inner.state_manager.transition_from_to(State::Closed, State::Open) {
            warn!(
                command = %inner.name,
                error_pct = health.error_percentage(),
                requests = health.total_requests,
                "circuit opened"
            );
            inner
                .hooks
                .execute_state_transition_hook(&inner.name, State::Open);
        }
        true
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CommandConfig;
    use std::thread;

    fn circuit(config: CommandConfig) -> CircuitBreaker {
        let settings = config.resolve(&Settings::default());
        CircuitBreaker::new("svc", &settings, Arc::new(HookRegistry::new()))
    }

    fn fail(circuit: &CircuitBreaker, n: usize) {
        for _ in 0..n {
            circuit.report_event(EventKind::Failure, Instant::now(), Duration::ZERO);
        }
    }

    #[test]
    fn low_volume_never_trips() {
        let c = circuit(CommandConfig::new().request_volume_threshold(5));
        for _ in 0..4 {
            assert!(c.allow_request());
            fail(&c, 1);
        }
        assert_eq!(c.state(), State::Closed);

        // The fifth failure fills the volume floor; the next check trips.
        assert!(c.allow_request());
        fail(&c, 1);
        assert!(!c.allow_request());
        assert_eq!(c.state(), State::Open);
    }

    #[test]
    fn error_rate_below_threshold_stays_closed() {
        let c = circuit(
            CommandConfig::new()
                .request_volume_threshold(4)
                .error_threshold_pct(50),
        );
        fail(&c, 1);
        for _ in 0..3 {
            c.report_event(EventKind::Success, Instant::now(), Duration::ZERO);
        }
        assert!(c.allow_request());
        assert!(!c.is_open());
    }

    #[test]
    fn full_trip_probe_recover_cycle() {
        let c = circuit(
            CommandConfig::new()
                .request_volume_threshold(2)
                .sleep_window(Duration::from_millis(50)),
        );
        fail(&c, 2);
        assert!(!c.allow_request());
        assert!(!c.allow_request());
        assert_eq!(c.state(), State::Open);

        thread::sleep(Duration::from_millis(70));
        assert!(c.allow_request(), "first caller after sleep window is the probe");
        assert_eq!(c.state(), State::HalfOpen);
        assert!(!c.allow_request(), "only one probe at a time");

        c.report_event(EventKind::Success, Instant::now(), Duration::ZERO);
        assert_eq!(c.state(), State::Closed);
        assert_eq!(c.snapshot().total_requests, 0);
        assert!(c.allow_request());
    }

    #[test]
    fn failed_probe_reopens_with_fresh_sleep_window() {
        let c = circuit(
            CommandConfig::new()
                .request_volume_threshold(1)
                .sleep_window(Duration::from_millis(50)),
        );
        fail(&c, 1);
        assert!(!c.allow_request());
        thread::sleep(Duration::from_millis(70));
        assert!(c.allow_request());

        c.report_event(EventKind::Timeout, Instant::now(), Duration::ZERO);
        assert_eq!(c.state(), State::Open);
        assert!(!c.allow_request());
    }

    #[test]
    fn rejections_during_probe_do_not_reopen() {
        let c = circuit(
            CommandConfig::new()
                .request_volume_threshold(1)
                .sleep_window(Duration::from_millis(20)),
        );
        fail(&c, 1);
        assert!(!c.allow_request());
        thread::sleep(Duration::from_millis(40));
        assert!(c.allow_request());

        c.report_event(EventKind::ShortCircuited, Instant::now(), Duration::ZERO);
        c.report_event(EventKind::FallbackFailure, Instant::now(), Duration::ZERO);
        assert_eq!(c.state(), State::HalfOpen);
    }

    #[test]
    fn lost_probe_is_replaced_after_sleep_window() {
        let c = circuit(
            CommandConfig::new()
                .request_volume_threshold(1)
                .sleep_window(Duration::from_millis(30)),
        );
        fail(&c, 1);
        assert!(!c.allow_request());
        thread::sleep(Duration::from_millis(50));
        assert!(c.allow_request());
        assert!(!c.allow_request());

        thread::sleep(Duration::from_millis(50));
        assert!(c.allow_request());
        assert!(!c.allow_request());
    }

    #[test]
    fn concurrent_callers_admit_one_probe() {
        let c = circuit(
            CommandConfig::new()
                .request_volume_threshold(1)
                .sleep_window(Duration::from_millis(20)),
        );
        fail(&c, 1);
        assert!(!c.allow_request());
        thread::sleep(Duration::from_millis(40));

        let admitted: usize = (0..16)
            .map(|_| {
                let c = c.clone();
                thread::spawn(move || c.allow_request() as usize)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn manual_control() {
        let c = circuit(CommandConfig::new());
        assert!(c.force_open());
        assert!(!c.force_open());
        assert!(!c.allow_request());
        assert!(c.force_closed());
        assert!(!c.force_closed());
        assert!(c.allow_request());
    }

    #[test]
    fn hooks_observe_transitions() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hooks = Arc::new(HookRegistry::new());
        let opened = Arc::new(AtomicUsize::new(0));
        let events = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&opened);
        let e = Arc::clone(&events);
        hooks.set_on_open(move |_| {
            o.fetch_add(1, Ordering::SeqCst);
        });
        hooks.set_on_event(move |_, _| {
            e.fetch_add(1, Ordering::SeqCst);
        });

        let settings = CommandConfig::new()
            .request_volume_threshold(1)
            .resolve(&Settings::default());
        let c = CircuitBreaker::new("svc", &settings, hooks);
        fail(&c, 1);
        assert!(!c.allow_request());

        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }
}
