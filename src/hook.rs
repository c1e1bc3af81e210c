//! Observer callbacks for circuit transitions and reported events.

use crate::event::CommandEvent;
use crate::state::State;
use parking_lot::RwLock;
use std::sync::Arc;

type TransitionFn = Arc<dyn Fn(&str) + Send + Sync + 'static>;
type EventFn = Arc<dyn Fn(&str, &CommandEvent) + Send + Sync + 'static>;

/// A registry of callbacks shared by every circuit of an executor.
///
/// Callbacks receive the command name and are invoked after the state
/// change or event has been recorded, never while a circuit lock is held.
pub struct HookRegistry {
    on_open: RwLock<Option<TransitionFn>>,
    on_close: RwLock<Option<TransitionFn>>,
    on_half_open: RwLock<Option<TransitionFn>>,
    on_event: RwLock<Option<EventFn>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self {
            on_open: RwLock::new(None),
            on_close: RwLock::new(None),
            on_half_open: RwLock::new(None),
            on_event: RwLock::new(None),
        }
    }

    /// Sets the hook to call when a circuit opens.
    pub fn set_on_open<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a circuit closes.
    pub fn set_on_close<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_close.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a circuit admits a probe.
    pub fn set_on_half_open<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_half_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call for every reported event.
    pub fn set_on_event<F>(&self, f: F)
    where
        F: Fn(&str, &CommandEvent) + Send + Sync + 'static,
    {
        *self.on_event.write() = Some(Arc::new(f));
    }

    /// Executes the hook for a transition into `to`.
    pub fn execute_state_transition_hook(&self, name: &str, to: State) {
        let slot = match to {
            State::Open => &self.on_open,
            State::Closed => &self.on_close,
            State::HalfOpen => &self.on_half_open,
        };
        // Clone out so the callback may itself register hooks.
        let hook = slot.read().clone();
        if let Some(hook) = hook {
            hook(name);
        }
    }

    /// Executes the event hook.
    pub fn execute_event_hook(&self, name: &str, event: &CommandEvent) {
        let hook = self.on_event.read().clone();
        if let Some(hook) = hook {
            hook(name, event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    #[test]
    fn dispatches_by_target_state() {
        let hooks = HookRegistry::new();
        let opened = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&opened);
        hooks.set_on_open(move |name| {
            assert_eq!(name, "svc");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        hooks.execute_state_transition_hook("svc", State::Open);
        hooks.execute_state_transition_hook("svc", State::Closed);
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn event_hook_sees_kind() {
        let hooks = HookRegistry::new();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        hooks.set_on_event(move |_, event| sink.lock().push(event.kind));

        hooks.execute_event_hook(
            "svc",
            &CommandEvent {
                kind: EventKind::Timeout,
                start: Instant::now(),
                run_duration: Duration::ZERO,
            },
        );
        assert_eq!(*seen.lock(), vec![EventKind::Timeout]);
    }
}
