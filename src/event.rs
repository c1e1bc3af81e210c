//! Outcome events reported to a command's circuit.

use std::fmt;
use std::time::{Duration, Instant};

/// The kind of outcome a call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The operation completed without error.
    Success,
    /// The operation returned an error.
    Failure,
    /// The operation did not complete before its deadline.
    Timeout,
    /// The admission pool had no free ticket.
    Rejected,
    /// The circuit was open.
    ShortCircuited,
    /// The fallback ran and succeeded.
    FallbackSuccess,
    /// The fallback ran and failed.
    FallbackFailure,
}

impl EventKind {
    /// Number of distinct event kinds.
    pub const COUNT: usize = 7;

    /// All event kinds, in index order.
    pub const ALL: [EventKind; EventKind::COUNT] = [
        EventKind::Success,
        EventKind::Failure,
        EventKind::Timeout,
        EventKind::Rejected,
        EventKind::ShortCircuited,
        EventKind::FallbackSuccess,
        EventKind::FallbackFailure,
    ];

    /// Whether this outcome is bad news for the command.
    pub fn is_error(self) -> bool {
        !matches!(self, EventKind::Success | EventKind::FallbackSuccess)
    }

    /// Whether this is the first outcome of a call rather than the outcome of
    /// its fallback. Every call records exactly one primary outcome.
    pub fn is_primary(self) -> bool {
        !matches!(self, EventKind::FallbackSuccess | EventKind::FallbackFailure)
    }

    /// Whether this outcome came from an attempt that actually reached the operation.
    pub(crate) fn is_execution_error(self) -> bool {
        matches!(self, EventKind::Failure | EventKind::Timeout)
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    /// Stable lowercase name, as used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Success => "success",
            EventKind::Failure => "failure",
            EventKind::Timeout => "timeout",
            EventKind::Rejected => "rejected",
            EventKind::ShortCircuited => "short-circuit",
            EventKind::FallbackSuccess => "fallback-success",
            EventKind::FallbackFailure => "fallback-failure",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single reported outcome.
#[derive(Debug, Clone, Copy)]
pub struct CommandEvent {
    /// What happened.
    pub kind: EventKind,
    /// When the call was issued.
    pub start: Instant,
    /// How long the operation ran; zero when it never ran.
    pub run_duration: Duration,
}
