//! Error types surfaced by command execution.

use std::error::Error;
use std::sync::Arc;

/// Boxed error accepted from operations and fallbacks.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// Shared, cloneable handle to an operation or fallback error.
pub type SharedError = Arc<dyn Error + Send + Sync + 'static>;

/// Result type for command execution.
pub type CommandResult = Result<(), CommandError>;

/// Error delivered to the caller of a command.
///
/// Every variant except [`CommandError::Config`] and [`CommandError::NoRuntime`]
/// is first reported to the command's circuit; the fallback (if any) then gets
/// a chance to suppress it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CommandError {
    /// The circuit is open and the call was short-circuited.
    #[error("circuit open")]
    CircuitOpen,

    /// The command already has its maximum number of calls in flight.
    #[error("max concurrency")]
    MaxConcurrency,

    /// The operation did not finish before its deadline. It may still be running.
    #[error("timeout")]
    Timeout,

    /// The wrapped operation returned an error or panicked.
    #[error(transparent)]
    Operation(SharedError),

    /// The fallback itself failed while handling `cause`.
    ///
    /// Both errors are part of the message, so neither is exposed as a source.
    #[error("fallback failed with '{fallback}'. run error was '{cause}'")]
    Fallback {
        /// Error returned by the fallback.
        fallback: SharedError,
        /// The error that triggered the fallback.
        cause: Box<CommandError>,
    },

    /// The command could not be set up from its configuration.
    #[error("invalid command configuration: {0}")]
    Config(#[from] ConfigError),

    /// The executor was called outside a Tokio runtime.
    #[error("no tokio runtime to run the command on")]
    NoRuntime,
}

impl CommandError {
    pub(crate) fn operation(err: BoxError) -> Self {
        CommandError::Operation(Arc::from(err))
    }

    pub(crate) fn fallback(cause: CommandError, fallback: BoxError) -> Self {
        CommandError::Fallback {
            fallback: Arc::from(fallback),
            cause: Box::new(cause),
        }
    }

    /// Returns the error that started the resolution, looking through fallback failures.
    pub fn root_cause(&self) -> &CommandError {
        match self {
            CommandError::Fallback { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    /// True if the call was short-circuited by an open circuit.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self.root_cause(), CommandError::CircuitOpen)
    }

    /// True if the call was rejected by the admission pool.
    pub fn is_max_concurrency(&self) -> bool {
        matches!(self.root_cause(), CommandError::MaxConcurrency)
    }

    /// True if the call hit its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root_cause(), CommandError::Timeout)
    }

    /// True if the fallback ran and failed.
    pub fn is_fallback_failure(&self) -> bool {
        matches!(self, CommandError::Fallback { .. })
    }
}

/// Invalid per-command settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Timeout must be greater than zero.
    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    /// At least one concurrent call must be allowed.
    #[error("max concurrent requests must be at least 1")]
    ZeroConcurrency,

    /// More tickets than the pool can track.
    #[error("max concurrent requests {0} exceeds the supported maximum")]
    ConcurrencyTooLarge(usize),

    /// Error threshold is a percentage.
    #[error("error threshold {0}% is outside 0..=100")]
    ThresholdOutOfRange(u32),

    /// The rolling window needs at least one bucket.
    #[error("rolling window must have at least one bucket")]
    ZeroBuckets,

    /// Each bucket must span at least one millisecond.
    #[error("rolling window of {window_ms}ms is too short for {buckets} buckets")]
    WindowTooShort {
        /// Window length in milliseconds.
        window_ms: u128,
        /// Requested bucket count.
        buckets: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_error_names_both_causes() {
        let err = CommandError::fallback(CommandError::CircuitOpen, "cache miss".into());
        assert_eq!(
            err.to_string(),
            "fallback failed with 'cache miss'. run error was 'circuit open'"
        );
        assert!(err.is_circuit_open());
        assert!(err.is_fallback_failure());
        assert!(err.source().is_none());
    }

    #[test]
    fn operation_error_keeps_its_message() {
        let err = CommandError::operation("connection refused".into());
        assert_eq!(err.to_string(), "connection refused");
        assert!(!err.is_timeout());
        assert!(matches!(err.root_cause(), CommandError::Operation(_)));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("pool exhausted")]
    struct PoolExhausted(#[source] std::io::Error);

    #[test]
    fn operation_error_chain_does_not_repeat() {
        let inner = PoolExhausted(std::io::Error::other("socket closed"));
        let err = CommandError::operation(Box::new(inner));
        assert_eq!(err.to_string(), "pool exhausted");

        let source = err.source().expect("inner source");
        assert_eq!(source.to_string(), "socket closed");
        assert!(source.source().is_none());
    }
}
