//! # command-guard
//!
//! Latency and fault tolerance for calls to dependencies that may be slow or
//! failing. Each call runs as a named *command*, and every command has:
//!
//! - **a deadline**: the caller gets [`CommandError::Timeout`] when the
//!   operation takes too long, even though the operation keeps running;
//! - **an admission pool**: at most `max_concurrent` calls run at once, the
//!   rest are rejected immediately with [`CommandError::MaxConcurrency`];
//! - **a circuit breaker**: when the rolling error rate is too high the
//!   circuit opens and calls fail fast with [`CommandError::CircuitOpen`]
//!   until a single probe call succeeds;
//! - **an optional fallback**: run once when the call is rejected, times out
//!   or fails, with the chance to turn the error into a success.
//!
//! Every outcome is recorded in the command's rolling health window, which is
//! what the circuit consults before admitting new calls.
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use command_guard::{CommandConfig, CommandExecutor, Fallback};
//! use std::time::Duration;
//!
//! # async fn fetch_profile() -> Result<(), std::io::Error> { Ok(()) }
//! # async fn demo() {
//! let executor = CommandExecutor::builder()
//!     .configure(
//!         "profile-service",
//!         CommandConfig::new()
//!             .timeout(Duration::from_millis(200))
//!             .max_concurrent(20),
//!     )
//!     .build();
//!
//! let fallback = Fallback::new(|cause| async move {
//!     println!("serving cached profile after: {cause}");
//!     Ok::<(), std::io::Error>(())
//! });
//!
//! match executor
//!     .execute_sync("profile-service", fetch_profile(), Some(fallback))
//!     .await
//! {
//!     Ok(()) => println!("served"),
//!     Err(err) if err.is_circuit_open() => println!("dependency is unhealthy"),
//!     Err(err) => println!("call failed: {err}"),
//! }
//! # }
//! ```
//!
//! ## Process-wide commands
//!
//! The free functions [`execute`], [`execute_sync`] and
//! [`configure_command`] share one lazily created executor, so every part of
//! a program that names the same command shares its health and capacity.
//!
//! All spawning happens on the ambient Tokio runtime.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod circuit;
mod config;
mod error;
mod event;
mod executor;
mod hook;
mod pool;
pub mod prelude;
mod registry;
mod state;
mod window;

use once_cell::sync::Lazy;
use std::future::Future;

// Re-exports
pub use circuit::CircuitBreaker;
pub use config::{
    CommandConfig, ExecutorBuilder, Settings, SettingsRegistry, DEFAULT_ERROR_THRESHOLD_PCT,
    DEFAULT_MAX_CONCURRENT, DEFAULT_REQUEST_VOLUME_THRESHOLD, DEFAULT_ROLLING_WINDOW,
    DEFAULT_SLEEP_WINDOW, DEFAULT_TIMEOUT, DEFAULT_WINDOW_BUCKETS,
};
pub use error::{BoxError, CommandError, CommandResult, ConfigError, SharedError};
pub use event::{CommandEvent, EventKind};
pub use executor::{CommandExecutor, Fallback, ResultHandle};
pub use hook::HookRegistry;
pub use pool::{AdmissionPool, Ticket};
pub use registry::{Command, CommandRegistry};
pub use state::State;
pub use window::{HealthSnapshot, RollingWindow};

static DEFAULT_EXECUTOR: Lazy<CommandExecutor> = Lazy::new(CommandExecutor::new);

/// The executor behind the free functions of this crate.
pub fn default_executor() -> &'static CommandExecutor {
    &DEFAULT_EXECUTOR
}

/// Configures a command of the process-wide executor.
pub fn configure_command(name: impl Into<String>, config: CommandConfig) {
    DEFAULT_EXECUTOR.configure(name, config);
}

/// Starts `run` as command `name` on the process-wide executor.
///
/// See [`CommandExecutor::execute`].
pub fn execute<Fut, E>(name: &str, run: Fut, fallback: Option<Fallback>) -> ResultHandle
where
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    DEFAULT_EXECUTOR.execute(name, run, fallback)
}

/// Runs `run` as command `name` on the process-wide executor and waits for
/// its resolution.
///
/// See [`CommandExecutor::execute_sync`].
pub async fn execute_sync<Fut, E>(name: &str, run: Fut, fallback: Option<Fallback>) -> CommandResult
where
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    DEFAULT_EXECUTOR.execute_sync(name, run, fallback).await
}
