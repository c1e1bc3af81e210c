//! Re-exports the types most callers need.
//!
//! # Example
//! ```rust,no_run
//! use command_guard::prelude::*;
//! ```

pub use crate::{
    CommandConfig, CommandError, CommandExecutor, CommandResult, EventKind, Fallback,
    HookRegistry, State,
};
