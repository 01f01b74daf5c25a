//! Shell error types.

use thiserror::Error;

/// Error type for controller lifecycle misuse.
///
/// These are programming errors, not runtime conditions: a controller is
/// attached exactly once and detached at most once.
#[derive(Error, Debug)]
pub enum ShellError {
    /// The controller already holds live subscriptions.
    #[error("Controller is already attached")]
    AlreadyAttached,

    /// The controller has no live subscriptions to drive.
    #[error("Controller is not attached")]
    NotAttached,
}

/// Result type alias using ShellError.
pub type ShellResult<T> = Result<T, ShellError>;
