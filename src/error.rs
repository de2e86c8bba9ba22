//! Error types for u-permute.

use thiserror::Error;

/// All errors produced by u-permute operations.
///
/// The three variants separate data-side problems (column contents that
/// cannot support the requested computation) from caller-side problems
/// (a bad argument, or a controller method invoked out of order).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermuteError {
    /// Column contents cannot support the requested statistic.
    #[error("invalid input in column '{column}': {message}")]
    InvalidInput { column: String, message: String },
    /// A caller-supplied argument is malformed or out of range.
    #[error("invalid argument '{name}': {message}")]
    InvalidArgument { name: String, message: String },
    /// A controller method was invoked out of state-machine order.
    #[error("invalid state: '{operation}' requires the {expected} state, but the controller is {actual}")]
    InvalidState {
        operation: &'static str,
        expected: &'static str,
        actual: &'static str,
    },
}
