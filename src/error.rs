//! Error taxonomy for the bus's soft-failure surface.
//!
//! Programming errors (type mismatches, reentrancy violations, empty-label
//! removal, optuple arity overflow) are fatal by contract and are reported
//! as panics via the [`fatal!`] macro rather than through this type — see
//! the crate-level docs for the rationale. `ConduitError` only covers the
//! paths the spec marks as "soft": conversion failures and unknown-channel
//! lookups reached through the dynamic invocation surface.

use thiserror::Error;

/// Errors surfaced by the dynamic (scripting-facing) invocation surface.
#[derive(Debug, Error)]
pub enum ConduitError {
    /// No channel is registered under this name.
    #[error("unknown channel \"{0}\"")]
    UnknownChannel(String),

    /// An argument in a dynamic call could not be converted to the
    /// channel's parameter type.
    #[error("channel \"{channel}\": argument {index} could not be converted: {reason}")]
    ConversionFailure {
        channel: String,
        index: usize,
        reason: String,
    },

    /// A dynamic call supplied the wrong number of arguments.
    #[error("channel \"{channel}\": expected {expected} argument(s), got {got}")]
    ArityMismatch {
        channel: String,
        expected: usize,
        got: usize,
    },
}

/// Convenience alias for the soft-error surface.
pub type ConduitResult<T> = Result<T, ConduitError>;

/// Panics with a formatted message, for the taxonomy's fatal ("programming
/// error") cases: type mismatch on lookup, mutating a list mid-walk,
/// removing an unlabeled subscriber.
macro_rules! fatal {
    ($($arg:tt)*) => {
        panic!($($arg)*)
    };
}

pub(crate) use fatal;
