//! Error types for bolt-vq.

use thiserror::Error;

use crate::bolt::Reduction;

/// Errors that can occur while configuring the codec or answering queries.
///
/// Everything here is a caller contract violation. There is nothing to retry:
/// the kernels are pure computations over in-memory buffers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoltError {
    /// Code width outside `{2, 8, 16, 24, 32}` bytes.
    ///
    /// Every kernel is laid out per width, so an encoder is never built with
    /// an unsupported one.
    #[error("invalid nbytes {0}; must be one of {{2, 8, 16, 24, 32}}")]
    InvalidCodeWidth(usize),

    /// A buffer or matrix does not have the shape the configuration implies.
    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Zero rows or zero columns were supplied.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    /// Invalid parameter value (non-positive scale, out-of-range code, ...).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An operation ran before the state it depends on was set.
    #[error("not configured: {0} must be set first")]
    NotConfigured(&'static str),

    /// The reduction is declared but has no defined formula.
    #[error("reduction {0:?} is not supported")]
    UnsupportedReduction(Reduction),
}

pub type Result<T> = std::result::Result<T, BoltError>;

impl BoltError {
    pub(crate) fn shape(what: &'static str, expected: usize, actual: usize) -> Self {
        BoltError::ShapeMismatch {
            what,
            expected,
            actual,
        }
    }
}
