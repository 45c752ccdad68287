//! Fatal assessment errors.
//!
//! Almost everything that can go "wrong" with a document is reported as data:
//! a missing field is `null`, a missing schema key is a `false` flag, an
//! over-long text is truncated and flagged. Only the two kinds of failure
//! below stop a document from producing a report.

use std::{error, fmt};

/// An error which prevents a report from being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssessError {
    /// The caller sent us something we can't work with. Not retried.
    Input(String),

    /// We broke one of our own structural invariants. Fatal for the document.
    Internal(String),
}

impl AssessError {
    /// Build an [`AssessError::Input`] error.
    pub fn input(msg: impl Into<String>) -> Self {
        AssessError::Input(msg.into())
    }

    /// Build an [`AssessError::Internal`] error.
    pub fn internal(msg: impl Into<String>) -> Self {
        AssessError::Internal(msg.into())
    }

    /// Is this the caller's fault?
    pub fn is_input_error(&self) -> bool {
        matches!(self, AssessError::Input(_))
    }
}

impl fmt::Display for AssessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssessError::Input(msg) => write!(f, "invalid input: {}", msg),
            AssessError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl error::Error for AssessError {}

/// Find an [`AssessError`] anywhere in an [`anyhow::Error`] chain.
pub fn find_assess_error(err: &anyhow::Error) -> Option<&AssessError> {
    err.chain().find_map(|cause| cause.downcast_ref::<AssessError>())
}
