//! Error taxonomy shared by the engine.

use std::fmt;

/// Errors surfaced by line construction, polytope maintenance and queries.
#[derive(Clone, Debug, PartialEq)]
pub enum VisError {
    /// Coincident points, zero-area or non-convex polygon, coplanar query pair.
    DegenerateInput { reason: String },
    /// A non-finite intermediate value; the offending vertex is dropped locally.
    NumericOverflow { context: String },
    /// Recursion depth or facet count bound exceeded.
    ResourceExhausted { reason: String },
    /// The scene collaborator failed to answer a ray query.
    SceneQueryFailed { reason: String, transient: bool },
}

impl VisError {
    pub(crate) fn degenerate(reason: impl Into<String>) -> Self {
        Self::DegenerateInput {
            reason: reason.into(),
        }
    }

    pub(crate) fn overflow(context: impl Into<String>) -> Self {
        Self::NumericOverflow {
            context: context.into(),
        }
    }

    pub(crate) fn exhausted(reason: impl Into<String>) -> Self {
        Self::ResourceExhausted {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for VisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegenerateInput { reason } => write!(f, "degenerate input: {reason}"),
            Self::NumericOverflow { context } => {
                write!(f, "non-finite value while {context}")
            }
            Self::ResourceExhausted { reason } => write!(f, "resource bound exceeded: {reason}"),
            Self::SceneQueryFailed { reason, transient } => {
                let kind = if *transient { "transient" } else { "permanent" };
                write!(f, "scene query failed ({kind}): {reason}")
            }
        }
    }
}

impl std::error::Error for VisError {}
