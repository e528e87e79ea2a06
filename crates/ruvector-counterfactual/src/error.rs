//! Error types for the counterfactual crate.
//!
//! Provides structured error variants for invalid parameters, structural
//! graph operations that cannot be carried out, lookups of state that was
//! never computed, and broken push invariants. All errors implement
//! `std::error::Error` via `thiserror`.
//!
//! "No explanation exists" is not an error: the search returns `Ok(None)`.

use crate::types::NodeId;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CounterfactualError>;

/// Primary error type for PPR maintenance and explanation search.
#[derive(Debug, thiserror::Error)]
pub enum CounterfactualError {
    /// The caller supplied an invalid parameter (alpha, epsilon, weight,
    /// unknown node).
    #[error("invalid parameter: {0}")]
    InvalidParameter(#[from] ValidationError),

    /// A structural operation cannot be applied to the current graph state:
    /// removing a missing edge, removing all outgoing mass of a node, or
    /// restoring a batch that does not match the graph.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// PPR state was requested for a target that has never been computed.
    #[error("no PPR state computed for target {target}")]
    NotFound {
        /// Target node whose state is missing.
        target: NodeId,
    },

    /// The push loop exceeded its safety cap. Push is a contraction, so this
    /// points at malformed weights or a bug rather than a slow input.
    #[error("push invariant violated after {pushes} pushes: {detail}")]
    InvariantViolation {
        /// Number of pushes executed before giving up.
        pushes: usize,
        /// Human-readable explanation.
        detail: String,
    },
}

/// Validation errors for caller-supplied inputs.
///
/// These are raised eagerly before any computation begins so that callers get
/// clear diagnostics rather than silently diverging residuals.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// A parameter is outside its valid range.
    #[error("parameter out of range: {name} = {value} (expected {expected})")]
    ParameterOutOfRange {
        /// Name of the parameter.
        name: String,
        /// The invalid value (as a string for flexibility).
        value: String,
        /// Human-readable description of the valid range.
        expected: String,
    },

    /// An edge weight is NaN, infinite, non-positive, or larger than 1.
    #[error("edge ({source_node}, {target_node}) has invalid weight {weight} (expected (0, 1])")]
    InvalidWeight {
        /// Tail of the edge.
        source_node: NodeId,
        /// Head of the edge.
        target_node: NodeId,
        /// Offending weight.
        weight: f64,
    },

    /// The node is not part of the graph.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// A node's outgoing weights do not form a probability distribution.
    #[error("outgoing weights of node {node} sum to {sum} (expected 1)")]
    NotStochastic {
        /// Node whose row is malformed.
        node: NodeId,
        /// Observed weight sum.
        sum: f64,
    },
}

impl ValidationError {
    pub(crate) fn out_of_range(name: &str, value: impl ToString, expected: &str) -> Self {
        ValidationError::ParameterOutOfRange {
            name: name.into(),
            value: value.to_string(),
            expected: expected.into(),
        }
    }
}
