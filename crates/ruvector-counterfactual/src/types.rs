//! Core types shared by the push engine, the incremental maintainer, and the
//! explanation search.
//!
//! Provides [`ScoreMap`], the single sparse zero-default map used for both
//! estimates and residuals, the per-target [`PprState`], the explicit
//! [`PprStore`] collection, and the [`PushConfig`] parameters.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CounterfactualError, Result, ValidationError};

/// Opaque node handle.
pub type NodeId = usize;

// ---------------------------------------------------------------------------
// ScoreMap
// ---------------------------------------------------------------------------

/// Sparse `NodeId -> f64` mapping where every absent key reads as `0.0`.
///
/// Both the estimate vector `p` and the residual vector `r` use this type so
/// there is exactly one definition of "absent key" in the crate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreMap {
    values: HashMap<NodeId, f64>,
}

impl ScoreMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a map holding a single entry.
    pub fn singleton(node: NodeId, value: f64) -> Self {
        let mut map = Self::new();
        map.set(node, value);
        map
    }

    /// Value at `node`, or `0.0` if absent.
    #[inline]
    pub fn get(&self, node: NodeId) -> f64 {
        self.values.get(&node).copied().unwrap_or(0.0)
    }

    /// Overwrite the value at `node`.
    #[inline]
    pub fn set(&mut self, node: NodeId, value: f64) {
        self.values.insert(node, value);
    }

    /// Add `delta` to the value at `node` and return the updated value.
    #[inline]
    pub fn add(&mut self, node: NodeId, delta: f64) -> f64 {
        let slot = self.values.entry(node).or_insert(0.0);
        *slot += delta;
        *slot
    }

    /// `true` if `node` has an explicit entry (even a zero one).
    pub fn contains(&self, node: NodeId) -> bool {
        self.values.contains_key(&node)
    }

    /// Iterate over explicit `(node, value)` entries in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.values.iter().map(|(&node, &value)| (node, value))
    }

    /// Nodes whose absolute value exceeds `threshold`.
    pub fn nodes_above(&self, threshold: f64) -> impl Iterator<Item = NodeId> + '_ {
        self.iter()
            .filter(move |(_, value)| value.abs() > threshold)
            .map(|(node, _)| node)
    }

    /// Number of explicit entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` if no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Largest absolute stored value, `0.0` for an empty map.
    pub fn max_abs(&self) -> f64 {
        self.values.values().fold(0.0f64, |acc, v| acc.max(v.abs()))
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Entries sorted by descending value, ties broken by node id.
    pub fn ranked(&self) -> Vec<(NodeId, f64)> {
        let mut out: Vec<(NodeId, f64)> = self.iter().collect();
        out.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        out
    }
}

impl FromIterator<(NodeId, f64)> for ScoreMap {
    fn from_iter<I: IntoIterator<Item = (NodeId, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// PPR state
// ---------------------------------------------------------------------------

/// Reverse-push state for a single target `t`.
///
/// Holds the converged estimate `p` and the unconverged residual `r`. At
/// every step of the push loop, for every node `u`:
///
/// `ppr(u, t) = p[u] + sum_v r[v] * ppr(u, v)`
///
/// Once every `|r[v]| <= epsilon`, each `p[u]` is within `epsilon` of
/// `ppr(u, t)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PprState {
    /// Target node the scores are personalized towards.
    pub target: NodeId,
    /// Converged score mass `p`.
    pub estimate: ScoreMap,
    /// Residual mass `r` awaiting propagation.
    pub residual: ScoreMap,
}

impl PprState {
    /// Cold-start state: `p = {}`, `r = {target: 1}`.
    pub fn cold(target: NodeId) -> Self {
        Self {
            target,
            estimate: ScoreMap::new(),
            residual: ScoreMap::singleton(target, 1.0),
        }
    }

    /// Reset to the cold-start state in place.
    pub fn reset(&mut self) {
        self.estimate.clear();
        self.residual = ScoreMap::singleton(self.target, 1.0);
    }

    /// Approximate `ppr(node, target)`.
    #[inline]
    pub fn score(&self, node: NodeId) -> f64 {
        self.estimate.get(node)
    }

    /// `true` if every residual is within `epsilon`.
    pub fn is_converged(&self, epsilon: f64) -> bool {
        self.residual.max_abs() <= epsilon
    }
}

/// Explicit collection of per-target PPR states.
///
/// Replaces implicit "last computed" fields: whoever computes states owns the
/// store and passes it by reference to the operations that read it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PprStore {
    states: BTreeMap<NodeId, PprState>,
}

impl PprStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or replace) the state for its target.
    pub fn insert(&mut self, state: PprState) {
        self.states.insert(state.target, state);
    }

    /// State for `target`.
    ///
    /// # Errors
    ///
    /// [`CounterfactualError::NotFound`] if no state was stored for `target`.
    pub fn get(&self, target: NodeId) -> Result<&PprState> {
        self.states
            .get(&target)
            .ok_or(CounterfactualError::NotFound { target })
    }

    /// Approximate `ppr(node, target)`.
    pub fn score(&self, target: NodeId, node: NodeId) -> Result<f64> {
        Ok(self.get(target)?.score(node))
    }

    /// `true` if a state is stored for `target`.
    pub fn contains(&self, target: NodeId) -> bool {
        self.states.contains_key(&target)
    }

    /// Stored targets in ascending order.
    pub fn targets(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.states.keys().copied()
    }

    /// Iterate over stored states in ascending target order.
    pub fn iter(&self) -> impl Iterator<Item = &PprState> {
        self.states.values()
    }

    /// Mutable iteration over stored states.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PprState> {
        self.states.values_mut()
    }

    /// Copy of the states for `targets` only.
    ///
    /// # Errors
    ///
    /// [`CounterfactualError::NotFound`] for the first missing target.
    pub fn subset(&self, targets: &[NodeId]) -> Result<PprStore> {
        let mut out = PprStore::new();
        for &target in targets {
            out.insert(self.get(target)?.clone());
        }
        Ok(out)
    }

    /// Number of stored states.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Parameters shared by every push invocation.
///
/// Deserializes with per-field defaults, so partial configs are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    /// Teleport probability of the underlying walk, in (0, 1).
    ///
    /// Default: `0.15`.
    pub alpha: f64,

    /// Residual magnitude below which a node is no longer pushed. Bounds the
    /// absolute error of every estimate.
    ///
    /// Default: `1e-6`.
    pub epsilon: f64,

    /// Safety cap on pushes per invocation. Hitting it is reported as
    /// [`CounterfactualError::InvariantViolation`].
    ///
    /// Default: `10_000_000`.
    pub max_pushes: usize,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            alpha: 0.15,
            epsilon: 1e-6,
            max_pushes: 10_000_000,
        }
    }
}

impl PushConfig {
    /// Config with the given `alpha` and `epsilon` and the default push cap.
    pub fn new(alpha: f64, epsilon: f64) -> Self {
        Self {
            alpha,
            epsilon,
            ..Self::default()
        }
    }

    /// Validate ranges eagerly.
    ///
    /// # Errors
    ///
    /// [`ValidationError::ParameterOutOfRange`] if `alpha` is not in `(0, 1)`,
    /// `epsilon` is not positive, or `max_pushes` is zero.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(ValidationError::out_of_range(
                "alpha",
                self.alpha,
                "(0.0, 1.0) exclusive",
            ));
        }
        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(ValidationError::out_of_range("epsilon", self.epsilon, "> 0.0"));
        }
        if self.max_pushes == 0 {
            return Err(ValidationError::out_of_range("max_pushes", 0, ">= 1"));
        }
        Ok(())
    }
}

/// Whether a push starts from scratch or resumes an existing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushMode {
    /// Reset to `p = {}`, `r = {target: 1}` before pushing.
    Cold,
    /// Resume from the state as given (after an incremental adjustment).
    Warm,
}

/// Counters reported by a push invocation.
#[derive(Debug, Clone, Copy)]
pub struct PushStats {
    /// Number of node pushes performed.
    pub pushes: usize,
    /// Largest absolute residual left after convergence.
    pub max_residual: f64,
    /// Wall-clock time spent.
    pub elapsed: Duration,
}
