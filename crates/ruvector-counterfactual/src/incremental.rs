//! Incremental maintenance of reverse-push states under batch edge edits.
//!
//! Editing node `u`'s outgoing row only breaks the push invariant at `u`
//! itself:
//!
//! `p[u] + alpha * r[u] = alpha * [u = t] + (1 - alpha) * sum_w W(u, w) * p[w]`
//!
//! so a single closed-form correction of `r[u]` restores it for the edited
//! row, after which a warm push repropagates the disturbance. Nothing else in
//! the graph has to be visited up front.
//!
//! # References
//!
//! Zhang, Lofgren, Goel. *Approximate Personalized PageRank on Dynamic
//! Graphs.* KDD 2016.

use tracing::{debug, trace};

use crate::error::{CounterfactualError, Result};
use crate::graph::{EdgeRemoval, WeightedGraph, WEIGHT_TOLERANCE};
use crate::reverse_push::ReversePushSolver;
use crate::types::{NodeId, PprState, PprStore, PushMode};

// ---------------------------------------------------------------------------
// Closed-form residual corrections
// ---------------------------------------------------------------------------

/// Mean of `p` over the edited edges weighted by their edge weights, plus the
/// total weight. Returns `(0, 0)` for an empty batch.
fn weighted_average(state: &PprState, neighbors: &[NodeId], weights: &[f64]) -> (f64, f64) {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return (0.0, 0.0);
    }
    let mass: f64 = neighbors
        .iter()
        .zip(weights)
        .map(|(&n, &w)| state.estimate.get(n) * w)
        .sum();
    (mass / total, total)
}

/// Weighted average of `p` over `u`'s current row implied by the invariant:
/// `(p[u] + alpha * r[u] - alpha * [u = t]) / (1 - alpha)`.
fn implied_row_average(state: &PprState, u: NodeId, alpha: f64) -> f64 {
    let indicator = if u == state.target { alpha } else { 0.0 };
    (state.estimate.get(u) + alpha * state.residual.get(u) - indicator) / (1.0 - alpha)
}

/// Residual correction `delta_r` for deleting `(u, n)` for every `n` in
/// `neighbors`, to be **subtracted** from `r[u]` before the deletion.
///
/// With `S` the removed weight and `avg` the weight-averaged estimate of the
/// removed neighbors:
///
/// `delta_r = (avg - old_avg) * S / (1 - S) * (1 - alpha) / alpha`
///
/// Must be called while the edges are still present.
///
/// # Errors
///
/// [`CounterfactualError::InvalidOperation`] if an edge is missing or the
/// batch carries all of `u`'s outgoing mass.
pub fn deletion_residual_delta(
    graph: &WeightedGraph,
    u: NodeId,
    neighbors: &[NodeId],
    state: &PprState,
    alpha: f64,
) -> Result<f64> {
    let weights = neighbors
        .iter()
        .map(|&n| {
            graph.weight(u, n).ok_or_else(|| {
                CounterfactualError::InvalidOperation(format!("edge ({u}, {n}) does not exist"))
            })
        })
        .collect::<Result<Vec<f64>>>()?;

    let (avg_deleted, sum_weights) = weighted_average(state, neighbors, &weights);
    if sum_weights == 0.0 {
        return Ok(0.0);
    }
    if sum_weights >= 1.0 - WEIGHT_TOLERANCE {
        return Err(CounterfactualError::InvalidOperation(format!(
            "closed-form update undefined: batch removes all outgoing mass of node {u}"
        )));
    }

    let old_avg = implied_row_average(state, u, alpha);
    let tmp = (avg_deleted - old_avg) * sum_weights / (1.0 - sum_weights);
    Ok(tmp * (1.0 - alpha) / alpha)
}

/// Residual correction for inserting `(u, n_i)` with weights `w_i`, to be
/// **added** to `r[u]` before the insertion.
///
/// The existing row is scaled by `(1 - S)` on insertion, so with `old_avg`
/// the implied average of the current row and `avg` that of the batch:
///
/// `delta_r = (1 - alpha) / alpha * (new_avg - old_avg)`
///
/// where `new_avg = (1 - S) * old_avg + S * avg`, or `S * avg` when `u`
/// currently has no outgoing edges.
///
/// # Errors
///
/// [`CounterfactualError::InvalidOperation`] if the lengths differ.
pub fn insertion_residual_delta(
    graph: &WeightedGraph,
    u: NodeId,
    neighbors: &[NodeId],
    weights: &[f64],
    state: &PprState,
    alpha: f64,
) -> Result<f64> {
    if neighbors.len() != weights.len() {
        return Err(CounterfactualError::InvalidOperation(format!(
            "insert batch for node {u} has {} neighbors but {} weights",
            neighbors.len(),
            weights.len()
        )));
    }
    let (avg_inserted, sum_weights) = weighted_average(state, neighbors, weights);
    if sum_weights == 0.0 {
        return Ok(0.0);
    }

    let old_avg = implied_row_average(state, u, alpha);
    let new_avg = if graph.out_degree(u) > 0 {
        (1.0 - sum_weights) * old_avg + sum_weights * avg_inserted
    } else {
        sum_weights * avg_inserted
    };
    Ok((new_avg - old_avg) * (1.0 - alpha) / alpha)
}

/// Subtract the deletion correction from `r[u]`. Returns the correction.
///
/// # Errors
///
/// See [`deletion_residual_delta`].
pub fn adjust_before_deletion(
    graph: &WeightedGraph,
    u: NodeId,
    neighbors: &[NodeId],
    state: &mut PprState,
    alpha: f64,
) -> Result<f64> {
    let delta_r = deletion_residual_delta(graph, u, neighbors, state, alpha)?;
    state.residual.add(u, -delta_r);
    Ok(delta_r)
}

/// Add the insertion correction to `r[u]`. Returns the correction.
///
/// # Errors
///
/// See [`insertion_residual_delta`].
pub fn adjust_before_insertion(
    graph: &WeightedGraph,
    u: NodeId,
    neighbors: &[NodeId],
    weights: &[f64],
    state: &mut PprState,
    alpha: f64,
) -> Result<f64> {
    let delta_r = insertion_residual_delta(graph, u, neighbors, weights, state, alpha)?;
    state.residual.add(u, delta_r);
    Ok(delta_r)
}

// ---------------------------------------------------------------------------
// IncrementalMaintainer
// ---------------------------------------------------------------------------

/// Applies batch edits to a graph and brings a set of converged states up to
/// date without restarting them.
#[derive(Debug, Clone, Default)]
pub struct IncrementalMaintainer {
    solver: ReversePushSolver,
}

impl IncrementalMaintainer {
    /// Create a maintainer around `solver`.
    pub fn new(solver: ReversePushSolver) -> Self {
        Self { solver }
    }

    /// The underlying push solver.
    pub fn solver(&self) -> &ReversePushSolver {
        &self.solver
    }

    /// Delete `neighbors` from `u`'s row and update every state in `states`.
    ///
    /// When the batch leaves some outgoing mass at `u` (e.g. a self-loop),
    /// each state's `r[u]` is corrected analytically and then warm-pushed.
    /// When the batch is `u`'s entire row, the closed form is undefined, so
    /// `u` is detached and every state is recomputed from a cold start.
    ///
    /// The edit lasts as long as the returned guard; drop it to restore the
    /// graph (states are not rolled back). On error the graph is restored.
    ///
    /// # Errors
    ///
    /// - [`CounterfactualError::InvalidOperation`] for missing or repeated
    ///   edges.
    /// - Any error from [`ReversePushSolver::push`].
    pub fn delete_edges<'g>(
        &self,
        graph: &'g mut WeightedGraph,
        u: NodeId,
        neighbors: &[NodeId],
        states: &mut PprStore,
    ) -> Result<EdgeRemoval<'g>> {
        let alpha = self.solver.alpha();
        // Distinct, existing edges only: a batch of that shape with as many
        // entries as the row is the row itself.
        graph.batch_weights(u, neighbors)?;
        let whole_row = !neighbors.is_empty() && neighbors.len() == graph.out_degree(u);

        if whole_row {
            let tx = graph.begin_detach(u)?;
            debug!(
                target: "ruvector_counterfactual::incremental",
                node = u,
                states = states.len(),
                removed_weight = tx.removed().total_weight(),
                "batch covers the whole row; detaching and recomputing cold",
            );
            for state in states.iter_mut() {
                self.solver.push(tx.graph(), state, PushMode::Cold)?;
            }
            return Ok(tx);
        }

        // Corrections are read off the unedited graph.
        let deltas = states
            .iter()
            .map(|state| deletion_residual_delta(graph, u, neighbors, state, alpha))
            .collect::<Result<Vec<f64>>>()?;

        let tx = graph.begin_removal(u, neighbors)?;
        debug!(
            target: "ruvector_counterfactual::incremental",
            node = u,
            states = states.len(),
            removed_weight = tx.removed().total_weight(),
            "removed batch; repropagating corrected residuals",
        );
        for (state, delta_r) in states.iter_mut().zip(deltas) {
            trace!(
                target: "ruvector_counterfactual::incremental",
                node = u,
                target_node = state.target,
                delta_r,
                "residual correction before deletion",
            );
            state.residual.add(u, -delta_r);
            self.solver.push(tx.graph(), state, PushMode::Warm)?;
        }
        Ok(tx)
    }

    /// Insert `(u, n_i)` with weights `w_i` (scaling `u`'s existing row by
    /// `1 - sum(w_i)`) and update every state in `states`.
    ///
    /// # Errors
    ///
    /// - Any error from [`WeightedGraph::restore_edges`]; the graph and the
    ///   states are then unchanged.
    /// - Any error from [`ReversePushSolver::push`].
    pub fn insert_edges(
        &self,
        graph: &mut WeightedGraph,
        u: NodeId,
        neighbors: &[NodeId],
        weights: &[f64],
        states: &mut PprStore,
    ) -> Result<()> {
        let alpha = self.solver.alpha();
        let deltas = states
            .iter()
            .map(|state| insertion_residual_delta(graph, u, neighbors, weights, state, alpha))
            .collect::<Result<Vec<f64>>>()?;

        graph.restore_edges(u, neighbors, weights)?;
        for (state, delta_r) in states.iter_mut().zip(deltas) {
            state.residual.add(u, delta_r);
            self.solver.push(graph, state, PushMode::Warm)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
