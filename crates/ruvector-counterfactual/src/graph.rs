//! Directed, edge-weighted graph with row-stochastic outgoing weights.
//!
//! Every node's outgoing weights (self-loop included) form a probability
//! distribution. Batch removal renormalizes the remaining row by
//! `1 / (1 - sum_removed)`; restoration scales the row back by
//! `(1 - sum_restored)` *before* re-adding the edges, so the pair is an exact
//! inverse up to floating-point rounding.
//!
//! Temporary edits should go through [`EdgeRemoval`], which holds the
//! exclusive borrow of the graph and restores the row when dropped.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::error::{CounterfactualError, Result, ValidationError};
use crate::types::NodeId;

/// Tolerance used when comparing weight sums against 1.
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// WeightedGraph
// ---------------------------------------------------------------------------

/// Directed graph with per-edge weights in `(0, 1]`.
///
/// Outgoing rows are stored as ordered maps so iteration order is stable and
/// every traversal is restartable. The incoming index stores predecessor sets
/// only; weights always come from the outgoing row, so there is a single
/// source of truth for every edge weight.
#[derive(Debug, Clone, Default)]
pub struct WeightedGraph {
    out: BTreeMap<NodeId, BTreeMap<NodeId, f64>>,
    inc: BTreeMap<NodeId, BTreeSet<NodeId>>,
}

impl WeightedGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(source, target, weight)` triplets.
    ///
    /// Rows are taken as given; call [`validate_stochastic`](Self::validate_stochastic)
    /// if the caller's weights should be checked.
    ///
    /// # Errors
    ///
    /// [`ValidationError::InvalidWeight`] for any weight outside `(0, 1]`.
    pub fn from_edges(edges: impl IntoIterator<Item = (NodeId, NodeId, f64)>) -> Result<Self> {
        let mut graph = Self::new();
        for (u, v, w) in edges {
            graph.add_edge(u, v, w)?;
        }
        Ok(graph)
    }

    /// Add an isolated node. No-op if it already exists.
    pub fn add_node(&mut self, node: NodeId) {
        self.out.entry(node).or_default();
        self.inc.entry(node).or_default();
    }

    /// Add or overwrite the edge `(u, v)` without touching the rest of the
    /// row. Missing endpoints are created.
    ///
    /// # Errors
    ///
    /// [`ValidationError::InvalidWeight`] if `weight` is not in `(0, 1]`.
    pub fn add_edge(&mut self, u: NodeId, v: NodeId, weight: f64) -> Result<()> {
        check_weight(u, v, weight)?;
        self.add_node(u);
        self.add_node(v);
        self.link(u, v, weight);
        Ok(())
    }

    fn link(&mut self, u: NodeId, v: NodeId, weight: f64) {
        self.out.entry(u).or_default().insert(v, weight);
        self.inc.entry(v).or_default().insert(u);
    }

    fn unlink(&mut self, u: NodeId, v: NodeId) -> Option<f64> {
        let weight = self.out.get_mut(&u)?.remove(&v)?;
        if let Some(preds) = self.inc.get_mut(&v) {
            preds.remove(&u);
        }
        Some(weight)
    }

    fn scale_row(&mut self, u: NodeId, factor: f64) {
        if let Some(row) = self.out.get_mut(&u) {
            for weight in row.values_mut() {
                *weight *= factor;
            }
        }
    }

    fn require_node(&self, node: NodeId) -> Result<()> {
        if self.contains_node(node) {
            Ok(())
        } else {
            Err(ValidationError::UnknownNode(node).into())
        }
    }

    /// `true` if `node` is part of the graph.
    pub fn contains_node(&self, node: NodeId) -> bool {
        self.out.contains_key(&node)
    }

    /// All nodes in ascending order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.out.keys().copied()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.out.len()
    }

    /// Number of edges, self-loops included.
    pub fn edge_count(&self) -> usize {
        self.out.values().map(BTreeMap::len).sum()
    }

    /// Weight of `(u, v)` if the edge exists.
    #[inline]
    pub fn weight(&self, u: NodeId, v: NodeId) -> Option<f64> {
        self.out.get(&u).and_then(|row| row.get(&v)).copied()
    }

    /// `true` if `(u, v)` exists.
    pub fn has_edge(&self, u: NodeId, v: NodeId) -> bool {
        self.weight(u, v).is_some()
    }

    /// Weight of the self-loop `(u, u)`, `0.0` if there is none.
    #[inline]
    pub fn self_weight(&self, u: NodeId) -> f64 {
        self.weight(u, u).unwrap_or(0.0)
    }

    /// Outgoing `(neighbor, weight)` pairs of `u` in ascending neighbor
    /// order. Empty for unknown nodes.
    pub fn outgoing(&self, u: NodeId) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.out
            .get(&u)
            .into_iter()
            .flat_map(|row| row.iter().map(|(&v, &w)| (v, w)))
    }

    /// Incoming `(predecessor, weight)` pairs of `v` in ascending predecessor
    /// order. Empty for unknown nodes.
    pub fn incoming(&self, v: NodeId) -> impl Iterator<Item = (NodeId, f64)> + '_ {
        self.inc.get(&v).into_iter().flat_map(move |preds| {
            preds
                .iter()
                .filter_map(move |&u| self.weight(u, v).map(|w| (u, w)))
        })
    }

    /// Outgoing neighbors of `u` other than `u` itself.
    pub fn actions(&self, u: NodeId) -> Vec<NodeId> {
        self.outgoing(u)
            .map(|(v, _)| v)
            .filter(|&v| v != u)
            .collect()
    }

    /// Number of outgoing edges of `u`.
    pub fn out_degree(&self, u: NodeId) -> usize {
        self.out.get(&u).map_or(0, BTreeMap::len)
    }

    /// Sum of the outgoing weights of `u`.
    pub fn out_weight_sum(&self, u: NodeId) -> f64 {
        self.outgoing(u).map(|(_, w)| w).sum()
    }

    /// Rescale `u`'s outgoing weights so they sum to 1.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::UnknownNode`] if `u` is not in the graph.
    /// - [`CounterfactualError::InvalidOperation`] if `u` has no outgoing edges.
    pub fn renormalize(&mut self, u: NodeId) -> Result<()> {
        self.require_node(u)?;
        let sum = self.out_weight_sum(u);
        if sum <= 0.0 {
            return Err(CounterfactualError::InvalidOperation(format!(
                "node {u} has no outgoing mass to renormalize"
            )));
        }
        self.scale_row(u, 1.0 / sum);
        Ok(())
    }

    /// Check that every non-dangling node's row sums to 1 within `tolerance`.
    ///
    /// # Errors
    ///
    /// [`ValidationError::NotStochastic`] for the first offending node.
    pub fn validate_stochastic(&self, tolerance: f64) -> std::result::Result<(), ValidationError> {
        for (&node, row) in &self.out {
            if row.is_empty() {
                continue;
            }
            let sum: f64 = row.values().sum();
            if (sum - 1.0).abs() > tolerance {
                return Err(ValidationError::NotStochastic { node, sum });
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Structural edits
    // -----------------------------------------------------------------------

    /// Remove the edges `(u, n)` for every `n` in `neighbors` and renormalize
    /// the rest of `u`'s row by `1 / (1 - sum_removed)`.
    ///
    /// Returns the removed weights in the order of `neighbors`. The graph is
    /// unchanged if an error is returned.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::UnknownNode`] if `u` is not in the graph.
    /// - [`CounterfactualError::InvalidOperation`] if an edge is missing, a
    ///   neighbor is repeated, or the removed weights sum to 1 (the node would
    ///   keep no outgoing mass).
    pub fn remove_edges(&mut self, u: NodeId, neighbors: &[NodeId]) -> Result<Vec<f64>> {
        self.require_node(u)?;
        let weights = self.batch_weights(u, neighbors)?;
        let removed: f64 = weights.iter().sum();
        if removed >= 1.0 - WEIGHT_TOLERANCE {
            return Err(CounterfactualError::InvalidOperation(format!(
                "removing {neighbors:?} from node {u} would remove all outgoing mass \
                 (sum = {removed})"
            )));
        }

        for &n in neighbors {
            self.unlink(u, n);
        }
        self.scale_row(u, 1.0 / (1.0 - removed));
        Ok(weights)
    }

    /// Inverse of [`remove_edges`](Self::remove_edges): scale the remaining
    /// row of `u` by `(1 - sum(weights))`, then re-add each `(u, n)` with its
    /// recorded weight.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::UnknownNode`] if `u` is not in the graph.
    /// - [`ValidationError::InvalidWeight`] for weights outside `(0, 1]`.
    /// - [`CounterfactualError::InvalidOperation`] if the lengths differ, an
    ///   edge is already present, a neighbor is repeated, or the remaining row
    ///   is not a renormalized distribution that the batch can complete.
    pub fn restore_edges(&mut self, u: NodeId, neighbors: &[NodeId], weights: &[f64]) -> Result<()> {
        self.require_node(u)?;
        if neighbors.len() != weights.len() {
            return Err(CounterfactualError::InvalidOperation(format!(
                "restore batch for node {u} has {} neighbors but {} weights",
                neighbors.len(),
                weights.len()
            )));
        }
        let mut seen = BTreeSet::new();
        for (&n, &w) in neighbors.iter().zip(weights) {
            check_weight(u, n, w)?;
            if !seen.insert(n) {
                return Err(CounterfactualError::InvalidOperation(format!(
                    "neighbor {n} repeated in restore batch for node {u}"
                )));
            }
            if self.has_edge(u, n) {
                return Err(CounterfactualError::InvalidOperation(format!(
                    "edge ({u}, {n}) is already present"
                )));
            }
        }

        let restored: f64 = weights.iter().sum();
        if self.out_degree(u) > 0 {
            let remaining = self.out_weight_sum(u);
            if (remaining - 1.0).abs() > WEIGHT_TOLERANCE || restored >= 1.0 - WEIGHT_TOLERANCE {
                return Err(CounterfactualError::InvalidOperation(format!(
                    "restore batch for node {u} (sum = {restored}) does not match the \
                     remaining row (sum = {remaining})"
                )));
            }
            self.scale_row(u, 1.0 - restored);
        }

        for (&n, &w) in neighbors.iter().zip(weights) {
            self.add_node(n);
            self.link(u, n, w);
        }
        Ok(())
    }

    /// Insert a single edge `(u, v)` with weight `weight`, scaling the
    /// existing row by `(1 - weight)` so it stays stochastic.
    ///
    /// # Errors
    ///
    /// Same as [`restore_edges`](Self::restore_edges).
    pub fn insert_edge(&mut self, u: NodeId, v: NodeId, weight: f64) -> Result<()> {
        self.restore_edges(u, &[v], &[weight])
    }

    /// Remove `u`'s entire outgoing row without renormalization, leaving `u`
    /// dangling. Returns the removed edges; restore them with
    /// [`restore_edges`](Self::restore_edges).
    ///
    /// # Errors
    ///
    /// [`ValidationError::UnknownNode`] if `u` is not in the graph.
    pub fn detach_row(&mut self, u: NodeId) -> Result<RemovedEdges> {
        self.require_node(u)?;
        let row: Vec<(NodeId, f64)> = self.outgoing(u).collect();
        for &(n, _) in &row {
            self.unlink(u, n);
        }
        let (neighbors, weights) = row.into_iter().unzip();
        Ok(RemovedEdges {
            node: u,
            neighbors,
            weights,
        })
    }

    /// Start a scoped removal of `neighbors` from `u`'s row.
    ///
    /// The returned guard restores the edges when dropped unless
    /// [`EdgeRemoval::commit`] is called.
    ///
    /// # Errors
    ///
    /// Same as [`remove_edges`](Self::remove_edges).
    pub fn begin_removal(&mut self, u: NodeId, neighbors: &[NodeId]) -> Result<EdgeRemoval<'_>> {
        let weights = self.remove_edges(u, neighbors)?;
        let removed = RemovedEdges {
            node: u,
            neighbors: neighbors.to_vec(),
            weights,
        };
        Ok(EdgeRemoval::new(self, removed))
    }

    /// Start a scoped detachment of `u`'s whole row (see
    /// [`detach_row`](Self::detach_row)).
    ///
    /// # Errors
    ///
    /// [`ValidationError::UnknownNode`] if `u` is not in the graph.
    pub fn begin_detach(&mut self, u: NodeId) -> Result<EdgeRemoval<'_>> {
        let removed = self.detach_row(u)?;
        Ok(EdgeRemoval::new(self, removed))
    }

    /// Weights of `(u, n)` for each `n`, rejecting missing or repeated edges.
    pub(crate) fn batch_weights(&self, u: NodeId, neighbors: &[NodeId]) -> Result<Vec<f64>> {
        let mut seen = BTreeSet::new();
        neighbors
            .iter()
            .map(|&n| {
                if !seen.insert(n) {
                    return Err(CounterfactualError::InvalidOperation(format!(
                        "neighbor {n} repeated in batch for node {u}"
                    )));
                }
                self.weight(u, n).ok_or_else(|| {
                    CounterfactualError::InvalidOperation(format!("edge ({u}, {n}) does not exist"))
                })
            })
            .collect()
    }
}

fn check_weight(u: NodeId, v: NodeId, weight: f64) -> std::result::Result<(), ValidationError> {
    if weight.is_finite() && weight > 0.0 && weight <= 1.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidWeight {
            source_node: u,
            target_node: v,
            weight,
        })
    }
}

// ---------------------------------------------------------------------------
// Removal record and transaction
// ---------------------------------------------------------------------------

/// Edges taken out of a node's row, in removal order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemovedEdges {
    /// Node whose row was edited.
    pub node: NodeId,
    /// Removed destinations.
    pub neighbors: Vec<NodeId>,
    /// Original weights, aligned with `neighbors`.
    pub weights: Vec<f64>,
}

impl RemovedEdges {
    /// Total removed weight.
    pub fn total_weight(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Put the edges back into `graph`.
    ///
    /// # Errors
    ///
    /// See [`WeightedGraph::restore_edges`].
    pub fn restore(&self, graph: &mut WeightedGraph) -> Result<()> {
        graph.restore_edges(self.node, &self.neighbors, &self.weights)
    }
}

/// Scoped edit of one node's outgoing row.
///
/// Holds the exclusive borrow of the graph, so removals are strictly nested.
/// Dropping the guard restores the row; [`commit`](Self::commit) keeps the
/// edit instead and [`restore`](Self::restore) surfaces restore errors.
#[derive(Debug)]
pub struct EdgeRemoval<'g> {
    graph: &'g mut WeightedGraph,
    removed: RemovedEdges,
    armed: bool,
}

impl<'g> EdgeRemoval<'g> {
    fn new(graph: &'g mut WeightedGraph, removed: RemovedEdges) -> Self {
        Self {
            graph,
            removed,
            armed: true,
        }
    }

    /// The edited graph.
    pub fn graph(&self) -> &WeightedGraph {
        self.graph
    }

    /// The removed edges.
    pub fn removed(&self) -> &RemovedEdges {
        &self.removed
    }

    /// Keep the edit permanently and return what was removed.
    pub fn commit(mut self) -> RemovedEdges {
        self.armed = false;
        std::mem::take(&mut self.removed)
    }

    /// Restore the row now, reporting failures to the caller.
    ///
    /// # Errors
    ///
    /// See [`WeightedGraph::restore_edges`].
    pub fn restore(mut self) -> Result<()> {
        self.armed = false;
        self.removed.restore(&mut *self.graph)
    }
}

impl Drop for EdgeRemoval<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = self.removed.restore(&mut *self.graph) {
            warn!(
                target: "ruvector_counterfactual::graph",
                node = self.removed.node,
                error = %err,
                "failed to restore edges on drop",
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
