//! Reverse (backward) local push for target-centric Personalized PageRank.
//!
//! Computes approximate PPR contributions **to** a target vertex by
//! propagating residual mass backward along incoming edges of a weighted,
//! row-stochastic graph. Unlike a from-scratch solver, the push loop can be
//! resumed from any `(estimate, residual)` pair that satisfies the push
//! invariant, which is what makes incremental maintenance possible.
//!
//! # Algorithm
//!
//! Maintain two sparse maps:
//! - `estimate[v]`: accumulated PPR contribution from `v` to the target.
//! - `residual[v]`: unprocessed mass waiting at `v`.
//!
//! Cold start: `residual[target] = 1`, everything else is zero.
//!
//! While any vertex `v` has `|residual[v]| > epsilon`:
//!   1. `estimate[v] += alpha * residual[v]`.
//!   2. For each in-neighbour `u != v` (edge `u -> v`):
//!        `residual[u] += (1 - alpha) * residual[v] * W(u, v)`.
//!   3. `residual[v] = (1 - alpha) * W(v, v) * residual[v]`; mass that
//!      loops back through a self-loop stays as residual.
//!
//! Each push keeps, for every `u`,
//! `p[u] + alpha * r[u] = alpha * [u = t] + (1 - alpha) * sum_w W(u, w) * p[w]`.
//!
//! # Complexity
//!
//! O(1 / (alpha * epsilon)) pushes for a cold start. Each push visits the
//! in-neighbours of one vertex.

use std::collections::{HashSet, VecDeque};
use std::time::Instant;

use tracing::debug;

use crate::error::{CounterfactualError, Result, ValidationError};
use crate::graph::WeightedGraph;
use crate::types::{NodeId, PprState, PprStore, PushConfig, PushMode, PushStats};

// ---------------------------------------------------------------------------
// Solver struct
// ---------------------------------------------------------------------------

/// Reverse-push PPR solver.
///
/// # Example
///
/// ```rust
/// use ruvector_counterfactual::graph::WeightedGraph;
/// use ruvector_counterfactual::reverse_push::ReversePushSolver;
/// use ruvector_counterfactual::types::PushConfig;
///
/// let graph = WeightedGraph::from_edges(vec![
///     (0, 1, 1.0), (1, 2, 1.0), (2, 0, 1.0),
/// ]).unwrap();
/// let solver = ReversePushSolver::new(PushConfig::new(0.15, 1e-8));
/// let state = solver.ppr_to_target(&graph, 0).unwrap();
/// assert!(state.score(0) > state.score(1));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ReversePushSolver {
    config: PushConfig,
}

impl ReversePushSolver {
    /// Create a solver with the given parameters. Parameters are validated at
    /// the start of every push.
    pub fn new(config: PushConfig) -> Self {
        Self { config }
    }

    /// The solver's parameters.
    pub fn config(&self) -> &PushConfig {
        &self.config
    }

    /// Teleport probability.
    pub fn alpha(&self) -> f64 {
        self.config.alpha
    }

    /// Convergence threshold.
    pub fn epsilon(&self) -> f64 {
        self.config.epsilon
    }

    /// Cold-start PPR state for `target`.
    ///
    /// # Errors
    ///
    /// See [`push`](Self::push).
    pub fn ppr_to_target(&self, graph: &WeightedGraph, target: NodeId) -> Result<PprState> {
        let mut state = PprState::cold(target);
        self.push(graph, &mut state, PushMode::Cold)?;
        Ok(state)
    }

    /// Cold-start states for several targets.
    ///
    /// # Errors
    ///
    /// See [`push`](Self::push).
    pub fn ppr_to_targets(&self, graph: &WeightedGraph, targets: &[NodeId]) -> Result<PprStore> {
        let mut store = PprStore::new();
        for &target in targets {
            store.insert(self.ppr_to_target(graph, target)?);
        }
        Ok(store)
    }

    /// Run the push loop on `state` until every residual is within epsilon.
    ///
    /// [`PushMode::Cold`] resets the state first; [`PushMode::Warm`] resumes
    /// from the residuals as given, which may be negative after an
    /// incremental adjustment.
    ///
    /// # Errors
    ///
    /// - [`CounterfactualError::InvalidParameter`] if alpha/epsilon are out of
    ///   range or the target is not in the graph.
    /// - [`CounterfactualError::InvariantViolation`] if the push cap is hit.
    pub fn push(
        &self,
        graph: &WeightedGraph,
        state: &mut PprState,
        mode: PushMode,
    ) -> Result<PushStats> {
        self.config.validate()?;
        if !graph.contains_node(state.target) {
            return Err(ValidationError::UnknownNode(state.target).into());
        }
        if mode == PushMode::Cold {
            state.reset();
        }

        let start = Instant::now();
        let alpha = self.config.alpha;
        let epsilon = self.config.epsilon;
        let max_pushes = self.config.max_pushes;

        // FIFO work-list of vertices whose residual exceeds the threshold.
        let mut seeds: Vec<NodeId> = state.residual.nodes_above(epsilon).collect();
        seeds.sort_unstable();
        let mut queue: VecDeque<NodeId> = seeds.iter().copied().collect();
        let mut queued: HashSet<NodeId> = seeds.into_iter().collect();

        let mut pushes = 0usize;

        while let Some(v) = queue.pop_front() {
            queued.remove(&v);

            // Re-check: the residual may have changed since enqueue.
            let r_v = state.residual.get(v);
            if r_v.abs() <= epsilon {
                continue;
            }

            pushes += 1;
            if pushes > max_pushes {
                return Err(CounterfactualError::InvariantViolation {
                    pushes,
                    detail: format!(
                        "reverse push towards {} exceeded {} pushes; outgoing weights \
                         are likely not stochastic",
                        state.target, max_pushes,
                    ),
                });
            }

            // Absorb alpha fraction into the estimate.
            state.estimate.add(v, alpha * r_v);

            // Distribute (1 - alpha) * r_v backward along in-edges.
            let push_mass = (1.0 - alpha) * r_v;
            for (u, weight) in graph.incoming(v) {
                if u == v {
                    continue;
                }
                let r_u = state.residual.add(u, push_mass * weight);
                if r_u.abs() > epsilon && queued.insert(u) {
                    queue.push_back(u);
                }
            }

            let r_self = push_mass * graph.self_weight(v);
            state.residual.set(v, r_self);
            if r_self.abs() > epsilon && queued.insert(v) {
                queue.push_back(v);
            }
        }

        let stats = PushStats {
            pushes,
            max_residual: state.residual.max_abs(),
            elapsed: start.elapsed(),
        };

        debug!(
            target: "ruvector_counterfactual::reverse_push",
            pushes,
            target_node = state.target,
            warm = mode == PushMode::Warm,
            elapsed_us = stats.elapsed.as_micros() as u64,
            "reverse push converged",
        );

        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
