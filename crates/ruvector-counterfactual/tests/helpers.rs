//! Shared test helpers for the ruvector-counterfactual integration test suite.
//!
//! Provides a deterministic random graph generator, a dense power-iteration
//! reference for PPR, and the small fixture graphs used across test modules.

use ruvector_counterfactual::graph::WeightedGraph;
use ruvector_counterfactual::types::{NodeId, PprState};

// ---------------------------------------------------------------------------
// Seeded generator
// ---------------------------------------------------------------------------

/// Seeded 64-bit LCG so every generated graph is reproducible from its seed.
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    /// Uniform in `[0, 1)` from the top 53 bits.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn next_f64_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Uniform index in `0..n`; `n` must be non-zero.
    pub fn next_index(&mut self, n: usize) -> usize {
        (self.next_u64() >> 33) as usize % n
    }
}

// ---------------------------------------------------------------------------
// Graph generators
// ---------------------------------------------------------------------------

/// Random row-stochastic graph on nodes `0..n`.
///
/// Each node gets between 1 and `max_degree` distinct non-self neighbors and,
/// with probability `self_loop_prob`, a self-loop. Raw weights are drawn from
/// `[0.1, 1.0)` and normalized per row.
pub fn random_stochastic_graph(
    n: usize,
    max_degree: usize,
    self_loop_prob: f64,
    seed: u64,
) -> WeightedGraph {
    assert!(n >= 2, "need at least two nodes");
    let mut rng = Lcg::new(seed);
    let mut graph = WeightedGraph::new();
    for u in 0..n {
        graph.add_node(u);
    }

    for u in 0..n {
        let degree = 1 + rng.next_index(max_degree.min(n - 1));
        let mut neighbors: Vec<NodeId> = Vec::with_capacity(degree + 1);
        while neighbors.len() < degree {
            let v = rng.next_index(n);
            if v != u && !neighbors.contains(&v) {
                neighbors.push(v);
            }
        }
        if rng.next_f64() < self_loop_prob {
            neighbors.push(u);
        }

        let raw: Vec<f64> = neighbors.iter().map(|_| rng.next_f64_range(0.1, 1.0)).collect();
        let total: f64 = raw.iter().sum();
        for (&v, &w) in neighbors.iter().zip(&raw) {
            graph.add_edge(u, v, w / total).unwrap();
        }
    }
    graph
}

/// Ring `0 -> 1 -> ... -> n-1 -> 0` where every node keeps half its mass on
/// a self-loop.
pub fn ring_with_self_loops(n: usize) -> WeightedGraph {
    let mut edges = Vec::with_capacity(2 * n);
    for u in 0..n {
        edges.push((u, u, 0.5));
        edges.push((u, (u + 1) % n, 0.5));
    }
    WeightedGraph::from_edges(edges).unwrap()
}

/// Source 0 reaches item 3 through neighbor 1 and item 4 through neighbor 2,
/// with the edge to 1 heavier than the edge to 2.
pub fn two_route_graph() -> WeightedGraph {
    WeightedGraph::from_edges(vec![
        (0, 0, 0.2),
        (0, 1, 0.5),
        (0, 2, 0.3),
        (1, 1, 0.5),
        (1, 3, 0.5),
        (2, 2, 0.5),
        (2, 4, 0.5),
        (3, 3, 1.0),
        (4, 4, 1.0),
    ])
    .unwrap()
}

// ---------------------------------------------------------------------------
// Dense reference
// ---------------------------------------------------------------------------

/// `ppr(u, target)` for every node `u` in `0..n` by power iteration on
/// `x[u] = alpha * [u = target] + (1 - alpha) * sum_w W(u, w) * x[w]`.
///
/// The map is a `(1 - alpha)`-contraction, so 600 sweeps are exact to
/// machine precision for any `alpha >= 0.1`.
pub fn power_iteration_ppr(graph: &WeightedGraph, target: NodeId, alpha: f64) -> Vec<f64> {
    let n = graph.nodes().max().map_or(0, |m| m + 1);
    let mut x = vec![0.0f64; n];
    for _ in 0..600 {
        let mut next = vec![0.0f64; n];
        for u in 0..n {
            let spread: f64 = graph.outgoing(u).map(|(w, weight)| weight * x[w]).sum();
            next[u] = (1.0 - alpha) * spread + if u == target { alpha } else { 0.0 };
        }
        x = next;
    }
    x
}

/// Largest `|state.score(u) - reference[u]|` over all `u`.
pub fn max_error(state: &PprState, reference: &[f64]) -> f64 {
    reference
        .iter()
        .enumerate()
        .map(|(u, &r)| (state.score(u) - r).abs())
        .fold(0.0, f64::max)
}

/// Largest score difference between two states over the nodes of `graph`.
pub fn max_state_diff(a: &PprState, b: &PprState, graph: &WeightedGraph) -> f64 {
    graph
        .nodes()
        .map(|u| (a.score(u) - b.score(u)).abs())
        .fold(0.0, f64::max)
}
