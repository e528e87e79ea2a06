//! Integration tests for reverse push.
//!
//! Tests cover accuracy against a dense power-iteration reference on random
//! graphs, idempotence of warm pushes, and the self-looped ring scenario.

mod helpers;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use ruvector_counterfactual::reverse_push::ReversePushSolver;
use ruvector_counterfactual::types::{PprState, PushConfig, PushMode};

use helpers::{max_error, power_iteration_ppr, random_stochastic_graph, ring_with_self_loops};

// ---------------------------------------------------------------------------
// Accuracy
// ---------------------------------------------------------------------------

#[test]
fn converges_within_epsilon_on_random_graphs() {
    let epsilon = 1e-7;
    let solver = ReversePushSolver::new(PushConfig::new(0.15, epsilon));

    for seed in 1..=6u64 {
        let graph = random_stochastic_graph(15, 4, 0.5, seed);
        for target in [0, 7, 14] {
            let state = solver.ppr_to_target(&graph, target).unwrap();
            let reference = power_iteration_ppr(&graph, target, 0.15);
            let err = max_error(&state, &reference);
            assert!(
                err <= epsilon + 1e-12,
                "seed {seed}, target {target}: max error {err:.3e}"
            );
            assert!(state.is_converged(epsilon));
        }
    }
}

#[test]
fn larger_alpha_converges_with_fewer_pushes() {
    let graph = random_stochastic_graph(20, 5, 0.3, 42);
    let slow = ReversePushSolver::new(PushConfig::new(0.1, 1e-8));
    let fast = ReversePushSolver::new(PushConfig::new(0.5, 1e-8));

    let mut s = PprState::cold(3);
    let slow_stats = slow.push(&graph, &mut s, PushMode::Cold).unwrap();
    let mut f = PprState::cold(3);
    let fast_stats = fast.push(&graph, &mut f, PushMode::Cold).unwrap();

    assert!(fast_stats.pushes < slow_stats.pushes);
    assert!(slow_stats.max_residual <= 1e-8);
}

#[test]
fn estimates_are_bounded_probabilities() {
    let solver = ReversePushSolver::new(PushConfig::new(0.2, 1e-9));
    let graph = random_stochastic_graph(12, 3, 0.5, 9);
    let state = solver.ppr_to_target(&graph, 5).unwrap();
    for u in graph.nodes() {
        let p = state.score(u);
        assert!(p >= -1e-9 && p <= 1.0 + 1e-9, "node {u}: {p}");
    }
    // The target keeps at least its own restart mass.
    assert!(state.score(5) >= 0.2 - 1e-9);
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[test]
fn warm_push_after_convergence_changes_nothing() {
    let solver = ReversePushSolver::new(PushConfig::new(0.15, 1e-6));
    for seed in [3u64, 11, 29] {
        let graph = random_stochastic_graph(10, 3, 0.5, seed);
        let mut state = solver.ppr_to_target(&graph, 2).unwrap();
        let before = state.clone();
        let stats = solver.push(&graph, &mut state, PushMode::Warm).unwrap();
        assert_eq!(stats.pushes, 0);
        assert_eq!(state, before);
    }
}

#[test]
fn cold_push_is_deterministic() {
    let solver = ReversePushSolver::new(PushConfig::new(0.15, 1e-6));
    let graph = random_stochastic_graph(10, 3, 0.5, 5);
    let a = solver.ppr_to_target(&graph, 4).unwrap();
    let mut b = a.clone();
    solver.push(&graph, &mut b, PushMode::Cold).unwrap();
    assert_eq!(a, b);
}

// ---------------------------------------------------------------------------
// Ring scenario
// ---------------------------------------------------------------------------

/// Ring 0 -> 1 -> 2 -> 3 -> 0, every node splitting 0.5/0.5 between its
/// self-loop and its successor.
#[test]
fn self_looped_ring_scores() {
    let alpha = 0.15;
    let solver = ReversePushSolver::new(PushConfig::new(alpha, 1e-6));
    let graph = ring_with_self_loops(4);
    let state = solver.ppr_to_target(&graph, 0).unwrap();

    // Closed form: each step back along the ring scales by c / (1 - c) with
    // c = (1 - alpha) / 2, and p[0] * (1 - c) = alpha + c * p[1].
    let c = (1.0 - alpha) / 2.0;
    let ratio = c / (1.0 - c);
    let expected_0 = alpha / (1.0 - c - c * ratio.powi(3));
    assert_abs_diff_eq!(state.score(0), expected_0, epsilon = 1e-6);
    assert_abs_diff_eq!(state.score(3), expected_0 * ratio, epsilon = 1e-6);

    // The target dominates every other node.
    for u in 1..4 {
        assert!(state.score(0) > state.score(u));
    }
    // Contribution to 0 shrinks with the number of hops needed to reach it.
    assert!(state.score(3) > state.score(2));
    assert!(state.score(2) > state.score(1));

    // From 0's side, reachability decays in ring order 1, 2, 3.
    let from_zero: Vec<f64> = (1..4)
        .map(|t| solver.ppr_to_target(&graph, t).unwrap().score(0))
        .collect();
    assert!(from_zero[0] > from_zero[1]);
    assert!(from_zero[1] > from_zero[2]);
}

#[test]
fn ring_matches_power_iteration() {
    let solver = ReversePushSolver::new(PushConfig::new(0.15, 1e-10));
    let graph = ring_with_self_loops(6);
    for target in 0..6 {
        let state = solver.ppr_to_target(&graph, target).unwrap();
        let reference = power_iteration_ppr(&graph, target, 0.15);
        for u in 0..6 {
            assert_relative_eq!(state.score(u), reference[u], epsilon = 1e-9);
        }
    }
}
