//! Incremental reverse-push Personalized PageRank with counterfactual edge
//! explanations.
//!
//! Computes `ppr(u, t)`, the probability that a random walk from `u` with
//! restart probability `alpha` terminates at target `t`, for every `u` at
//! once by pushing residual mass backward from `t`. Converged states are kept
//! up to date under batch edge deletions and insertions without restarting,
//! which makes it cheap to answer "which of this node's edges, if removed,
//! would change its top-ranked target?".
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`graph`] | Row-stochastic weighted graph, batch removal/restore, scoped edits |
//! | [`reverse_push`] | Cold and warm reverse local push |
//! | [`incremental`] | Closed-form residual corrections for batch edits |
//! | [`explanation`] | Greedy single-item and item-centric explanation search |
//! | [`engine`] | Query façade and reusable explanation sessions |
//! | `verification` | Exhaustive subset search (feature `verification`) |
//!
//! # Example
//!
//! ```rust
//! use ruvector_counterfactual::{CounterfactualEngine, PushConfig, WeightedGraph};
//!
//! let graph = WeightedGraph::from_edges(vec![
//!     (0, 0, 0.5), (0, 1, 0.5),
//!     (1, 1, 0.5), (1, 2, 0.5),
//!     (2, 2, 0.5), (2, 3, 0.5),
//!     (3, 3, 0.5), (3, 0, 0.5),
//! ]).unwrap();
//! let engine = CounterfactualEngine::new(graph, PushConfig::default()).unwrap();
//!
//! let state = engine.compute_ppr(0).unwrap();
//! assert!(state.score(3) > state.score(2));
//! assert!(state.score(2) > state.score(1));
//! ```

pub mod engine;
pub mod error;
pub mod explanation;
pub mod graph;
pub mod incremental;
pub mod reverse_push;
pub mod types;

#[cfg(any(test, feature = "verification"))]
pub mod verification;

pub use engine::{CounterfactualEngine, ExplanationSession};
pub use error::{CounterfactualError, Result, ValidationError};
pub use explanation::{Explanation, ItemSearchOutcome};
pub use graph::{EdgeRemoval, RemovedEdges, WeightedGraph};
pub use reverse_push::ReversePushSolver;
pub use types::{NodeId, PprState, PprStore, PushConfig, ScoreMap};
