//! Query façade tying the graph, the push solver, the incremental maintainer
//! and the explanation search together.

use tracing::debug;

use crate::error::{Result, ValidationError};
use crate::explanation::{Explanation, ExplanationSearch, ItemSearchOutcome};
use crate::graph::WeightedGraph;
use crate::incremental::IncrementalMaintainer;
use crate::reverse_push::ReversePushSolver;
use crate::types::{NodeId, PprState, PprStore, PushConfig};

/// Row-sum tolerance accepted for caller-supplied graphs.
const ROW_TOLERANCE: f64 = 1e-6;

/// Owns the graph and answers PPR and explanation queries against it.
///
/// Queries that need an edited graph (excluding a node's actions, what-if
/// removals) edit it through [`EdgeRemoval`](crate::graph::EdgeRemoval) and
/// leave it exactly as they found it.
///
/// # Example
///
/// ```rust
/// use ruvector_counterfactual::engine::CounterfactualEngine;
/// use ruvector_counterfactual::graph::WeightedGraph;
/// use ruvector_counterfactual::types::PushConfig;
///
/// // User 0 interacted with 1 and 2; 1 leads to item 3, 2 leads to item 4.
/// let graph = WeightedGraph::from_edges(vec![
///     (0, 0, 0.2), (0, 1, 0.5), (0, 2, 0.3),
///     (1, 1, 0.5), (1, 3, 0.5),
///     (2, 2, 0.5), (2, 4, 0.5),
///     (3, 3, 1.0), (4, 4, 1.0),
/// ]).unwrap();
/// let mut engine = CounterfactualEngine::new(graph, PushConfig::new(0.15, 1e-8)).unwrap();
///
/// let explanation = engine.find_explanation(0, 3, &[4]).unwrap().unwrap();
/// assert_eq!(explanation.edges().collect::<Vec<_>>(), vec![(0, 1)]);
/// assert_eq!(explanation.replacing_item, 4);
/// ```
#[derive(Debug, Clone)]
pub struct CounterfactualEngine {
    graph: WeightedGraph,
    maintainer: IncrementalMaintainer,
}

impl CounterfactualEngine {
    /// Create an engine over `graph`.
    ///
    /// # Errors
    ///
    /// [`CounterfactualError::InvalidParameter`](crate::error::CounterfactualError::InvalidParameter)
    /// if `config` is out of range or a non-empty row of `graph` does not sum
    /// to 1.
    pub fn new(graph: WeightedGraph, config: PushConfig) -> Result<Self> {
        config.validate()?;
        graph.validate_stochastic(ROW_TOLERANCE)?;
        Ok(Self {
            graph,
            maintainer: IncrementalMaintainer::new(ReversePushSolver::new(config)),
        })
    }

    /// The underlying graph.
    pub fn graph(&self) -> &WeightedGraph {
        &self.graph
    }

    /// Mutable access for permanent edits between queries.
    pub fn graph_mut(&mut self) -> &mut WeightedGraph {
        &mut self.graph
    }

    /// Consume the engine and return the graph.
    pub fn into_graph(self) -> WeightedGraph {
        self.graph
    }

    /// Push parameters.
    pub fn config(&self) -> &PushConfig {
        self.maintainer.solver().config()
    }

    /// Cold-start PPR state for `target` on the current graph.
    ///
    /// # Errors
    ///
    /// See [`ReversePushSolver::push`].
    pub fn compute_ppr(&self, target: NodeId) -> Result<PprState> {
        self.maintainer.solver().ppr_to_target(&self.graph, target)
    }

    /// Cold-start states for every target in `targets`.
    ///
    /// # Errors
    ///
    /// See [`ReversePushSolver::push`].
    pub fn compute_ppr_many(&self, targets: &[NodeId]) -> Result<PprStore> {
        self.maintainer.solver().ppr_to_targets(&self.graph, targets)
    }

    /// States for `targets` on the graph with every outgoing edge of `source`
    /// removed except its self-loop.
    ///
    /// If `source` has a self-loop, the base states are updated incrementally;
    /// otherwise `source` is detached and the states are recomputed cold. The
    /// graph is restored before returning.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::UnknownNode`] if `source` is not in the graph.
    /// - See [`ReversePushSolver::push`].
    pub fn compute_ppr_excluding_self_loop(
        &mut self,
        source: NodeId,
        targets: &[NodeId],
    ) -> Result<PprStore> {
        let base = self.compute_ppr_many(targets)?;
        self.exclude_actions(source, base)
    }

    /// Same as
    /// [`compute_ppr_excluding_self_loop`](Self::compute_ppr_excluding_self_loop)
    /// but starting from already-converged states in `base`.
    ///
    /// # Errors
    ///
    /// - [`CounterfactualError::NotFound`](crate::error::CounterfactualError::NotFound)
    ///   if `base` lacks one of `targets`.
    /// - See [`compute_ppr_excluding_self_loop`](Self::compute_ppr_excluding_self_loop).
    pub fn compute_ppr_excluding_self_loop_from(
        &mut self,
        source: NodeId,
        targets: &[NodeId],
        base: &PprStore,
    ) -> Result<PprStore> {
        let states = base.subset(targets)?;
        self.exclude_actions(source, states)
    }

    fn exclude_actions(&mut self, source: NodeId, mut states: PprStore) -> Result<PprStore> {
        self.require_node(source)?;
        let actions = self.graph.actions(source);
        if actions.is_empty() {
            return Ok(states);
        }
        debug!(
            target: "ruvector_counterfactual::engine",
            source_node = source,
            actions = actions.len(),
            self_loop = self.graph.has_edge(source, source),
            targets = states.len(),
            "excluding all actions of source",
        );
        let tx = self
            .maintainer
            .delete_edges(&mut self.graph, source, &actions, &mut states)?;
        tx.restore()?;
        Ok(states)
    }

    /// States of `base` updated for the graph with `(source, n)` removed for
    /// every `n` in `neighbors`. `base` itself is not modified and the graph is
    /// restored before returning.
    ///
    /// # Errors
    ///
    /// - [`CounterfactualError::InvalidOperation`](crate::error::CounterfactualError::InvalidOperation)
    ///   for missing or repeated edges.
    /// - See [`ReversePushSolver::push`].
    pub fn what_if_removal(
        &mut self,
        source: NodeId,
        neighbors: &[NodeId],
        base: &PprStore,
    ) -> Result<PprStore> {
        self.require_node(source)?;
        let mut states = base.clone();
        if neighbors.is_empty() {
            return Ok(states);
        }
        let tx = self
            .maintainer
            .delete_edges(&mut self.graph, source, neighbors, &mut states)?;
        tx.restore()?;
        Ok(states)
    }

    /// Compute the excluding-self-loop baseline for `source` and `targets`
    /// once, for repeated explanation queries.
    ///
    /// # Errors
    ///
    /// See [`compute_ppr_excluding_self_loop`](Self::compute_ppr_excluding_self_loop).
    pub fn session(&mut self, source: NodeId, targets: &[NodeId]) -> Result<ExplanationSession> {
        let baseline = self.compute_ppr_excluding_self_loop(source, targets)?;
        Ok(ExplanationSession {
            source,
            epsilon: self.config().epsilon,
            baseline,
        })
    }

    /// Smallest set of `source`'s edges whose removal lets one of
    /// `candidates` overtake `top`, or `None` if the search finds none.
    ///
    /// # Errors
    ///
    /// See [`session`](Self::session).
    pub fn find_explanation(
        &mut self,
        source: NodeId,
        top: NodeId,
        candidates: &[NodeId],
    ) -> Result<Option<Explanation>> {
        let mut targets = Vec::with_capacity(candidates.len() + 1);
        targets.push(top);
        targets.extend(candidates.iter().copied().filter(|&c| c != top));
        let session = self.session(source, &targets)?;
        session.find(&self.graph, top, candidates)
    }

    fn require_node(&self, node: NodeId) -> Result<()> {
        if self.graph.contains_node(node) {
            Ok(())
        } else {
            Err(ValidationError::UnknownNode(node).into())
        }
    }
}

// ---------------------------------------------------------------------------
// ExplanationSession
// ---------------------------------------------------------------------------

/// Excluding-self-loop baseline for one source, reusable across queries as
/// long as the graph is not edited permanently.
#[derive(Debug, Clone)]
pub struct ExplanationSession {
    source: NodeId,
    epsilon: f64,
    baseline: PprStore,
}

impl ExplanationSession {
    /// The explained source node.
    pub fn source(&self) -> NodeId {
        self.source
    }

    /// Baseline states, one per target.
    pub fn baseline(&self) -> &PprStore {
        &self.baseline
    }

    /// Greedy search over this session's baseline.
    pub fn search<'a>(&'a self, graph: &'a WeightedGraph) -> ExplanationSearch<'a> {
        ExplanationSearch::new(graph, self.source, &self.baseline, self.epsilon)
    }

    /// Single top-versus-candidate search.
    ///
    /// # Errors
    ///
    /// See [`ExplanationSearch::single_item_search`].
    pub fn single_item(
        &self,
        graph: &WeightedGraph,
        top: NodeId,
        candidate: NodeId,
        best_known: Option<usize>,
    ) -> Result<ItemSearchOutcome> {
        self.search(graph).single_item_search(top, candidate, best_known)
    }

    /// Item-centric search over `candidates`.
    ///
    /// # Errors
    ///
    /// See [`ExplanationSearch::item_centric_search`].
    pub fn find(
        &self,
        graph: &WeightedGraph,
        top: NodeId,
        candidates: &[NodeId],
    ) -> Result<Option<Explanation>> {
        let explanation = self.search(graph).item_centric_search(top, candidates)?;
        debug!(
            target: "ruvector_counterfactual::engine",
            source_node = self.source,
            top,
            found = explanation.is_some(),
            size = explanation.as_ref().map_or(0, Explanation::size),
            "explanation search finished",
        );
        Ok(explanation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CounterfactualError;

    const EPS: f64 = 1e-9;

    /// Source 0 favors item 3 through neighbor 1 and item 4 through neighbor 2.
    fn two_item_graph(self_loop: bool) -> WeightedGraph {
        let mut edges = vec![
            (1, 1, 0.5),
            (1, 3, 0.5),
            (2, 2, 0.5),
            (2, 4, 0.5),
            (3, 3, 1.0),
            (4, 4, 1.0),
        ];
        if self_loop {
            edges.extend([(0, 0, 0.2), (0, 1, 0.5), (0, 2, 0.3)]);
        } else {
            edges.extend([(0, 1, 0.6), (0, 2, 0.4)]);
        }
        WeightedGraph::from_edges(edges).unwrap()
    }

    fn engine(graph: WeightedGraph) -> CounterfactualEngine {
        CounterfactualEngine::new(graph, PushConfig::new(0.15, EPS)).unwrap()
    }

    #[test]
    fn rejects_non_stochastic_graph() {
        let graph = WeightedGraph::from_edges(vec![(0, 1, 0.5)]).unwrap();
        assert!(matches!(
            CounterfactualEngine::new(graph, PushConfig::default()),
            Err(CounterfactualError::InvalidParameter(ValidationError::NotStochastic { node: 0, .. }))
        ));
    }

    #[test]
    fn excluding_self_loop_leaves_graph_unchanged() {
        for self_loop in [true, false] {
            let graph = two_item_graph(self_loop);
            let mut e = engine(graph.clone());
            let store = e.compute_ppr_excluding_self_loop(0, &[3, 4]).unwrap();
            for node in graph.nodes() {
                for (v, w) in graph.outgoing(node) {
                    let after = e.graph().weight(node, v).unwrap();
                    assert!((after - w).abs() < 1e-12);
                }
            }
            // Without its actions the source reaches neither item.
            assert!(store.score(3, 0).unwrap().abs() <= EPS);
            assert!(store.score(4, 0).unwrap().abs() <= EPS);
        }
    }

    #[test]
    fn excluded_baseline_matches_cold_on_edited_graph() {
        let mut e = engine(two_item_graph(true));
        let store = e.compute_ppr_excluding_self_loop(0, &[3]).unwrap();

        let mut edited = two_item_graph(true);
        edited.remove_edges(0, &[1, 2]).unwrap();
        let cold = ReversePushSolver::new(PushConfig::new(0.15, EPS))
            .ppr_to_target(&edited, 3)
            .unwrap();
        for node in edited.nodes() {
            let diff = (store.score(3, node).unwrap() - cold.score(node)).abs();
            assert!(diff <= 2.0 * EPS, "node {node}");
        }
    }

    #[test]
    fn what_if_removal_keeps_base() {
        let mut e = engine(two_item_graph(true));
        let base = e.compute_ppr_many(&[3, 4]).unwrap();
        let after = e.what_if_removal(0, &[1], &base).unwrap();
        assert!(after.score(3, 0).unwrap() < base.score(3, 0).unwrap());
        assert!(after.score(4, 0).unwrap() > base.score(4, 0).unwrap());
        assert!(after.score(4, 0).unwrap() > after.score(3, 0).unwrap());
        assert_eq!(e.graph().weight(0, 1), Some(0.5));
    }

    #[test]
    fn finds_size_one_explanation() {
        for self_loop in [true, false] {
            let mut e = engine(two_item_graph(self_loop));
            let explanation = e.find_explanation(0, 3, &[3, 4]).unwrap().unwrap();
            assert_eq!(explanation.source, 0);
            assert_eq!(explanation.removed, vec![1]);
            assert_eq!(explanation.replacing_item, 4);
            assert!(explanation.margin > 0.0);
        }
    }

    #[test]
    fn session_reuses_baseline() {
        let mut e = engine(two_item_graph(true));
        let session = e.session(0, &[3, 4]).unwrap();
        assert_eq!(session.source(), 0);
        assert_eq!(session.baseline().len(), 2);
        let outcome = session.single_item(e.graph(), 3, 4, None).unwrap();
        assert!(outcome.replaced);
        assert_eq!(outcome.removed, vec![1]);
        assert!(session.find(e.graph(), 4, &[3]).unwrap().is_some());
    }

    #[test]
    fn unknown_source_is_rejected() {
        let mut e = engine(two_item_graph(true));
        assert!(matches!(
            e.find_explanation(9, 3, &[4]),
            Err(CounterfactualError::InvalidParameter(ValidationError::UnknownNode(9)))
        ));
    }
}
