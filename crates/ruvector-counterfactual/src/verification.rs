//! Exhaustive reference search used to cross-check the greedy explanation
//! search on small graphs.
//!
//! Every subset of the source's actions of size `1..len` is removed in turn
//! (largest subsets are excluded so that at least one action remains), the
//! affected states are brought up to date incrementally, and the subset is
//! recorded when the challenger beats the top item by more than `2 * epsilon`.
//! Cost is exponential in the number of actions.

use crate::engine::CounterfactualEngine;
use crate::error::Result;
use crate::types::NodeId;

/// All minimal-size edge sets for one top/challenger pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ExhaustiveResult {
    /// Size shared by every set in `explanations`.
    pub size: usize,
    /// Removed neighbor sets, each in ascending order.
    pub explanations: Vec<Vec<NodeId>>,
}

impl ExhaustiveResult {
    /// `true` if `removed` (in any order) is one of the minimal sets.
    pub fn contains(&self, removed: &[NodeId]) -> bool {
        let mut sorted = removed.to_vec();
        sorted.sort_unstable();
        self.explanations.iter().any(|set| *set == sorted)
    }
}

/// Every way of choosing `k` indices out of `0..n`, in lexicographic order.
fn combinations(n: usize, k: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    if k == 0 || k > n {
        return out;
    }
    let mut idx: Vec<usize> = (0..k).collect();
    loop {
        out.push(idx.clone());
        // Rightmost index that can still move.
        let Some(pos) = (0..k).rev().find(|&i| idx[i] < n - k + i) else {
            return out;
        };
        idx[pos] += 1;
        for i in pos + 1..k {
            idx[i] = idx[i - 1] + 1;
        }
    }
}

/// Smallest subsets of `source`'s actions whose removal makes `challenger`
/// score more than `2 * epsilon` above `top` for `source`, or `None` if no
/// subset leaving at least one action does.
///
/// # Errors
///
/// Any error from [`CounterfactualEngine::what_if_removal`].
pub fn exhaustive_minimal_explanations(
    engine: &mut CounterfactualEngine,
    source: NodeId,
    top: NodeId,
    challenger: NodeId,
) -> Result<Option<ExhaustiveResult>> {
    let margin = 2.0 * engine.config().epsilon;
    let base = engine.compute_ppr_many(&[top, challenger])?;
    let actions = engine.graph().actions(source);

    for size in 1..actions.len() {
        let mut found = Vec::new();
        for combo in combinations(actions.len(), size) {
            let subset: Vec<NodeId> = combo.iter().map(|&i| actions[i]).collect();
            let after = engine.what_if_removal(source, &subset, &base)?;
            if after.score(top, source)? + margin < after.score(challenger, source)? {
                found.push(subset);
            }
        }
        if !found.is_empty() {
            return Ok(Some(ExhaustiveResult {
                size,
                explanations: found,
            }));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::WeightedGraph;
    use crate::types::PushConfig;

    #[test]
    fn combinations_are_lexicographic() {
        assert_eq!(
            combinations(4, 2),
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3],
            ]
        );
        assert_eq!(combinations(3, 3), vec![vec![0, 1, 2]]);
        assert!(combinations(2, 3).is_empty());
        assert!(combinations(2, 0).is_empty());
    }

    /// Source 0 with three actions; 1 and 3 lead to item 5, 2 leads to item 6.
    fn three_action_graph() -> WeightedGraph {
        WeightedGraph::from_edges(vec![
            (0, 0, 0.1),
            (0, 1, 0.3),
            (0, 2, 0.3),
            (0, 3, 0.3),
            (1, 1, 0.5),
            (1, 5, 0.5),
            (2, 2, 0.5),
            (2, 6, 0.5),
            (3, 3, 0.5),
            (3, 5, 0.5),
            (5, 5, 1.0),
            (6, 6, 1.0),
        ])
        .unwrap()
    }

    #[test]
    fn greedy_agrees_with_exhaustive_search() {
        let mut engine =
            CounterfactualEngine::new(three_action_graph(), PushConfig::new(0.15, 1e-9)).unwrap();

        let exhaustive = exhaustive_minimal_explanations(&mut engine, 0, 5, 6)
            .unwrap()
            .expect("removing both routes to 5 flips the ranking");
        assert_eq!(exhaustive.size, 2);
        assert_eq!(exhaustive.explanations, vec![vec![1, 3]]);

        let greedy = engine.find_explanation(0, 5, &[6]).unwrap().unwrap();
        assert_eq!(greedy.size(), exhaustive.size);
        assert!(exhaustive.contains(&greedy.removed));
    }

    #[test]
    fn single_action_source_has_no_explanation() {
        let graph = WeightedGraph::from_edges(vec![
            (0, 0, 0.5),
            (0, 1, 0.5),
            (1, 1, 0.5),
            (1, 2, 0.5),
            (2, 2, 1.0),
            (3, 3, 1.0),
        ])
        .unwrap();
        let mut engine = CounterfactualEngine::new(graph, PushConfig::new(0.15, 1e-9)).unwrap();
        assert_eq!(exhaustive_minimal_explanations(&mut engine, 0, 2, 3).unwrap(), None);
        assert_eq!(engine.find_explanation(0, 2, &[3]).unwrap(), None);
    }
}
