//! Counterfactual explanation search.
//!
//! Given a source node `s`, the item currently ranked first for `s` and a set
//! of competing items, find the smallest set of `s`'s outgoing edges
//! ("actions") whose removal lets a competing item overtake the top item.
//!
//! Scores are read from a baseline computed with all of `s`'s actions
//! removed (only the self-loop, which stands for "no action", stays). In that
//! baseline the score of `s` for an item is a weighted sum of its neighbors'
//! scores, so removing an action changes the top/candidate difference by a
//! known per-neighbor contribution.
//!
//! # Caveat
//!
//! The single-item search removes neighbors greedily in ascending order of
//! contribution and never revisits that order. It is a fast heuristic: the
//! prefix it returns is not proven to be of minimal cardinality.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::graph::WeightedGraph;
use crate::types::{NodeId, PprState, PprStore};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// A minimal edge set found for a source node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    /// Node whose actions are explained.
    pub source: NodeId,
    /// Destinations of the removed edges `(source, n)`, in removal order.
    pub removed: Vec<NodeId>,
    /// Item that overtakes the top item once the edges are removed.
    pub replacing_item: NodeId,
    /// Final score difference (candidate minus top) left after removal.
    pub margin: f64,
}

impl Explanation {
    /// Number of removed edges.
    pub fn size(&self) -> usize {
        self.removed.len()
    }

    /// Removed edges as `(source, neighbor)` pairs.
    pub fn edges(&self) -> impl Iterator<Item = (NodeId, NodeId)> + '_ {
        self.removed.iter().map(move |&n| (self.source, n))
    }
}

/// Outcome of a single top-versus-candidate search.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSearchOutcome {
    /// Competing item that was tried.
    pub candidate: NodeId,
    /// `true` if the candidate overtakes the top item after removing
    /// `removed`.
    pub replaced: bool,
    /// Neighbors removed so far, in removal order.
    pub removed: Vec<NodeId>,
    /// Remaining weighted score difference (candidate minus top).
    pub sum_diff: f64,
    /// The candidate already beat the top item by more than `2 * epsilon`
    /// before any removal, so the top/candidate ordering is not trustworthy at
    /// this approximation level.
    pub ordering_untrusted: bool,
}

/// Weighted score difference one neighbor contributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    /// Destination of the edge `(source, neighbor)`.
    pub neighbor: NodeId,
    /// `(p_candidate[neighbor] - p_top[neighbor]) * W(source, neighbor)`.
    pub diff: f64,
    /// `W(source, neighbor)`.
    pub weight: f64,
}

/// Contributions of `source`'s neighbors (self-loop excluded), sorted
/// ascending by `diff`, ties broken by neighbor id.
///
/// The most negative entries favor the top item the most, so they are the
/// most valuable to remove.
pub fn ranked_contributions(
    graph: &WeightedGraph,
    source: NodeId,
    top: &PprState,
    candidate: &PprState,
) -> Vec<Contribution> {
    let mut ranked: Vec<Contribution> = graph
        .outgoing(source)
        .filter(|&(n, _)| n != source)
        .map(|(neighbor, weight)| Contribution {
            neighbor,
            diff: (candidate.score(neighbor) - top.score(neighbor)) * weight,
            weight,
        })
        .collect();
    ranked.sort_by(|a, b| {
        a.diff
            .partial_cmp(&b.diff)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.neighbor.cmp(&b.neighbor))
    });
    ranked
}

// ---------------------------------------------------------------------------
// ExplanationSearch
// ---------------------------------------------------------------------------

/// Greedy explanation search over a fixed baseline.
///
/// `baseline` must hold states computed with `source`'s actions removed (see
/// [`CounterfactualEngine::compute_ppr_excluding_self_loop`]) for the top
/// item and every candidate; `graph` is the unedited graph whose weights
/// describe `source`'s actions.
///
/// [`CounterfactualEngine::compute_ppr_excluding_self_loop`]: crate::engine::CounterfactualEngine::compute_ppr_excluding_self_loop
#[derive(Debug, Clone, Copy)]
pub struct ExplanationSearch<'a> {
    graph: &'a WeightedGraph,
    source: NodeId,
    baseline: &'a PprStore,
    epsilon: f64,
}

impl<'a> ExplanationSearch<'a> {
    /// Create a search for `source` reading scores from `baseline`.
    pub fn new(
        graph: &'a WeightedGraph,
        source: NodeId,
        baseline: &'a PprStore,
        epsilon: f64,
    ) -> Self {
        Self {
            graph,
            source,
            baseline,
            epsilon,
        }
    }

    /// Try to make `candidate` overtake `top` by removing at most
    /// `best_known` of `source`'s actions (unbounded for `None`).
    ///
    /// Neighbors are removed in ascending contribution order. At least one
    /// action is always kept. Success is declared once the remaining
    /// difference exceeds `2 * epsilon * remaining_weight`: each estimate is
    /// within `epsilon` of its true value, so a difference of two estimates
    /// is within `2 * epsilon`, scaled by the renormalization of the
    /// remaining weight.
    ///
    /// # Errors
    ///
    /// [`CounterfactualError::NotFound`](crate::error::CounterfactualError::NotFound)
    /// if the baseline lacks `top` or `candidate`.
    pub fn single_item_search(
        &self,
        top: NodeId,
        candidate: NodeId,
        best_known: Option<usize>,
    ) -> Result<ItemSearchOutcome> {
        let top_state = self.baseline.get(top)?;
        let candidate_state = self.baseline.get(candidate)?;
        let ranked = ranked_contributions(self.graph, self.source, top_state, candidate_state);

        let threshold = 2.0 * self.epsilon;
        let mut sum_diff: f64 = ranked.iter().map(|c| c.diff).sum();
        let mut sum_weight: f64 = ranked.iter().map(|c| c.weight).sum();

        let ordering_untrusted = sum_diff > threshold;
        if ordering_untrusted {
            warn!(
                target: "ruvector_counterfactual::explanation",
                source_node = self.source,
                top,
                candidate,
                sum_diff,
                epsilon = self.epsilon,
                "candidate already outranks the top item before any removal",
            );
        }

        let mut removed = Vec::new();
        let mut replaced = false;
        for step in ranked.iter().take(ranked.len().saturating_sub(1)) {
            if best_known.is_some_and(|bound| removed.len() + 1 > bound) {
                break;
            }
            sum_diff -= step.diff;
            sum_weight -= step.weight;
            removed.push(step.neighbor);
            trace!(
                target: "ruvector_counterfactual::explanation",
                candidate,
                neighbor = step.neighbor,
                sum_diff,
                sum_weight,
                "removed action",
            );
            if sum_diff > threshold * sum_weight {
                replaced = true;
                break;
            }
        }

        Ok(ItemSearchOutcome {
            candidate,
            replaced,
            removed,
            sum_diff,
            ordering_untrusted,
        })
    }

    /// Run [`single_item_search`](Self::single_item_search) for every item
    /// other than `top`, using the smallest explanation found so far as the
    /// pruning bound.
    ///
    /// Among the items replaced with the minimal number of removals, the one
    /// with the largest final difference wins (first in `items` on ties).
    /// Returns `Ok(None)` when no item can be made to overtake `top`.
    ///
    /// # Errors
    ///
    /// [`CounterfactualError::NotFound`](crate::error::CounterfactualError::NotFound)
    /// if the baseline lacks `top` or one of `items`.
    pub fn item_centric_search(&self, top: NodeId, items: &[NodeId]) -> Result<Option<Explanation>> {
        let mut best_size: Option<usize> = None;
        let mut outcomes = Vec::with_capacity(items.len());

        for &item in items {
            if item == top {
                continue;
            }
            let outcome = self.single_item_search(top, item, best_size)?;
            if outcome.replaced {
                let size = outcome.removed.len();
                best_size = Some(best_size.map_or(size, |best| best.min(size)));
            }
            outcomes.push(outcome);
        }

        let Some(size) = best_size else {
            debug!(
                target: "ruvector_counterfactual::explanation",
                source_node = self.source,
                top,
                candidates = outcomes.len(),
                "no candidate can replace the top item",
            );
            return Ok(None);
        };

        let winner = outcomes
            .into_iter()
            .filter(|o| o.replaced && o.removed.len() == size)
            .fold(None::<ItemSearchOutcome>, |best, o| match best {
                Some(b) if b.sum_diff >= o.sum_diff => Some(b),
                _ => Some(o),
            });

        Ok(winner.map(|o| Explanation {
            source: self.source,
            removed: o.removed,
            replacing_item: o.candidate,
            margin: o.sum_diff,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
