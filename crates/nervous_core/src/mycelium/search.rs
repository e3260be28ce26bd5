//! Weighted shortest path over a set of hyphae.
//!
//! Dijkstra keyed on `(cost, cumulative load)`, so equal-cost routes are
//! resolved in favour of the less loaded one.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::ids::{HyphaId, NeuronId};
use crate::mycelium::hypha::Hypha;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Score {
    pub cost: f64,
    pub load: u64,
}

impl Score {
    const ZERO: Score = Score { cost: 0.0, load: 0 };

    pub fn cmp(&self, other: &Score) -> Ordering {
        self.cost
            .total_cmp(&other.cost)
            .then(self.load.cmp(&other.load))
    }
}

#[derive(Debug)]
struct Frontier {
    node: usize,
    score: Score,
}

impl PartialEq for Frontier {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Frontier {}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap
        other
            .score
            .cmp(&self.score)
            .then(other.node.cmp(&self.node))
    }
}

/// Cheapest chain of hyphae leading `from -> to`, with its score.
///
/// `cost_of` prices a single hypha and must be non-negative. Returns `None`
/// when `to` is unreachable or `from == to`.
pub(crate) fn cheapest_path(
    hyphae: &[Hypha],
    from: &NeuronId,
    to: &NeuronId,
    cost_of: impl Fn(&Hypha) -> f64,
) -> Option<(Vec<HyphaId>, Score)> {
    if from == to {
        return None;
    }

    let mut index: HashMap<&NeuronId, usize> = HashMap::new();
    let mut outgoing: Vec<Vec<usize>> = Vec::new();
    for (h, hypha) in hyphae.iter().enumerate() {
        for node in [&hypha.from_id, &hypha.to_id] {
            if !index.contains_key(node) {
                index.insert(node, outgoing.len());
                outgoing.push(Vec::new());
            }
        }
        outgoing[index[&hypha.from_id]].push(h);
    }
    let start = *index.get(from)?;
    let goal = *index.get(to)?;

    let n = outgoing.len();
    let mut best: Vec<Option<Score>> = vec![None; n];
    let mut came_by: Vec<Option<usize>> = vec![None; n];
    let mut done = vec![false; n];
    let mut open = BinaryHeap::new();

    best[start] = Some(Score::ZERO);
    open.push(Frontier {
        node: start,
        score: Score::ZERO,
    });

    while let Some(Frontier { node, score }) = open.pop() {
        if done[node] {
            continue;
        }
        done[node] = true;
        if node == goal {
            break;
        }
        for &h in &outgoing[node] {
            let hypha = &hyphae[h];
            let next = index[&hypha.to_id];
            if done[next] {
                continue;
            }
            let candidate = Score {
                cost: score.cost + cost_of(hypha).max(0.0),
                load: score.load.saturating_add(hypha.load),
            };
            let improves = best[next].map_or(true, |b| candidate.cmp(&b) == Ordering::Less);
            if improves {
                best[next] = Some(candidate);
                came_by[next] = Some(h);
                open.push(Frontier {
                    node: next,
                    score: candidate,
                });
            }
        }
    }

    let score = best[goal]?;
    let mut path = Vec::new();
    let mut cursor = goal;
    while let Some(h) = came_by[cursor] {
        path.push(hyphae[h].id);
        cursor = index[&hyphae[h].from_id];
        if cursor == start {
            break;
        }
    }
    path.reverse();
    Some((path, score))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn hypha(id: u64, from: &str, to: &str, load: u64) -> Hypha {
        let mut h = Hypha::new(HyphaId(id), "m".into(), from.into(), to.into(), 100.0, Utc::now());
        h.load = load;
        h
    }

    #[test]
    fn test_prefers_cheaper_two_hop() {
        let hyphae = vec![hypha(1, "a", "c", 0), hypha(2, "a", "b", 0), hypha(3, "b", "c", 0)];
        let cost = |h: &Hypha| if h.id == HyphaId(1) { 5.0 } else { 1.0 };
        let (path, score) = cheapest_path(&hyphae, &"a".into(), &"c".into(), cost).unwrap();
        assert_eq!(path, vec![HyphaId(2), HyphaId(3)]);
        assert_eq!(score.cost, 2.0);
    }

    #[test]
    fn test_equal_cost_breaks_on_load() {
        let hyphae = vec![hypha(1, "a", "b", 4), hypha(2, "a", "b", 1)];
        let (path, score) = cheapest_path(&hyphae, &"a".into(), &"b".into(), |_| 1.0).unwrap();
        assert_eq!(path, vec![HyphaId(2)]);
        assert_eq!(score.load, 1);
    }

    #[test]
    fn test_unreachable() {
        let hyphae = vec![hypha(1, "b", "a", 0)];
        assert!(cheapest_path(&hyphae, &"a".into(), &"b".into(), |_| 1.0).is_none());
        assert!(cheapest_path(&hyphae, &"a".into(), &"a".into(), |_| 1.0).is_none());
    }
}
