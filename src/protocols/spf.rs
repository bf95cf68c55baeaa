use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use crate::model::routing::{PathInfo, RoutingTable};

/// Node -> neighbor -> edge weight. Edges with non-finite or negative
/// weights are never traversed.
pub type Graph = BTreeMap<String, BTreeMap<String, f64>>;

const EPS: f64 = 1e-9;

fn edge_cost_supported(edge_cost: f64) -> bool {
    edge_cost.is_finite() && edge_cost >= 0.0
}

#[derive(Debug, Clone, PartialEq)]
struct QueueEntry {
    node: String,
    cost: f64,
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap frontier over (node, accumulated cost) with lazy deletion:
/// stale entries are skipped at pop time.
#[derive(Debug, Default)]
pub struct DistanceFrontier {
    heap: BinaryHeap<QueueEntry>,
}

impl DistanceFrontier {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, node: &str, cost: f64) {
        self.heap.push(QueueEntry {
            node: node.to_string(),
            cost,
        });
    }

    pub fn pop_min<F>(&mut self, mut is_stale: F) -> Option<(String, f64)>
    where
        F: FnMut(&str, f64) -> bool,
    {
        while let Some(entry) = self.heap.pop() {
            if is_stale(&entry.node, entry.cost) {
                continue;
            }
            return Some((entry.node, entry.cost));
        }
        None
    }
}

/// Dijkstra from `origin`, producing per-destination first hop and total
/// cost. Ties on total cost resolve toward the lexicographically lower
/// first hop, so the result is deterministic for any input order.
pub fn compute_spf(graph: &Graph, origin: &str) -> RoutingTable {
    let mut dist: BTreeMap<String, f64> = BTreeMap::new();
    let mut first_hop: BTreeMap<String, String> = BTreeMap::new();
    let mut settled: BTreeSet<String> = BTreeSet::new();
    let mut frontier = DistanceFrontier::new();

    dist.insert(origin.to_string(), 0.0);
    frontier.push(origin, 0.0);

    loop {
        let Some((node, cost_u)) = frontier.pop_min(|candidate, cost| {
            if settled.contains(candidate) {
                return true;
            }
            match dist.get(candidate).copied() {
                Some(best) => cost > best + EPS,
                None => true,
            }
        }) else {
            break;
        };
        settled.insert(node.clone());

        let Some(neighbors) = graph.get(&node) else {
            continue;
        };
        for (neighbor, edge_cost) in neighbors {
            if !edge_cost_supported(*edge_cost) {
                continue;
            }

            let candidate_metric = cost_u + *edge_cost;
            let candidate_hop = if node == origin {
                neighbor.clone()
            } else {
                match first_hop.get(&node) {
                    Some(hop) => hop.clone(),
                    None => continue,
                }
            };

            let best_metric = dist.get(neighbor).copied().unwrap_or(f64::INFINITY);
            let better_metric = candidate_metric + EPS < best_metric;
            let equal_metric = (candidate_metric - best_metric).abs() <= EPS;
            let better_hop = equal_metric
                && first_hop
                    .get(neighbor)
                    .map_or(true, |best_hop| candidate_hop < *best_hop);

            if better_metric || better_hop {
                dist.insert(neighbor.clone(), candidate_metric);
                first_hop.insert(neighbor.clone(), candidate_hop);
                frontier.push(neighbor, candidate_metric);
                settled.remove(neighbor);
            }
        }
    }

    dist.into_iter()
        .filter(|(destination, cost)| destination.as_str() != origin && cost.is_finite())
        .filter_map(|(destination, cost)| {
            let hop = first_hop.get(&destination)?.clone();
            Some((destination, PathInfo { first_hop: hop, cost }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(&str, &str, f64)]) -> Graph {
        let mut graph: Graph = BTreeMap::new();
        for (from, to, cost) in edges {
            graph
                .entry(from.to_string())
                .or_default()
                .insert(to.to_string(), *cost);
            graph
                .entry(to.to_string())
                .or_default()
                .insert(from.to_string(), *cost);
        }
        graph
    }

    #[test]
    fn square_topology_first_hops() {
        let graph = graph(&[
            ("a", "b", 1.0),
            ("a", "c", 1.0),
            ("b", "d", 1.0),
            ("c", "d", 1.0),
        ]);
        let routes = compute_spf(&graph, "a");

        assert_eq!(routes["b"], PathInfo { first_hop: "b".to_string(), cost: 1.0 });
        assert_eq!(routes["c"], PathInfo { first_hop: "c".to_string(), cost: 1.0 });
        // Both paths to d cost 2; the tie resolves to the lower hop id.
        assert_eq!(routes["d"], PathInfo { first_hop: "b".to_string(), cost: 2.0 });
        assert!(!routes.contains_key("a"));
    }

    #[test]
    fn tiebreak_is_stable_under_edge_order() {
        let mut forward = graph(&[("a", "b", 1.0), ("a", "c", 1.0)]);
        forward
            .entry("b".to_string())
            .or_default()
            .insert("d".to_string(), 1.0);
        forward
            .entry("c".to_string())
            .or_default()
            .insert("d".to_string(), 1.0);

        let routes = compute_spf(&forward, "a");
        assert_eq!(routes["d"].first_hop, "b");
    }

    #[test]
    fn prefers_cheaper_multi_hop_path() {
        let graph = graph(&[("a", "b", 10.0), ("a", "c", 1.0), ("c", "b", 2.0)]);
        let routes = compute_spf(&graph, "a");
        assert_eq!(routes["b"], PathInfo { first_hop: "c".to_string(), cost: 3.0 });
    }

    #[test]
    fn unreachable_destinations_are_absent() {
        let mut graph = graph(&[("a", "b", 1.0)]);
        graph.insert("z".to_string(), BTreeMap::new());
        let routes = compute_spf(&graph, "a");
        assert!(routes.contains_key("b"));
        assert!(!routes.contains_key("z"));
    }

    #[test]
    fn non_finite_edges_are_skipped() {
        let graph = graph(&[("a", "b", f64::INFINITY), ("a", "c", 1.0), ("c", "b", 1.0)]);
        let routes = compute_spf(&graph, "a");
        assert_eq!(routes["b"], PathInfo { first_hop: "c".to_string(), cost: 2.0 });
    }

    #[test]
    fn first_hop_is_always_a_direct_neighbor_of_origin() {
        let graph = graph(&[
            ("a", "b", 1.0),
            ("b", "c", 1.0),
            ("c", "d", 1.0),
            ("d", "e", 1.0),
        ]);
        let routes = compute_spf(&graph, "a");
        for (destination, path) in &routes {
            assert_eq!(path.first_hop, "b", "destination {destination}");
        }
        assert_eq!(routes["e"].cost, 4.0);
    }
}
