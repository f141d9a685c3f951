//! Navigation graph of discovered screens and the transitions between them.
//!
//! The graph is a single-writer aggregate: `nodes` and `edges` are the source
//! of truth, while `outgoing`/`incoming` are derived indices over `edges`.
//! Only the source of truth is serialized; the indices are rebuilt on load.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{ActionKind, Decision, Element, ScreenType};

/// A distinct screen state, keyed by its capture fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenNode {
    pub fingerprint: String,
    pub screen_type: Option<ScreenType>,
    /// Element snapshot taken on first discovery. Never replaced.
    pub elements: Vec<Element>,
    /// Steps from launch at first visit.
    pub depth: u32,
    pub visit_count: u32,
    pub last_visited: DateTime<Utc>,
    /// First known predecessor. Informational only.
    pub parent_fingerprint: Option<String>,
}

impl ScreenNode {
    pub fn new(
        fingerprint: impl Into<String>,
        screen_type: Option<ScreenType>,
        elements: Vec<Element>,
        depth: u32,
        parent_fingerprint: Option<String>,
    ) -> Self {
        Self {
            fingerprint: fingerprint.into(),
            screen_type,
            elements,
            depth,
            visit_count: 1,
            last_visited: Utc::now(),
            parent_fingerprint,
        }
    }
}

/// The action that caused a transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionAction {
    pub kind: ActionKind,
    pub target: Option<String>,
    pub text: Option<String>,
    pub reasoning: String,
    pub confidence: u8,
}

impl From<&Decision> for TransitionAction {
    fn from(decision: &Decision) -> Self {
        Self {
            kind: decision.action,
            target: decision.target.clone(),
            text: decision.text_to_type.clone(),
            reasoning: decision.reasoning.clone(),
            confidence: decision.confidence(),
        }
    }
}

/// A directed, timed edge between two screens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
    pub action: TransitionAction,
    pub duration_ms: u64,
}

/// Coverage summary over the discovered graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageStats {
    pub total_screens: usize,
    /// Screens with `visit_count > 0`, which is every node in the graph.
    pub explored_screens: usize,
    /// `explored_screens / total_screens` as a percentage (100 for any non-empty graph).
    pub coverage_percentage: f64,
    pub total_edges: usize,
    pub average_depth: f64,
    /// Screens that still expose interactive elements never used from them.
    pub frontier_screens: usize,
}

/// Fastest observed route between two screens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route<'a> {
    pub transitions: Vec<&'a Transition>,
    pub total_duration_ms: u64,
}

/// Persisted form of the graph. Adjacency indices are rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphDocument {
    nodes: Vec<ScreenNode>,
    edges: Vec<Transition>,
    start_node: Option<String>,
    current_node: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "GraphDocument", into = "GraphDocument")]
pub struct NavigationGraph {
    nodes: BTreeMap<String, ScreenNode>,
    edges: Vec<Transition>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
    start_node: Option<String>,
    current_node: Option<String>,
}

impl From<GraphDocument> for NavigationGraph {
    fn from(doc: GraphDocument) -> Self {
        let mut graph = Self {
            nodes: doc
                .nodes
                .into_iter()
                .map(|node| (node.fingerprint.clone(), node))
                .collect(),
            edges: doc.edges,
            outgoing: HashMap::new(),
            incoming: HashMap::new(),
            start_node: doc.start_node,
            current_node: doc.current_node,
        };
        graph.rebuild_indices();
        graph
    }
}

impl From<NavigationGraph> for GraphDocument {
    fn from(graph: NavigationGraph) -> Self {
        Self {
            nodes: graph.nodes.into_values().collect(),
            edges: graph.edges,
            start_node: graph.start_node,
            current_node: graph.current_node,
        }
    }
}

impl NavigationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly discovered screen, or record a revisit of a known one.
    ///
    /// Returns `true` if the fingerprint was unseen. A revisit only bumps
    /// `visit_count` and `last_visited`; the original element snapshot stays.
    pub fn add_node(&mut self, node: ScreenNode) -> bool {
        if let Some(existing) = self.nodes.get_mut(&node.fingerprint) {
            existing.visit_count += 1;
            existing.last_visited = node.last_visited;
            return false;
        }
        if self.start_node.is_none() {
            self.start_node = Some(node.fingerprint.clone());
        }
        if self.current_node.is_none() {
            self.current_node = Some(node.fingerprint.clone());
        }
        self.nodes.insert(node.fingerprint.clone(), node);
        true
    }

    /// Append an edge and move `current_node` to `to`.
    ///
    /// Endpoints are not required to exist as nodes yet.
    pub fn add_transition(
        &mut self,
        from: &str,
        to: &str,
        action: TransitionAction,
        duration: Duration,
    ) {
        let index = self.edges.len();
        self.edges.push(Transition {
            from: from.to_string(),
            to: to.to_string(),
            action,
            duration_ms: duration.as_millis() as u64,
        });
        self.outgoing.entry(from.to_string()).or_default().push(index);
        self.incoming.entry(to.to_string()).or_default().push(index);
        self.current_node = Some(to.to_string());
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.nodes.contains_key(fingerprint)
    }

    pub fn node(&self, fingerprint: &str) -> Option<&ScreenNode> {
        self.nodes.get(fingerprint)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ScreenNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[Transition] {
        &self.edges
    }

    pub fn start_node(&self) -> Option<&str> {
        self.start_node.as_deref()
    }

    pub fn current_node(&self) -> Option<&str> {
        self.current_node.as_deref()
    }

    /// Point `current_node` at a screen reached without a recorded transition.
    pub fn set_current_node(&mut self, fingerprint: &str) {
        self.current_node = Some(fingerprint.to_string());
    }

    pub fn outgoing(&self, fingerprint: &str) -> impl Iterator<Item = &Transition> {
        self.edges_at(&self.outgoing, fingerprint)
    }

    pub fn incoming(&self, fingerprint: &str) -> impl Iterator<Item = &Transition> {
        self.edges_at(&self.incoming, fingerprint)
    }

    fn edges_at<'a>(
        &'a self,
        index: &'a HashMap<String, Vec<usize>>,
        fingerprint: &str,
    ) -> impl Iterator<Item = &'a Transition> + 'a {
        index
            .get(fingerprint)
            .into_iter()
            .flatten()
            .map(move |&i| &self.edges[i])
    }

    /// Distinct successor fingerprints in first-edge order.
    fn successors(&self, fingerprint: &str) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.outgoing(fingerprint)
            .map(|edge| edge.to.as_str())
            .filter(|to| seen.insert(*to))
            .collect()
    }

    /// Snapshot of both adjacency indices as neighbor sets, for comparisons.
    pub fn adjacency(&self) -> (AdjacencySets, AdjacencySets) {
        let collect = |index: &HashMap<String, Vec<usize>>, forward: bool| {
            index
                .iter()
                .map(|(key, edges)| {
                    let neighbors = edges
                        .iter()
                        .map(|&i| {
                            let edge = &self.edges[i];
                            if forward {
                                edge.to.clone()
                            } else {
                                edge.from.clone()
                            }
                        })
                        .collect::<BTreeSet<_>>();
                    (key.clone(), neighbors)
                })
                .collect::<AdjacencySets>()
        };
        (collect(&self.outgoing, true), collect(&self.incoming, false))
    }

    fn rebuild_indices(&mut self) {
        self.outgoing.clear();
        self.incoming.clear();
        for (index, edge) in self.edges.iter().enumerate() {
            self.outgoing.entry(edge.from.clone()).or_default().push(index);
            self.incoming.entry(edge.to.clone()).or_default().push(index);
        }
    }

    /// True iff `to` can already reach `from`, i.e. adding `from → to` closes a cycle.
    pub fn would_create_cycle(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue = VecDeque::from([to]);
        visited.insert(to);
        while let Some(current) = queue.pop_front() {
            for next in self.successors(current) {
                if next == from {
                    return true;
                }
                if visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        false
    }

    /// Every cycle met by a depth-first walk started from each unvisited screen.
    ///
    /// The same structural cycle may be reported more than once from
    /// different entry points or parallel edges; see [`Self::unique_cycles`].
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        let mut search = CycleSearch {
            graph: self,
            visited: HashSet::new(),
            stack: Vec::new(),
            on_stack: HashSet::new(),
            cycles: Vec::new(),
        };
        for fingerprint in self.all_fingerprints() {
            if !search.visited.contains(fingerprint) {
                search.visit(fingerprint);
            }
        }
        search.cycles
    }

    /// [`Self::find_cycles`] deduplicated by canonical rotation, first occurrence kept.
    pub fn unique_cycles(&self) -> Vec<Vec<String>> {
        let mut seen = HashSet::new();
        self.find_cycles()
            .into_iter()
            .filter(|cycle| seen.insert(canonical_rotation(cycle)))
            .collect()
    }

    /// Fingerprints from nodes and edge endpoints, sorted for deterministic walks.
    fn all_fingerprints(&self) -> BTreeSet<&str> {
        let mut all: BTreeSet<&str> = self.nodes.keys().map(String::as_str).collect();
        for edge in &self.edges {
            all.insert(edge.from.as_str());
            all.insert(edge.to.as_str());
        }
        all
    }

    /// Fastest observed actions from `from` to `to`.
    ///
    /// Edge weight is the recorded transition duration, so this is the
    /// quickest path seen so far rather than the one with fewest hops.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<TransitionAction>> {
        self.shortest_route(from, to).map(|route| {
            route
                .transitions
                .into_iter()
                .map(|edge| edge.action.clone())
                .collect()
        })
    }

    /// Dijkstra over `outgoing` weighted by `duration_ms`.
    pub fn shortest_route(&self, from: &str, to: &str) -> Option<Route<'_>> {
        if from == to {
            return Some(Route {
                transitions: Vec::new(),
                total_duration_ms: 0,
            });
        }

        let mut dist: HashMap<&str, u64> = HashMap::from([(from, 0)]);
        let mut via: HashMap<&str, usize> = HashMap::new();
        let mut heap = BinaryHeap::from([Reverse((0u64, from))]);

        while let Some(Reverse((cost, node))) = heap.pop() {
            if node == to {
                break;
            }
            if dist.get(node).is_some_and(|&best| cost > best) {
                continue;
            }
            for &index in self.outgoing.get(node).into_iter().flatten() {
                let edge = &self.edges[index];
                let next_cost = cost.saturating_add(edge.duration_ms);
                let improved = dist
                    .get(edge.to.as_str())
                    .is_none_or(|&best| next_cost < best);
                if improved {
                    dist.insert(edge.to.as_str(), next_cost);
                    via.insert(edge.to.as_str(), index);
                    heap.push(Reverse((next_cost, edge.to.as_str())));
                }
            }
        }

        let total_duration_ms = *dist.get(to)?;
        let mut transitions = Vec::new();
        let mut cursor = to;
        while cursor != from {
            let edge = &self.edges[*via.get(cursor)?];
            transitions.push(edge);
            cursor = edge.from.as_str();
        }
        transitions.reverse();
        Some(Route {
            transitions,
            total_duration_ms,
        })
    }

    /// Screens whose snapshot has interactive targets never used as an outgoing action.
    pub fn unexplored_frontier(&self) -> Vec<&str> {
        self.nodes
            .values()
            .filter(|node| {
                let used: HashSet<&str> = self
                    .outgoing(&node.fingerprint)
                    .filter_map(|edge| edge.action.target.as_deref())
                    .collect();
                node.elements
                    .iter()
                    .filter(|element| element.interactive)
                    .filter_map(|element| element.target_key())
                    .any(|key| !used.contains(key))
            })
            .map(|node| node.fingerprint.as_str())
            .collect()
    }

    pub fn coverage_stats(&self) -> CoverageStats {
        let total_screens = self.nodes.len();
        let explored_screens = self.nodes.values().filter(|n| n.visit_count > 0).count();
        let (coverage_percentage, average_depth) = if total_screens == 0 {
            (0.0, 0.0)
        } else {
            let depth_sum: u64 = self.nodes.values().map(|n| u64::from(n.depth)).sum();
            (
                explored_screens as f64 / total_screens as f64 * 100.0,
                depth_sum as f64 / total_screens as f64,
            )
        };
        CoverageStats {
            total_screens,
            explored_screens,
            coverage_percentage,
            total_edges: self.edges.len(),
            average_depth,
            frontier_screens: self.unexplored_frontier().len(),
        }
    }
}

/// Neighbor sets keyed by fingerprint.
pub type AdjacencySets = BTreeMap<String, BTreeSet<String>>;

struct CycleSearch<'g> {
    graph: &'g NavigationGraph,
    visited: HashSet<&'g str>,
    stack: Vec<&'g str>,
    on_stack: HashSet<&'g str>,
    cycles: Vec<Vec<String>>,
}

impl<'g> CycleSearch<'g> {
    fn visit(&mut self, node: &'g str) {
        self.visited.insert(node);
        self.stack.push(node);
        self.on_stack.insert(node);

        let graph = self.graph;
        for edge in graph.outgoing(node) {
            let next = edge.to.as_str();
            if self.on_stack.contains(next) {
                if let Some(start) = self.stack.iter().position(|&n| n == next) {
                    self.cycles
                        .push(self.stack[start..].iter().map(|s| s.to_string()).collect());
                }
            } else if !self.visited.contains(next) {
                self.visit(next);
            }
        }

        self.stack.pop();
        self.on_stack.remove(node);
    }
}

/// Rotate a cycle so its lexicographically smallest fingerprint comes first.
fn canonical_rotation(cycle: &[String]) -> Vec<String> {
    let Some(pivot) = cycle
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    else {
        return Vec::new();
    };
    cycle[pivot..]
        .iter()
        .chain(cycle[..pivot].iter())
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{button, text_field};

    fn tap(target: &str) -> TransitionAction {
        TransitionAction {
            kind: ActionKind::Tap,
            target: Some(target.to_string()),
            text: None,
            reasoning: format!("tap {target}"),
            confidence: 80,
        }
    }

    fn screen(fp: &str) -> ScreenNode {
        ScreenNode::new(fp, None, Vec::new(), 0, None)
    }

    fn graph_with(edges: &[(&str, &str, u64)]) -> NavigationGraph {
        let mut graph = NavigationGraph::new();
        for (from, to, ms) in edges {
            graph.add_node(screen(from));
            graph.add_node(screen(to));
            graph.add_transition(from, to, tap(to), Duration::from_millis(*ms));
        }
        graph
    }

    #[test]
    fn add_node_is_idempotent_per_fingerprint() {
        let mut graph = NavigationGraph::new();
        let first = ScreenNode::new("F1", None, vec![button("login", "Login")], 0, None);
        assert!(graph.add_node(first));
        assert_eq!(graph.start_node(), Some("F1"));

        let again = ScreenNode::new("F1", None, vec![button("other", "Other")], 3, None);
        assert!(!graph.add_node(again));
        assert!(!graph.add_node(screen("F1")));

        let node = graph.node("F1").expect("node");
        assert_eq!(node.visit_count, 3);
        assert_eq!(node.depth, 0);
        assert_eq!(node.elements[0].id.as_deref(), Some("login"));
        assert_eq!(graph.nodes().count(), 1);
    }

    #[test]
    fn add_transition_updates_indices_and_current_node() {
        let mut graph = graph_with(&[("A", "B", 10)]);
        graph.add_transition("A", "B", tap("B"), Duration::from_millis(20));

        assert_eq!(graph.current_node(), Some("B"));
        assert_eq!(graph.outgoing("A").count(), 2);
        assert_eq!(graph.incoming("B").count(), 2);
        assert_eq!(graph.outgoing("B").count(), 0);
        assert_eq!(graph.edges().len(), 2);
    }

    #[test]
    fn transitions_may_reference_unknown_nodes() {
        let mut graph = NavigationGraph::new();
        graph.add_transition("X", "Y", tap("Y"), Duration::from_millis(1));
        assert!(!graph.contains("X"));
        assert_eq!(graph.outgoing("X").count(), 1);
        assert_eq!(graph.current_node(), Some("Y"));
    }

    #[test]
    fn cycle_is_detected_prospectively_and_after_insertion() {
        let mut graph = graph_with(&[("A", "B", 1), ("B", "C", 1)]);
        assert!(graph.would_create_cycle("C", "A"));
        assert!(!graph.would_create_cycle("A", "C"));
        assert!(graph.find_cycles().is_empty());

        graph.add_transition("C", "A", tap("A"), Duration::from_millis(1));
        let cycles = graph.find_cycles();
        assert_eq!(cycles.len(), 1);
        let members: BTreeSet<&str> = cycles[0].iter().map(String::as_str).collect();
        assert_eq!(members, BTreeSet::from(["A", "B", "C"]));
    }

    #[test]
    fn self_loop_counts_as_cycle() {
        let graph = graph_with(&[("A", "A", 1)]);
        assert!(graph.would_create_cycle("A", "A"));
        assert_eq!(graph.find_cycles(), vec![vec!["A".to_string()]]);
    }

    #[test]
    fn unique_cycles_collapses_duplicates_from_parallel_edges() {
        let mut graph = graph_with(&[("A", "B", 1), ("B", "A", 1)]);
        graph.add_transition("B", "A", tap("A"), Duration::from_millis(2));

        assert_eq!(graph.find_cycles().len(), 2);
        assert_eq!(
            graph.unique_cycles(),
            vec![vec!["A".to_string(), "B".to_string()]]
        );
    }

    /// Shortest means fastest observed: the two-hop route via C (2ms) beats
    /// the direct edge (5ms).
    #[test]
    fn shortest_path_weights_by_duration_not_hops() {
        let graph = graph_with(&[("A", "B", 5), ("A", "C", 1), ("C", "B", 1)]);

        let path = graph.shortest_path("A", "B").expect("reachable");
        let targets: Vec<_> = path.iter().map(|a| a.target.as_deref()).collect();
        assert_eq!(targets, vec![Some("C"), Some("B")]);

        let route = graph.shortest_route("A", "B").expect("route");
        assert_eq!(route.total_duration_ms, 2);
    }

    #[test]
    fn shortest_path_is_none_when_unreachable() {
        let graph = graph_with(&[("A", "B", 1), ("C", "A", 1)]);
        assert!(graph.shortest_path("B", "A").is_none());
        assert_eq!(graph.shortest_path("A", "A"), Some(Vec::new()));
    }

    #[test]
    fn round_trip_rebuilds_identical_adjacency() {
        let mut graph = graph_with(&[("A", "B", 3), ("B", "C", 4), ("C", "A", 5), ("A", "C", 1)]);
        graph.add_transition("A", "B", tap("B"), Duration::from_millis(9));
        let before = graph.adjacency();

        let json = serde_json::to_string(&graph).expect("serialize");
        assert!(!json.contains("outgoing"));
        let restored: NavigationGraph = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(restored.adjacency(), before);
        assert_eq!(restored.edges().len(), 5);
        assert_eq!(restored.start_node(), graph.start_node());
        assert_eq!(restored.current_node(), graph.current_node());
    }

    #[test]
    fn coverage_keeps_literal_definition_and_reports_frontier() {
        let mut graph = NavigationGraph::new();
        graph.add_node(ScreenNode::new(
            "login",
            Some(ScreenType::Login),
            vec![text_field("email", None), button("submit", "Sign In")],
            0,
            None,
        ));
        graph.add_node(ScreenNode::new("home", None, Vec::new(), 2, Some("login".into())));
        graph.add_transition("login", "home", tap("submit"), Duration::from_millis(1));

        let stats = graph.coverage_stats();
        assert_eq!(stats.total_screens, 2);
        assert_eq!(stats.explored_screens, 2);
        assert_eq!(stats.coverage_percentage, 100.0);
        assert_eq!(stats.total_edges, 1);
        assert_eq!(stats.average_depth, 1.0);
        assert_eq!(stats.frontier_screens, 1);
        assert_eq!(graph.unexplored_frontier(), vec!["login"]);
    }

    #[test]
    fn empty_graph_has_zero_coverage() {
        let stats = NavigationGraph::new().coverage_stats();
        assert_eq!(stats.total_screens, 0);
        assert_eq!(stats.coverage_percentage, 0.0);
        assert_eq!(stats.average_depth, 0.0);
    }
}
