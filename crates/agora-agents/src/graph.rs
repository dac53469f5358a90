use std::collections::{BTreeMap, BTreeSet, VecDeque};

use agora_models::{DebateStatus, RunState, StageKind};

use crate::error::GraphError;

/// When an edge fires after its source stage completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeGuard {
    Always,
    /// Source stage was a debate that converged early.
    DebateConverged,
    /// Source stage was a debate that hit its round ceiling.
    DebateNotConverged,
}

impl EdgeGuard {
    fn passes(&self, status: Option<DebateStatus>) -> bool {
        match self {
            EdgeGuard::Always => true,
            EdgeGuard::DebateConverged => matches!(status, Some(DebateStatus::Converged { .. })),
            EdgeGuard::DebateNotConverged => matches!(status, Some(DebateStatus::NotConverged)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: StageKind,
    pub to: StageKind,
    pub guard: EdgeGuard,
}

impl Edge {
    pub fn always(from: StageKind, to: StageKind) -> Self {
        Self {
            from,
            to,
            guard: EdgeGuard::Always,
        }
    }
}

fn state_rank(state: RunState) -> u8 {
    StageKind::PIPELINE
        .iter()
        .position(|s| s.state() == state)
        .map(|p| p as u8)
        .unwrap_or(u8::MAX)
}

/// Validated, acyclic stage graph.
#[derive(Debug, Clone)]
pub struct StageGraph {
    edges: Vec<Edge>,
    entry: StageKind,
    order: Vec<StageKind>,
    predecessors: BTreeMap<StageKind, BTreeSet<StageKind>>,
}

impl StageGraph {
    /// Validate `nodes` and `edges`: nodes are unique, edges reference declared
    /// nodes and never point back in the run lifecycle, there is exactly one
    /// entry, and the graph is acyclic.
    pub fn new(nodes: &[StageKind], edges: Vec<Edge>) -> Result<Self, GraphError> {
        let mut declared = BTreeSet::new();
        for node in nodes {
            if !declared.insert(*node) {
                return Err(GraphError::DuplicateNode(*node));
            }
        }

        let mut predecessors: BTreeMap<StageKind, BTreeSet<StageKind>> =
            nodes.iter().map(|n| (*n, BTreeSet::new())).collect();
        for edge in &edges {
            for end in [edge.from, edge.to] {
                if !declared.contains(&end) {
                    return Err(GraphError::UnknownNode(end));
                }
            }
            if state_rank(edge.to.state()) < state_rank(edge.from.state()) {
                return Err(GraphError::Backwards {
                    from: edge.from,
                    to: edge.to,
                });
            }
            predecessors.entry(edge.to).or_default().insert(edge.from);
        }

        let order = topological_order(nodes, &predecessors)?;

        let entries: Vec<StageKind> = predecessors
            .iter()
            .filter(|(_, preds)| preds.is_empty())
            .map(|(node, _)| *node)
            .collect();
        let entry = match entries.as_slice() {
            [entry] => *entry,
            _ => return Err(GraphError::Entry(entries.len())),
        };

        Ok(Self {
            edges,
            entry,
            order,
            predecessors,
        })
    }

    /// The canonical deliberation pipeline. The debate stages leave through
    /// a pair of conditional edges, one per exit status.
    pub fn standard() -> Result<Self, GraphError> {
        use StageKind::*;

        let debate_exit = |from, to| {
            [
                Edge {
                    from,
                    to,
                    guard: EdgeGuard::DebateConverged,
                },
                Edge {
                    from,
                    to,
                    guard: EdgeGuard::DebateNotConverged,
                },
            ]
        };

        let mut edges = vec![Edge::always(Analysts, ResearchDebate)];
        edges.extend(debate_exit(ResearchDebate, ResearchManager));
        edges.push(Edge::always(ResearchManager, Trader));
        edges.push(Edge::always(Trader, RiskDebate));
        edges.extend(debate_exit(RiskDebate, PortfolioManager));
        edges.push(Edge::always(PortfolioManager, SignalExtraction));
        edges.push(Edge::always(SignalExtraction, Reflection));

        Self::new(&StageKind::PIPELINE, edges)
    }

    pub fn entry(&self) -> StageKind {
        self.entry
    }

    /// A topological order of all stages.
    pub fn order(&self) -> &[StageKind] {
        &self.order
    }

    pub fn predecessors(&self, node: StageKind) -> Option<&BTreeSet<StageKind>> {
        self.predecessors.get(&node)
    }

    /// Targets of the edges that fire once `from` completes with `status`.
    pub fn fire(&self, from: StageKind, status: Option<DebateStatus>) -> Vec<StageKind> {
        let mut targets: Vec<StageKind> = self
            .edges
            .iter()
            .filter(|e| e.from == from && e.guard.passes(status))
            .map(|e| e.to)
            .collect();
        targets.dedup();
        targets
    }
}

/// Kahn's algorithm. Ties resolve in `nodes` order.
fn topological_order(
    nodes: &[StageKind],
    predecessors: &BTreeMap<StageKind, BTreeSet<StageKind>>,
) -> Result<Vec<StageKind>, GraphError> {
    let mut remaining: BTreeMap<StageKind, usize> = predecessors
        .iter()
        .map(|(node, preds)| (*node, preds.len()))
        .collect();
    let mut queue: VecDeque<StageKind> = nodes
        .iter()
        .copied()
        .filter(|n| remaining.get(n) == Some(&0))
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(node) = queue.pop_front() {
        order.push(node);
        for candidate in nodes {
            let is_successor = predecessors
                .get(candidate)
                .is_some_and(|preds| preds.contains(&node));
            if !is_successor {
                continue;
            }
            if let Some(count) = remaining.get_mut(candidate) {
                *count -= 1;
                if *count == 0 {
                    queue.push_back(*candidate);
                }
            }
        }
    }

    if order.len() < nodes.len() {
        let stuck = nodes
            .iter()
            .copied()
            .filter(|n| !order.contains(n))
            .collect();
        return Err(GraphError::Cycle(stuck));
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use StageKind::*;

    #[test]
    fn standard_graph_orders_the_pipeline() {
        let graph = StageGraph::standard().unwrap();
        assert_eq!(graph.entry(), Analysts);
        assert_eq!(graph.order(), &StageKind::PIPELINE);
    }

    #[test]
    fn debate_exits_fire_on_either_status() {
        let graph = StageGraph::standard().unwrap();
        assert_eq!(
            graph.fire(ResearchDebate, Some(DebateStatus::Converged { round: 1 })),
            vec![ResearchManager]
        );
        assert_eq!(
            graph.fire(RiskDebate, Some(DebateStatus::NotConverged)),
            vec![PortfolioManager]
        );
        assert!(graph.fire(ResearchDebate, None).is_empty());
        assert_eq!(graph.fire(Trader, None), vec![RiskDebate]);
        assert!(graph.fire(Reflection, None).is_empty());
    }

    #[test]
    fn rejects_cycles() {
        let edges = vec![
            Edge::always(Analysts, ResearchDebate),
            Edge::always(ResearchDebate, ResearchManager),
            Edge::always(ResearchManager, ResearchDebate),
        ];
        let err = StageGraph::new(&[Analysts, ResearchDebate, ResearchManager], edges).unwrap_err();
        assert_eq!(err, GraphError::Cycle(vec![ResearchDebate, ResearchManager]));
    }

    #[test]
    fn rejects_backwards_edges() {
        let edges = vec![Edge::always(Trader, Analysts)];
        let err = StageGraph::new(&[Analysts, Trader], edges).unwrap_err();
        assert_eq!(
            err,
            GraphError::Backwards {
                from: Trader,
                to: Analysts
            }
        );
    }

    #[test]
    fn rejects_unknown_and_duplicate_nodes() {
        let err = StageGraph::new(&[Analysts], vec![Edge::always(Analysts, Trader)]).unwrap_err();
        assert_eq!(err, GraphError::UnknownNode(Trader));
        let err = StageGraph::new(&[Analysts, Analysts], vec![]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateNode(Analysts));
    }

    #[test]
    fn requires_single_entry() {
        let err = StageGraph::new(&[Analysts, Trader], vec![]).unwrap_err();
        assert_eq!(err, GraphError::Entry(2));
    }

    #[test]
    fn join_node_has_all_predecessors() {
        let edges = vec![
            Edge::always(Analysts, ResearchDebate),
            Edge::always(Analysts, ResearchManager),
            Edge::always(ResearchDebate, ResearchManager),
        ];
        let graph =
            StageGraph::new(&[Analysts, ResearchDebate, ResearchManager], edges).unwrap();
        let preds = graph.predecessors(ResearchManager).unwrap();
        assert_eq!(preds.len(), 2);
        assert_eq!(graph.order(), &[Analysts, ResearchDebate, ResearchManager]);
    }
}
