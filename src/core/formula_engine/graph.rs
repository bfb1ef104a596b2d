//! Dependency graph over formula cells
//!
//! Nodes are formula cells; an edge runs from a precedent to the formula that
//! reads it. Strongly connected components give both the evaluation order and
//! the circular references: a component with more than one member, or a cell
//! that reads itself, is a cycle.

use crate::core::address::CellAddress;
use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// A formula cell: sheet index plus address
pub type CellKey = (usize, CellAddress);

/// One step of a recalculation
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Evaluate(CellKey),
    /// Cells that feed each other; all of them evaluate to #CYCLE!
    Cycle(Vec<CellKey>),
}

#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<CellKey, ()>,
    nodes: HashMap<CellKey, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_cell(&mut self, key: CellKey) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(key);
        self.nodes.insert(key, idx);
        idx
    }

    /// Record that `dependent` reads `precedent`
    pub fn add_dependency(&mut self, precedent: CellKey, dependent: CellKey) {
        let from = self.add_cell(precedent);
        let to = self.add_cell(dependent);
        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, ());
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn clear(&mut self) {
        self.graph.clear();
        self.nodes.clear();
        self.nodes.shrink_to_fit();
    }

    /// Evaluation order, precedents first
    pub fn plan(&self) -> Vec<Step> {
        // Components come back in reverse topological order. kosaraju_scc walks
        // with an explicit stack, so long dependency chains cannot exhaust ours.
        let mut components = kosaraju_scc(&self.graph);
        components.reverse();

        components
            .into_iter()
            .map(|component| {
                let is_cycle = component.len() > 1
                    || self.graph.contains_edge(component[0], component[0]);
                if is_cycle {
                    let mut members: Vec<CellKey> =
                        component.iter().map(|idx| self.graph[*idx]).collect();
                    members.sort();
                    Step::Cycle(members)
                } else {
                    Step::Evaluate(self.graph[component[0]])
                }
            })
            .collect()
    }

    /// Formula cells that read `key` directly
    pub fn dependents(&self, key: CellKey) -> Vec<CellKey> {
        self.neighbors(key, Direction::Outgoing)
    }

    /// Formula cells that `key` reads directly
    pub fn formula_precedents(&self, key: CellKey) -> Vec<CellKey> {
        self.neighbors(key, Direction::Incoming)
    }

    fn neighbors(&self, key: CellKey, direction: Direction) -> Vec<CellKey> {
        let Some(&idx) = self.nodes.get(&key) else {
            return Vec::new();
        };
        let mut keys: Vec<CellKey> = self
            .graph
            .neighbors_directed(idx, direction)
            .map(|n| self.graph[n])
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// A closed path through a cycle, starting and ending at its first member and
    /// following what each cell reads: [A1, B1, A1] for A1 = B1, B1 = A1
    pub fn cycle_chain(&self, members: &[CellKey]) -> Vec<CellKey> {
        let Some(&start) = members.first() else {
            return Vec::new();
        };
        let allowed: HashSet<CellKey> = members.iter().copied().collect();
        let next_steps = |key: CellKey| -> Vec<CellKey> {
            let mut steps: Vec<CellKey> = self
                .formula_precedents(key)
                .into_iter()
                .filter(|k| allowed.contains(k))
                .collect();
            // Popped from the back, so the lowest precedent is tried first
            steps.reverse();
            steps
        };

        // Depth-first search; each frame is a cell on the path and the
        // precedents not yet tried from it
        let mut visited = HashSet::from([start]);
        let mut frames = vec![(start, next_steps(start))];
        while let Some((_, pending)) = frames.last_mut() {
            let Some(next) = pending.pop() else {
                frames.pop();
                continue;
            };
            if next == start {
                let mut path: Vec<CellKey> = frames.iter().map(|(key, _)| *key).collect();
                path.push(start);
                return path;
            }
            if visited.insert(next) {
                frames.push((next, next_steps(next)));
            }
        }
        vec![start, start]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(address: &str) -> CellKey {
        (0, CellAddress::parse(address).unwrap())
    }

    #[test]
    fn test_plan_orders_precedents_first() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(key("A1"), key("B1"));
        graph.add_dependency(key("B1"), key("C1"));
        let plan = graph.plan();
        assert_eq!(
            plan,
            vec![
                Step::Evaluate(key("A1")),
                Step::Evaluate(key("B1")),
                Step::Evaluate(key("C1")),
            ]
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(key("A1"), key("A1"));
        assert_eq!(graph.plan(), vec![Step::Cycle(vec![key("A1")])]);
        assert_eq!(graph.cycle_chain(&[key("A1")]), vec![key("A1"), key("A1")]);
    }

    #[test]
    fn test_indirect_cycle_members_and_chain() {
        let mut graph = DependencyGraph::new();
        // A1 = B1, B1 = C1, C1 = A1, D1 = A1
        graph.add_dependency(key("B1"), key("A1"));
        graph.add_dependency(key("C1"), key("B1"));
        graph.add_dependency(key("A1"), key("C1"));
        graph.add_dependency(key("A1"), key("D1"));

        let plan = graph.plan();
        let members = vec![key("A1"), key("B1"), key("C1")];
        assert_eq!(plan[0], Step::Cycle(members.clone()));
        assert_eq!(plan[1], Step::Evaluate(key("D1")));
        assert_eq!(
            graph.cycle_chain(&members),
            vec![key("A1"), key("B1"), key("C1"), key("A1")]
        );
    }

    #[test]
    fn test_long_cycle_chain_and_plan() {
        // A1 = A100000, A(i) = A(i-1)
        let size = 100_000;
        let mut graph = DependencyGraph::new();
        graph.add_dependency(key(&format!("A{size}")), key("A1"));
        for row in 2..=size {
            graph.add_dependency(key(&format!("A{}", row - 1)), key(&format!("A{row}")));
        }

        let plan = graph.plan();
        assert_eq!(plan.len(), 1);
        let Step::Cycle(members) = &plan[0] else {
            panic!("expected a cycle");
        };
        assert_eq!(members.len(), size as usize);

        let chain = graph.cycle_chain(members);
        assert_eq!(chain.len(), size as usize + 1);
        assert_eq!(chain[0], key("A1"));
        assert_eq!(chain[1], key(&format!("A{size}")));
        assert_eq!(chain[size as usize], key("A1"));
    }

    #[test]
    fn test_long_chain_plans_in_order() {
        let mut graph = DependencyGraph::new();
        for row in 2..=100_000 {
            graph.add_dependency(key(&format!("A{}", row - 1)), key(&format!("A{row}")));
        }
        let plan = graph.plan();
        assert_eq!(plan.first(), Some(&Step::Evaluate(key("A1"))));
        assert_eq!(plan.last(), Some(&Step::Evaluate(key("A100000"))));
    }

    #[test]
    fn test_neighbors() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency(key("A1"), key("B1"));
        graph.add_dependency(key("A1"), key("C1"));
        assert_eq!(graph.dependents(key("A1")), vec![key("B1"), key("C1")]);
        assert_eq!(graph.formula_precedents(key("C1")), vec![key("A1")]);
        assert!(graph.dependents(key("Z9")).is_empty());
    }
}
