//! Dependency graph over computed fields.
//!
//! Nodes live in an arena and edges are arena indices. An edge `a -> b` means
//! "`a` needs `b` to be resolved first". Formula fields depend on the fields
//! they reference; lookup fields depend on their relation field and on the
//! target field of the related entity type.

use std::collections::HashMap;

use crate::catalog::FieldConfig;
use crate::id::FieldId;
use crate::types::CustomFieldDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    nodes: Vec<FieldId>,
    index: HashMap<FieldId, usize>,
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from definitions. Archived definitions still contribute nodes so that
    /// references to them stay visible, but they never add edges of their own.
    pub fn from_definitions<'a, I>(definitions: I) -> Self
    where
        I: IntoIterator<Item = &'a CustomFieldDefinition>,
    {
        let mut graph = Self::new();
        for definition in definitions {
            graph.add_node(&definition.id);
            if !definition.is_live() {
                continue;
            }
            for dependency in direct_dependencies(&definition.configuration) {
                graph.add_edge(&definition.id, &dependency);
            }
        }
        graph
    }

    pub fn add_node(&mut self, id: &FieldId) -> usize {
        if let Some(&slot) = self.index.get(id) {
            return slot;
        }
        let slot = self.nodes.len();
        self.nodes.push(id.clone());
        self.edges.push(Vec::new());
        self.index.insert(id.clone(), slot);
        slot
    }

    /// Record that `from` depends on `to`.
    pub fn add_edge(&mut self, from: &FieldId, to: &FieldId) {
        let from = self.add_node(from);
        let to = self.add_node(to);
        if !self.edges[from].contains(&to) {
            self.edges[from].push(to);
        }
    }

    /// Replace all outgoing edges of `id`.
    pub fn set_dependencies(&mut self, id: &FieldId, dependencies: &[FieldId]) {
        let slot = self.add_node(id);
        self.edges[slot].clear();
        for dependency in dependencies {
            self.add_edge(id, dependency);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every node ordered so that dependencies come before dependents.
    ///
    /// Returns the offending path (first node repeated at the end) when a cycle exists.
    pub fn topological_order(&self) -> Result<Vec<FieldId>, Vec<FieldId>> {
        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());

        for root in 0..self.nodes.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }
            // (node, next edge to explore)
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::InProgress;

            while let Some(top) = stack.len().checked_sub(1) {
                let (node, next) = stack[top];
                if let Some(&target) = self.edges[node].get(next) {
                    stack[top].1 += 1;
                    match marks[target] {
                        Mark::Unvisited => {
                            marks[target] = Mark::InProgress;
                            stack.push((target, 0));
                        }
                        Mark::InProgress => {
                            let start = stack.iter().position(|(slot, _)| *slot == target).unwrap_or(0);
                            let mut cycle: Vec<FieldId> =
                                stack[start..].iter().map(|(slot, _)| self.nodes[*slot].clone()).collect();
                            cycle.push(self.nodes[target].clone());
                            return Err(cycle);
                        }
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    order.push(self.nodes[node].clone());
                    stack.pop();
                }
            }
        }

        Ok(order)
    }

    pub fn find_cycle(&self) -> Option<Vec<FieldId>> {
        self.topological_order().err()
    }
}

/// Fields a computed field needs before it can be resolved.
pub fn direct_dependencies(configuration: &FieldConfig) -> Vec<FieldId> {
    match configuration {
        FieldConfig::Formula(formula) => formula.dependencies(),
        FieldConfig::Lookup(lookup) => vec![lookup.relation_field_id.clone(), lookup.lookup_field_id.clone()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(value: &str) -> FieldId {
        FieldId::new(value)
    }

    #[test]
    fn dependencies_come_first() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&id("total"), &id("hours"));
        graph.add_edge(&id("total"), &id("rate"));
        graph.add_edge(&id("margin"), &id("total"));

        let order = graph.topological_order().unwrap();
        let position = |name: &str| order.iter().position(|field| field.as_str() == name).unwrap();
        assert!(position("hours") < position("total"));
        assert!(position("rate") < position("total"));
        assert!(position("total") < position("margin"));
        assert_eq!(order.len(), 4);
    }

    #[test]
    fn detects_transitive_cycle_with_path() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&id("a"), &id("b"));
        graph.add_edge(&id("b"), &id("c"));
        graph.add_edge(&id("c"), &id("a"));

        let cycle = graph.find_cycle().unwrap();
        let names: Vec<&str> = cycle.iter().map(FieldId::as_str).collect();
        assert_eq!(names, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn detects_self_reference() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&id("a"), &id("a"));
        assert_eq!(graph.find_cycle().unwrap(), vec![id("a"), id("a")]);
    }

    #[test]
    fn replacing_dependencies_breaks_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&id("a"), &id("b"));
        graph.add_edge(&id("b"), &id("a"));
        assert!(graph.find_cycle().is_some());
        graph.set_dependencies(&id("b"), &[]);
        assert!(graph.find_cycle().is_none());
        assert_eq!(graph.len(), 2);
    }
}
