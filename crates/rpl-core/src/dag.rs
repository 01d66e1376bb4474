//! Foreign-key dependency graph between tables

use crate::names::TableName;
use crate::state::SchemaState;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};

/// Tables as nodes, one edge per foreign key from the referenced table to
/// the referencing one.
#[derive(Debug)]
pub struct TableDag {
    graph: DiGraph<TableName, ()>,
    node_map: HashMap<TableName, NodeIndex>,
}

impl TableDag {
    /// Build the graph of every table in `state`. Self references are
    /// ignored; they never constrain creation order.
    pub fn from_state(state: &SchemaState) -> Self {
        let mut dag = Self {
            graph: DiGraph::new(),
            node_map: HashMap::new(),
        };
        for table in state.tables() {
            dag.add_table(table.name());
        }
        for table in state.tables() {
            for fk in &table.schema.foreign_keys {
                if fk.references_table == *table.name() {
                    continue;
                }
                if let (Some(&parent), Some(&child)) = (
                    dag.node_map.get(&fk.references_table),
                    dag.node_map.get(table.name()),
                ) {
                    dag.graph.add_edge(parent, child, ());
                }
            }
        }
        dag
    }

    fn add_table(&mut self, name: &TableName) -> NodeIndex {
        if let Some(&idx) = self.node_map.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(name.clone());
        self.node_map.insert(name.clone(), idx);
        idx
    }

    /// Tables with referenced tables first. A cycle cannot be ordered; the
    /// tables are then returned in name order.
    pub fn parents_first(&self) -> Vec<TableName> {
        match toposort(&self.graph, None) {
            Ok(indices) => indices
                .into_iter()
                .map(|idx| self.graph[idx].clone())
                .collect(),
            Err(cycle) => {
                log::warn!(
                    "Foreign keys form a cycle ({}); falling back to name order",
                    self.find_cycle_path(cycle.node_id())
                );
                let mut names: Vec<TableName> = self.node_map.keys().cloned().collect();
                names.sort();
                names
            }
        }
    }

    /// Tables with referencing tables first.
    pub fn children_first(&self) -> Vec<TableName> {
        let mut order = self.parents_first();
        order.reverse();
        order
    }

    fn find_cycle_path(&self, start: NodeIndex) -> String {
        let mut path: Vec<String> = vec![self.graph[start].to_string()];
        let mut current = start;
        let mut visited = HashSet::new();
        visited.insert(current);

        while let Some(edge) = self.graph.edges(current).next() {
            let target = edge.target();
            path.push(self.graph[target].to_string());
            if target == start || !visited.insert(target) {
                break;
            }
            current = target;
        }

        path.join(" -> ")
    }
}
