//! Module graph built from a completed trace
//!
//! Nodes are resolved module URLs; edges are labelled static or dynamic so
//! the always-loaded subgraph can be told apart from code that is only
//! reached through `import()`.

use std::collections::{HashMap, HashSet};

use petgraph::algo::{is_cyclic_directed, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{DfsPostOrder, EdgeFiltered, EdgeRef};

/// How one module reaches another
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Static,
    Dynamic,
}

/// Directed module graph keyed by URL
#[derive(Debug, Default)]
pub struct TraceGraph {
    graph: DiGraph<String, EdgeKind>,
    /// Map from URL to NodeIndex for fast lookups
    node_map: HashMap<String, NodeIndex>,
}

impl TraceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module node, returning the existing index if already present
    pub fn add_module(&mut self, url: &str) -> NodeIndex {
        if let Some(index) = self.node_map.get(url) {
            return *index;
        }
        let index = self.graph.add_node(url.to_string());
        self.node_map.insert(url.to_string(), index);
        index
    }

    /// Add an edge, creating missing nodes. Duplicate edges of the same kind
    /// are ignored; a static edge also replaces an existing dynamic one.
    pub fn add_dependency(&mut self, from: &str, to: &str, kind: EdgeKind) {
        let from = self.add_module(from);
        let to = self.add_module(to);
        match self.graph.find_edge(from, to) {
            Some(edge) => {
                if kind == EdgeKind::Static {
                    self.graph[edge] = EdgeKind::Static;
                }
            },
            None => {
                self.graph.add_edge(from, to, kind);
            },
        }
    }

    pub fn module_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Every module reachable from `roots` through static edges only,
    /// roots included
    pub fn static_closure<'a>(&self, roots: impl IntoIterator<Item = &'a str>) -> HashSet<String> {
        self.post_order(roots, false).into_iter().collect()
    }

    /// Modules reachable from `roots` only by crossing a dynamic edge
    pub fn dynamic_only<'a>(&self, roots: impl IntoIterator<Item = &'a str> + Clone) -> HashSet<String> {
        let statics = self.static_closure(roots.clone());
        self.post_order(roots, true)
            .into_iter()
            .filter(|url| !statics.contains(url))
            .collect()
    }

    /// Dependencies-first ordering of everything reachable from `roots`.
    ///
    /// With `include_dynamic` unset only static edges are followed. Each
    /// module appears once; cycles are cut where first revisited.
    pub fn post_order<'a>(&self, roots: impl IntoIterator<Item = &'a str>, include_dynamic: bool) -> Vec<String> {
        let filtered = EdgeFiltered::from_fn(&self.graph, |edge| {
            include_dynamic || *edge.weight() == EdgeKind::Static
        });

        let mut order = Vec::new();
        let mut dfs = DfsPostOrder::empty(&filtered);
        for root in roots {
            let Some(&start) = self.node_map.get(root) else {
                continue;
            };
            // Keeps the finished set, so shared dependencies are emitted once
            dfs.move_to(start);
            while let Some(index) = dfs.next(&filtered) {
                order.push(self.graph[index].clone());
            }
        }
        order
    }

    pub fn has_cycles(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Strongly connected groups of modules that import each other
    pub fn cycles(&self) -> Vec<Vec<String>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1 || self.graph.find_edge(component[0], component[0]).is_some()
            })
            .map(|component| component.into_iter().map(|index| self.graph[index].clone()).collect())
            .collect()
    }

    /// Format cycle as "a -> b -> a"
    pub fn format_cycle(cycle: &[String]) -> String {
        match cycle.first() {
            None => "No cycle".to_string(),
            Some(first) => {
                let mut names: Vec<&str> = cycle.iter().map(String::as_str).collect();
                names.push(first);
                names.join(" -> ")
            },
        }
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn post_order_visits_each_reachable_module_once(
            num_modules in 2usize..8,
            edges in prop::collection::vec((0usize..7, 0usize..7, any::<bool>()), 0..16)
        ) {
            let mut graph = TraceGraph::new();
            for i in 0..num_modules {
                graph.add_module(&format!("m{}", i));
            }
            for (from, to, dynamic) in edges {
                if from < num_modules && to < num_modules {
                    let kind = if dynamic { EdgeKind::Dynamic } else { EdgeKind::Static };
                    graph.add_dependency(&format!("m{}", from), &format!("m{}", to), kind);
                }
            }

            let all = graph.post_order(["m0"], true);
            let unique: HashSet<_> = all.iter().collect();
            prop_assert_eq!(unique.len(), all.len());

            // The static subgraph is always inside the full reachable set
            let statics = graph.static_closure(["m0"]);
            for url in &statics {
                prop_assert!(unique.contains(url));
            }
            prop_assert!(statics.contains("m0"));

            // Dynamic-only modules and the static closure partition the reachable set
            let dynamic = graph.dynamic_only(["m0"]);
            prop_assert_eq!(dynamic.len() + statics.len(), all.len());
        }

        #[test]
        fn post_order_respects_acyclic_edges(
            num_modules in 2usize..7,
            edges in prop::collection::vec((0usize..6, 0usize..6), 0..12)
        ) {
            let mut graph = TraceGraph::new();
            let mut kept = Vec::new();
            for i in 0..num_modules {
                graph.add_module(&format!("m{}", i));
            }
            for (from, to) in edges {
                // Forward edges only, so the graph stays acyclic
                if from < to && to < num_modules {
                    graph.add_dependency(&format!("m{}", from), &format!("m{}", to), EdgeKind::Static);
                    kept.push((from, to));
                }
            }
            prop_assert!(!graph.has_cycles());

            let roots: Vec<String> = (0..num_modules).map(|i| format!("m{}", i)).collect();
            let order = graph.post_order(roots.iter().map(String::as_str), false);
            prop_assert_eq!(order.len(), num_modules);
            let pos = |i: usize| order.iter().position(|u| *u == format!("m{}", i));
            for (from, to) in kept {
                prop_assert!(pos(to) < pos(from));
            }
        }
    }
}
