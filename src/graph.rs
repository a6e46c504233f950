//! Table relationship graph and join-path resolution.
//!
//! [`SchemaGraph`] is built once from the full foreign-key edge set of a
//! [`MetadataStore`]: nodes are table names, edges are [`ForeignKeyEdge`]s,
//! and parallel edges between the same pair of tables are all kept.
//!
//! [`JoinPathResolver`] answers "how do I join A to B" with a breadth-first
//! search over the undirected projection of the graph. A foreign key can be
//! walked either way, but every emitted step keeps the edge's own direction,
//! so the join condition text is always `CHILD.col = PARENT.col`.
//!
//! # Determinism
//!
//! The search runs from the destination outward and records each table's
//! distance to it. The path is then read off greedily from the source, taking
//! at every hop the lexicographically smallest neighbour that is one step
//! closer. Because every shortest path has the same length, this yields the
//! shortest path whose table-name sequence is lexicographically smallest.
//! Parallel edges between the chosen tables are ordered by their
//! `(source, columns, target, columns)` key.

use std::collections::{BTreeMap, HashMap, VecDeque};

use serde::Serialize;

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::models::{normalize_ident, ForeignKeyEdge, JoinPath, JoinStep};
use crate::store::MetadataStore;

/// Undirected-reachability view over the foreign-key edges.
#[derive(Debug, Clone, Default)]
pub struct SchemaGraph {
    edges: Vec<ForeignKeyEdge>,
    /// table -> indices into `edges` touching it, sorted by (neighbour, edge key).
    adjacency: BTreeMap<String, Vec<usize>>,
}

impl SchemaGraph {
    pub fn build(store: &MetadataStore) -> Self {
        Self::from_parts(
            store.tables().map(|t| t.name.clone()),
            store.edges().to_vec(),
        )
    }

    pub fn from_parts(
        tables: impl IntoIterator<Item = String>,
        mut edges: Vec<ForeignKeyEdge>,
    ) -> Self {
        let mut adjacency: BTreeMap<String, Vec<usize>> = tables
            .into_iter()
            .map(|t| (normalize_ident(&t), Vec::new()))
            .collect();

        edges.retain(|e| {
            adjacency.contains_key(&e.source_table) && adjacency.contains_key(&e.target_table)
        });
        edges.sort_by_key(|e| e.key());

        for (idx, edge) in edges.iter().enumerate() {
            if let Some(list) = adjacency.get_mut(&edge.source_table) {
                list.push(idx);
            }
            if edge.target_table != edge.source_table {
                if let Some(list) = adjacency.get_mut(&edge.target_table) {
                    list.push(idx);
                }
            }
        }

        for (table, list) in adjacency.iter_mut() {
            list.sort_by(|&a, &b| {
                edges[a]
                    .other_end(table)
                    .cmp(edges[b].other_end(table))
                    .then_with(|| edges[a].key().cmp(&edges[b].key()))
            });
        }

        tracing::debug!(
            tables = adjacency.len(),
            edges = edges.len(),
            "schema graph built"
        );

        Self { edges, adjacency }
    }

    pub fn contains(&self, table: &str) -> bool {
        self.adjacency.contains_key(table)
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// `(neighbour, edge)` pairs of `table`, ordered by neighbour then edge key.
    fn neighbors<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a ForeignKeyEdge)> + 'a {
        self.adjacency
            .get(table)
            .into_iter()
            .flatten()
            .map(move |&idx| {
                let edge = &self.edges[idx];
                (edge.other_end(table), edge)
            })
            .filter(move |(other, _)| *other != table)
    }

    /// Hop distances from `origin`, at most `max_depth` deep.
    ///
    /// Visits each table at most once, so the work is bounded by the table
    /// count even on pathological fan-out.
    fn distances_from<'a>(&'a self, origin: &str, max_depth: usize) -> HashMap<&'a str, usize> {
        let mut dist: HashMap<&'a str, usize> = HashMap::new();
        let Some((origin, _)) = self.adjacency.get_key_value(origin) else {
            return dist;
        };

        let node_limit = self.node_count();
        let mut queue = VecDeque::new();
        dist.insert(origin.as_str(), 0);
        queue.push_back(origin.as_str());

        while let Some(current) = queue.pop_front() {
            let depth = dist.get(current).copied().unwrap_or(0);
            if depth >= max_depth {
                continue;
            }
            for (neighbor, _) in self.neighbors(current) {
                if dist.len() >= node_limit {
                    break;
                }
                if !dist.contains_key(neighbor) {
                    dist.insert(neighbor, depth + 1);
                    queue.push_back(neighbor);
                }
            }
        }

        dist
    }

    /// Tables within `hops` of `table` (excluding itself), nearest first,
    /// then by name.
    pub fn related_tables(&self, table: &str, hops: usize, limit: usize) -> Vec<String> {
        let table = normalize_ident(table);
        let mut related: Vec<(usize, &str)> = self
            .distances_from(&table, hops)
            .into_iter()
            .filter(|(name, d)| *d > 0 && *name != table)
            .map(|(name, d)| (d, name))
            .collect();
        related.sort();
        related
            .into_iter()
            .take(limit)
            .map(|(_, name)| name.to_string())
            .collect()
    }
}

/// Result of a path query. Not finding a path is an ordinary answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JoinPathOutcome {
    Found(JoinPath),
    NoPathFound {
        source: String,
        destination: String,
        max_hops: usize,
    },
}

impl JoinPathOutcome {
    pub fn path(&self) -> Option<&JoinPath> {
        match self {
            JoinPathOutcome::Found(path) => Some(path),
            JoinPathOutcome::NoPathFound { .. } => None,
        }
    }
}

/// Shortest join paths over a [`SchemaGraph`].
pub struct JoinPathResolver<'g> {
    graph: &'g SchemaGraph,
}

impl<'g> JoinPathResolver<'g> {
    pub fn new(graph: &'g SchemaGraph) -> Self {
        Self { graph }
    }

    /// Shortest path from `source` to `destination` using at most `max_hops`
    /// edges.
    ///
    /// `source == destination` yields an empty path. Endpoints missing from
    /// the graph fail with [`KnowledgeError::UnknownTable`].
    pub fn find_path(
        &self,
        source: &str,
        destination: &str,
        max_hops: usize,
    ) -> KnowledgeResult<JoinPathOutcome> {
        let source = normalize_ident(source);
        let destination = normalize_ident(destination);

        for endpoint in [&source, &destination] {
            if !self.graph.contains(endpoint) {
                return Err(KnowledgeError::UnknownTable(endpoint.clone()));
            }
        }

        if source == destination {
            return Ok(JoinPathOutcome::Found(JoinPath::empty(&source)));
        }

        let to_destination = self.graph.distances_from(&destination, max_hops);
        let Some(&total) = to_destination.get(source.as_str()) else {
            return Ok(JoinPathOutcome::NoPathFound {
                source,
                destination,
                max_hops,
            });
        };

        let mut steps = Vec::with_capacity(total);
        let mut current = source.clone();
        let mut remaining = total;
        while remaining > 0 {
            // Neighbours are pre-sorted, so the first one that is one hop
            // closer is the lexicographically smallest choice.
            let (next, edge) = self
                .graph
                .neighbors(&current)
                .find(|(n, _)| to_destination.get(n) == Some(&(remaining - 1)))
                .ok_or_else(|| KnowledgeError::UnknownTable(current.clone()))?;
            steps.push(JoinStep {
                from_table: current.clone(),
                to_table: next.to_string(),
                edge: edge.clone(),
            });
            current = next.to_string();
            remaining -= 1;
        }

        Ok(JoinPathOutcome::Found(JoinPath {
            source,
            destination,
            steps,
        }))
    }
}
