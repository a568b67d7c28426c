//! Directed "depends-on" graph between features.

use std::fmt;

use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::feature::FeatureId;

/// How an edge was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    ExplicitId,
    Keyword,
    Category,
}

impl fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DetectionMethod::ExplicitId => "explicit_id",
            DetectionMethod::Keyword => "keyword",
            DetectionMethod::Category => "category",
        };
        f.write_str(label)
    }
}

/// `feature` depends on `depends_on`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub feature: FeatureId,
    pub depends_on: FeatureId,
    pub confidence: f64,
    pub detected_method: DetectionMethod,
}

impl DependencyEdge {
    pub fn new(
        feature: FeatureId,
        depends_on: FeatureId,
        confidence: f64,
        detected_method: DetectionMethod,
    ) -> Self {
        Self {
            feature,
            depends_on,
            confidence,
            detected_method,
        }
    }

    /// Visual confidence indicator used by `show-dependencies`.
    pub fn confidence_indicator(&self) -> &'static str {
        if self.confidence >= 0.9 {
            "●●●"
        } else if self.confidence >= 0.7 {
            "●●○"
        } else {
            "●○○"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct EdgeInfo {
    confidence: f64,
    method: DetectionMethod,
}

/// Dependency graph keyed by feature id. Edge direction is dependent -> dependency.
///
/// At most one edge exists per (feature, dependency) pair; re-adding a pair
/// keeps whichever confidence is higher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<DependencyEdge>", into = "Vec<DependencyEdge>")]
pub struct DependencyGraph {
    graph: DiGraphMap<FeatureId, EdgeInfo>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge, or raise the confidence of an existing one.
    ///
    /// Returns `true` if the graph changed. Self-edges are ignored.
    pub fn upsert(&mut self, edge: DependencyEdge) -> bool {
        if edge.feature == edge.depends_on {
            return false;
        }
        if let Some(existing) = self.graph.edge_weight(edge.feature, edge.depends_on) {
            if existing.confidence >= edge.confidence {
                return false;
            }
        }
        self.graph.add_edge(
            edge.feature,
            edge.depends_on,
            EdgeInfo {
                confidence: edge.confidence,
                method: edge.detected_method,
            },
        );
        true
    }

    /// Merge a batch of edges. Returns how many edges were added or raised.
    pub fn merge(&mut self, edges: impl IntoIterator<Item = DependencyEdge>) -> usize {
        let mut changed = 0;
        for edge in edges {
            if self.upsert(edge) {
                changed += 1;
            }
        }
        changed
    }

    pub fn remove_feature(&mut self, id: FeatureId) {
        self.graph.remove_node(id);
    }

    pub fn edge(&self, feature: FeatureId, depends_on: FeatureId) -> Option<DependencyEdge> {
        self.graph
            .edge_weight(feature, depends_on)
            .map(|info| DependencyEdge::new(feature, depends_on, info.confidence, info.method))
    }

    /// Edges from `id` to what it depends on, highest confidence first.
    pub fn dependencies(&self, id: FeatureId) -> Vec<DependencyEdge> {
        self.collect_direction(id, Direction::Outgoing)
    }

    /// Edges into `id` from features that depend on it, highest confidence first.
    pub fn dependents(&self, id: FeatureId) -> Vec<DependencyEdge> {
        self.collect_direction(id, Direction::Incoming)
    }

    fn collect_direction(&self, id: FeatureId, direction: Direction) -> Vec<DependencyEdge> {
        if !self.graph.contains_node(id) {
            return Vec::new();
        }
        let mut edges: Vec<DependencyEdge> = self
            .graph
            .neighbors_directed(id, direction)
            .filter_map(|other| match direction {
                Direction::Outgoing => self.edge(id, other),
                Direction::Incoming => self.edge(other, id),
            })
            .collect();
        edges.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.feature.cmp(&b.feature))
                .then_with(|| a.depends_on.cmp(&b.depends_on))
        });
        edges
    }

    /// All edges, ordered by (feature, depends_on).
    pub fn edges(&self) -> Vec<DependencyEdge> {
        let mut edges: Vec<DependencyEdge> = self
            .graph
            .all_edges()
            .map(|(from, to, info)| DependencyEdge::new(from, to, info.confidence, info.method))
            .collect();
        edges.sort_by(|a, b| {
            a.feature
                .cmp(&b.feature)
                .then_with(|| a.depends_on.cmp(&b.depends_on))
        });
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.edge_count() == 0
    }
}

impl From<Vec<DependencyEdge>> for DependencyGraph {
    fn from(edges: Vec<DependencyEdge>) -> Self {
        let mut graph = DependencyGraph::new();
        graph.merge(edges);
        graph
    }
}

impl From<DependencyGraph> for Vec<DependencyEdge> {
    fn from(graph: DependencyGraph) -> Self {
        graph.edges()
    }
}
