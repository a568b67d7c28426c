//! Dependency detection, the dependency graph, and skip impact analysis.

pub mod detector;
pub mod graph;
pub mod impact;

pub use detector::DependencyDetector;
pub use graph::{DependencyEdge, DependencyGraph, DetectionMethod};
pub use impact::{CascadeReport, SkipImpact, SkipImpactAnalyzer, SkipRecommendation};

use crate::state::ProjectState;

/// Re-run detection over every feature and merge into the state's graph.
///
/// Returns the number of edges added or raised. Running twice on an
/// unchanged feature set adds nothing and never lowers a confidence.
pub fn rebuild_graph(state: &mut ProjectState, detector: &DependencyDetector) -> usize {
    let edges = detector.detect_all(state.features());
    state.graph.merge(edges)
}
