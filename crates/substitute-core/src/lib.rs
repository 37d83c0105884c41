//! Substitute recommendation engine over a small product knowledge graph.
//!
//! The crate is pure and synchronous: callers hand in an immutable catalog and graph
//! (usually bundled as a [`Snapshot`]) and receive a ranked, explained
//! [`RecommendationPackage`]. Nothing here performs I/O or keeps state between calls.

mod catalog;
mod engine;
mod finder;
mod graph;
mod scoring;

pub use catalog::{Catalog, CatalogProvider, Product, ProductId};
pub use engine::{
    default_tie_breakers, recommend_substitutes, DeterminismMetadata, RankingConfig,
    Recommendation, RecommendationPackage, Snapshot, SourceSummary, RULESET_VERSION,
};
pub use finder::{find_candidates, FinderScope};
pub use graph::{
    Direction, GraphDefinition, GraphEdge, GraphNode, GraphProvider, KnowledgeGraph, NodeKey,
    NodeKind, RelationKind,
};
pub use scoring::{Constraints, ExcludedCandidate, Reason, RejectionReason, RuleId, RuleWeights};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum SubstituteError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid constraint: {0}")]
    InvalidConstraint(String),
    #[error("validation error: {0}")]
    Validation(String),
}
