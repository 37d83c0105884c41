use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::ProductId;
use crate::graph::GraphProvider;

/// Which graph neighborhoods the finder walks besides category, similar categories, and
/// brand.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct FinderScope {
    #[serde(default)]
    pub include_shared_attributes: bool,
}

/// Enumerate products worth scoring as substitutes for `source`.
///
/// The result is a superset: products in the source category, products in categories one
/// `SIMILAR_TO` hop away, and products of the same brand, minus the source itself. A source
/// without a category or brand simply contributes nothing for that step.
#[must_use]
pub fn find_candidates<G>(graph: &G, source: &ProductId, scope: FinderScope) -> BTreeSet<ProductId>
where
    G: GraphProvider + ?Sized,
{
    let mut candidates = BTreeSet::new();

    if let Some(category) = graph.category_of(source) {
        candidates.extend(graph.products_in_category(&category));
        for similar in graph.similar_categories(&category) {
            candidates.extend(graph.products_in_category(&similar));
        }
    }

    if let Some(brand) = graph.brand_of(source) {
        candidates.extend(graph.products_with_brand(&brand));
    }

    if scope.include_shared_attributes {
        for tag in graph.attributes_of(source) {
            candidates.extend(graph.products_with_attribute(&tag));
        }
    }

    candidates.remove(source);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{
        GraphDefinition, GraphEdge, GraphNode, KnowledgeGraph, NodeKey, RelationKind,
    };

    fn key(raw: &str) -> NodeKey {
        match NodeKey::parse(raw) {
            Ok(key) => key,
            Err(err) => panic!("invalid fixture key {raw}: {err}"),
        }
    }

    fn fixture_graph() -> KnowledgeGraph {
        let nodes = [
            "p:milk", "p:toned", "p:soy", "p:ghee", "p:chips", "p:lonely", "cat:dairy",
            "cat:plant_milk", "cat:snacks", "brand:Amul", "brand:Lays", "tag:veg",
        ];
        let edges = [
            ("p:milk", RelationKind::IsA, "cat:dairy"),
            ("p:milk", RelationKind::HasBrand, "brand:Amul"),
            ("p:milk", RelationKind::HasAttribute, "tag:veg"),
            ("p:toned", RelationKind::IsA, "cat:dairy"),
            ("p:soy", RelationKind::IsA, "cat:plant_milk"),
            ("p:ghee", RelationKind::HasBrand, "brand:Amul"),
            ("p:chips", RelationKind::IsA, "cat:snacks"),
            ("p:chips", RelationKind::HasBrand, "brand:Lays"),
            ("p:chips", RelationKind::HasAttribute, "tag:veg"),
            ("cat:plant_milk", RelationKind::SimilarTo, "cat:dairy"),
        ];
        let definition = GraphDefinition {
            nodes: nodes.iter().map(|raw| GraphNode { key: key(raw), name: None }).collect(),
            edges: edges
                .iter()
                .map(|(source, relation, target)| GraphEdge {
                    source: key(source),
                    target: key(target),
                    relation: *relation,
                })
                .collect(),
        };
        match KnowledgeGraph::build(&definition) {
            Ok(graph) => graph,
            Err(err) => panic!("fixture graph should build: {err}"),
        }
    }

    fn ids(values: &[&str]) -> BTreeSet<ProductId> {
        values.iter().map(|value| ProductId::from(*value)).collect()
    }

    // Test IDs: TFIND-001
    #[test]
    fn finder_unions_category_similar_category_and_brand() {
        let graph = fixture_graph();
        let found = find_candidates(&graph, &ProductId::from("milk"), FinderScope::default());
        assert_eq!(found, ids(&["ghee", "soy", "toned"]));
    }

    // Test IDs: TFIND-002
    #[test]
    fn finder_reaches_back_across_similar_to_from_either_end() {
        let graph = fixture_graph();
        let found = find_candidates(&graph, &ProductId::from("soy"), FinderScope::default());
        assert_eq!(found, ids(&["milk", "toned"]));
    }

    // Test IDs: TFIND-003
    #[test]
    fn finder_tolerates_missing_category_and_brand() {
        let graph = fixture_graph();
        let brand_only = find_candidates(&graph, &ProductId::from("ghee"), FinderScope::default());
        assert_eq!(brand_only, ids(&["milk"]));

        let isolated = find_candidates(&graph, &ProductId::from("lonely"), FinderScope::default());
        assert!(isolated.is_empty());
        let unknown = find_candidates(&graph, &ProductId::from("nope"), FinderScope::default());
        assert!(unknown.is_empty());
    }

    // Test IDs: TFIND-004
    #[test]
    fn shared_attribute_scope_is_opt_in() {
        let graph = fixture_graph();
        let source = ProductId::from("milk");
        let default_scope = find_candidates(&graph, &source, FinderScope::default());
        assert!(!default_scope.contains(&ProductId::from("chips")));

        let widened =
            find_candidates(&graph, &source, FinderScope { include_shared_attributes: true });
        assert!(widened.contains(&ProductId::from("chips")));
        assert!(widened.is_superset(&default_scope));
        assert!(!widened.contains(&source));
    }
}
