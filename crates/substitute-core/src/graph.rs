use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, ProductId};
use crate::SubstituteError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Product,
    Category,
    Brand,
    #[serde(rename = "attribute")]
    AttributeTag,
}

impl NodeKind {
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Product => "p",
            Self::Category => "cat",
            Self::Brand => "brand",
            Self::AttributeTag => "tag",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Category => "category",
            Self::Brand => "brand",
            Self::AttributeTag => "attribute",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "product" => Some(Self::Product),
            "category" => Some(Self::Category),
            "brand" => Some(Self::Brand),
            "attribute" | "tag" => Some(Self::AttributeTag),
            _ => None,
        }
    }

    fn from_prefix(value: &str) -> Option<Self> {
        match value {
            "p" => Some(Self::Product),
            "cat" => Some(Self::Category),
            "brand" => Some(Self::Brand),
            "tag" => Some(Self::AttributeTag),
            _ => None,
        }
    }
}

/// Namespaced node identity such as `p:p1`, `cat:dairy`, `brand:Amul`, or `tag:veg`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct NodeKey(String);

impl NodeKey {
    #[must_use]
    pub fn new(kind: NodeKind, name: &str) -> Self {
        Self(format!("{}:{name}", kind.prefix()))
    }

    #[must_use]
    pub fn product(id: &ProductId) -> Self {
        Self::new(NodeKind::Product, id.as_str())
    }

    #[must_use]
    pub fn category(name: &str) -> Self {
        Self::new(NodeKind::Category, name)
    }

    #[must_use]
    pub fn brand(name: &str) -> Self {
        Self::new(NodeKind::Brand, name)
    }

    #[must_use]
    pub fn tag(name: &str) -> Self {
        Self::new(NodeKind::AttributeTag, name)
    }

    /// Parse a namespaced key.
    ///
    /// # Errors
    /// Returns [`SubstituteError::Validation`] when the prefix is unknown or the name is empty.
    pub fn parse(raw: &str) -> Result<Self, SubstituteError> {
        let Some((prefix, name)) = raw.split_once(':') else {
            return Err(SubstituteError::Validation(format!(
                "node key MUST be namespaced as <prefix>:<name>, got {raw}"
            )));
        };
        if NodeKind::from_prefix(prefix).is_none() {
            return Err(SubstituteError::Validation(format!("unknown node key prefix: {raw}")));
        }
        if name.trim().is_empty() {
            return Err(SubstituteError::Validation(format!("node key name is empty: {raw}")));
        }
        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.0
            .split_once(':')
            .and_then(|(prefix, _)| NodeKind::from_prefix(prefix))
            .unwrap_or(NodeKind::AttributeTag)
    }

    /// The key without its namespace prefix.
    #[must_use]
    pub fn name(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, name)| name)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn product_id(&self) -> Option<ProductId> {
        (self.kind() == NodeKind::Product).then(|| ProductId::new(self.name()))
    }
}

impl Display for NodeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for NodeKey {
    type Error = SubstituteError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<NodeKey> for String {
    fn from(value: NodeKey) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RelationKind {
    #[serde(rename = "IS_A")]
    IsA,
    #[serde(rename = "HAS_BRAND")]
    HasBrand,
    #[serde(rename = "HAS_ATTRIBUTE")]
    HasAttribute,
    #[serde(rename = "SIMILAR_TO")]
    SimilarTo,
}

impl RelationKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IsA => "IS_A",
            Self::HasBrand => "HAS_BRAND",
            Self::HasAttribute => "HAS_ATTRIBUTE",
            Self::SimilarTo => "SIMILAR_TO",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IS_A" => Some(Self::IsA),
            "HAS_BRAND" => Some(Self::HasBrand),
            "HAS_ATTRIBUTE" => Some(Self::HasAttribute),
            "SIMILAR_TO" => Some(Self::SimilarTo),
            _ => None,
        }
    }

    /// Node kinds allowed at the (source, target) ends of this relation.
    #[must_use]
    pub fn endpoint_kinds(self) -> (NodeKind, NodeKind) {
        match self {
            Self::IsA => (NodeKind::Product, NodeKind::Category),
            Self::HasBrand => (NodeKind::Product, NodeKind::Brand),
            Self::HasAttribute => (NodeKind::Product, NodeKind::AttributeTag),
            Self::SimilarTo => (NodeKind::Category, NodeKind::Category),
        }
    }

    #[must_use]
    pub fn is_symmetric(self) -> bool {
        matches!(self, Self::SimilarTo)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Out,
    In,
    Either,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct GraphNode {
    pub key: NodeKey,
    #[serde(default)]
    pub name: Option<String>,
}

impl GraphNode {
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        self.key.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd)]
pub struct GraphEdge {
    pub source: NodeKey,
    pub target: NodeKey,
    pub relation: RelationKind,
}

/// Node declarations plus typed edges, the input a [`KnowledgeGraph`] is built from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct GraphDefinition {
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

impl GraphDefinition {
    /// Derive product, category, brand, and tag nodes plus their `IS_A`, `HAS_BRAND`, and
    /// `HAS_ATTRIBUTE` edges from catalog fields. No `SIMILAR_TO` edges are produced.
    #[must_use]
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let mut nodes: BTreeMap<NodeKey, GraphNode> = BTreeMap::new();
        let mut edges: BTreeSet<GraphEdge> = BTreeSet::new();

        let mut declare = |key: NodeKey, name: &str| {
            nodes
                .entry(key.clone())
                .or_insert_with(|| GraphNode { key, name: Some(name.to_string()) });
        };

        for product in catalog.iter() {
            let product_key = NodeKey::product(&product.id);
            declare(product_key.clone(), &product.name);

            if let Some(category) = product.category.as_deref() {
                let key = NodeKey::category(category);
                declare(key.clone(), category);
                edges.insert(GraphEdge {
                    source: product_key.clone(),
                    target: key,
                    relation: RelationKind::IsA,
                });
            }

            if let Some(brand) = product.brand.as_deref() {
                let key = NodeKey::brand(brand);
                declare(key.clone(), brand);
                edges.insert(GraphEdge {
                    source: product_key.clone(),
                    target: key,
                    relation: RelationKind::HasBrand,
                });
            }

            for tag in &product.tags {
                let key = NodeKey::tag(tag);
                declare(key.clone(), tag);
                edges.insert(GraphEdge {
                    source: product_key.clone(),
                    target: key,
                    relation: RelationKind::HasAttribute,
                });
            }
        }

        Self { nodes: nodes.into_values().collect(), edges: edges.into_iter().collect() }
    }
}

/// The graph query contract the finder and scoring engine consume.
pub trait GraphProvider {
    /// Node keys reachable through exactly one `relation` edge in `direction`.
    /// Symmetric relations ignore `direction`.
    fn neighbors(
        &self,
        key: &NodeKey,
        relation: RelationKind,
        direction: Direction,
    ) -> BTreeSet<NodeKey>;

    fn category_of(&self, product: &ProductId) -> Option<String> {
        first_name(self.neighbors(&NodeKey::product(product), RelationKind::IsA, Direction::Out))
    }

    fn brand_of(&self, product: &ProductId) -> Option<String> {
        first_name(self.neighbors(
            &NodeKey::product(product),
            RelationKind::HasBrand,
            Direction::Out,
        ))
    }

    fn attributes_of(&self, product: &ProductId) -> BTreeSet<String> {
        self.neighbors(&NodeKey::product(product), RelationKind::HasAttribute, Direction::Out)
            .iter()
            .map(|key| key.name().to_string())
            .collect()
    }

    /// Categories one `SIMILAR_TO` hop away, never including `category` itself.
    fn similar_categories(&self, category: &str) -> BTreeSet<String> {
        self.neighbors(&NodeKey::category(category), RelationKind::SimilarTo, Direction::Either)
            .iter()
            .map(|key| key.name().to_string())
            .filter(|name| name != category)
            .collect()
    }

    fn products_in_category(&self, category: &str) -> BTreeSet<ProductId> {
        products_among(self.neighbors(
            &NodeKey::category(category),
            RelationKind::IsA,
            Direction::In,
        ))
    }

    fn products_with_brand(&self, brand: &str) -> BTreeSet<ProductId> {
        products_among(self.neighbors(
            &NodeKey::brand(brand),
            RelationKind::HasBrand,
            Direction::In,
        ))
    }

    fn products_with_attribute(&self, tag: &str) -> BTreeSet<ProductId> {
        products_among(self.neighbors(
            &NodeKey::tag(tag),
            RelationKind::HasAttribute,
            Direction::In,
        ))
    }
}

fn first_name(keys: BTreeSet<NodeKey>) -> Option<String> {
    keys.into_iter().next().map(|key| key.name().to_string())
}

fn products_among(keys: BTreeSet<NodeKey>) -> BTreeSet<ProductId> {
    keys.iter().filter_map(NodeKey::product_id).collect()
}

type Adjacency = BTreeMap<NodeKey, BTreeMap<RelationKind, BTreeSet<NodeKey>>>;

/// Immutable adjacency index: node key → relation kind → neighbor keys, kept in both
/// directions.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    nodes: BTreeMap<NodeKey, GraphNode>,
    outgoing: Adjacency,
    incoming: Adjacency,
    edge_count: usize,
}

impl KnowledgeGraph {
    /// Build the adjacency index for one graph snapshot.
    ///
    /// # Errors
    /// Returns [`SubstituteError::Validation`] on duplicate node keys, edges that reference
    /// undeclared nodes, edges whose endpoint kinds do not fit the relation, and products
    /// with more than one `IS_A` or `HAS_BRAND` edge.
    pub fn build(definition: &GraphDefinition) -> Result<Self, SubstituteError> {
        let mut graph = Self::default();

        for node in &definition.nodes {
            if graph.nodes.insert(node.key.clone(), node.clone()).is_some() {
                return Err(SubstituteError::Validation(format!(
                    "duplicate node key: {}",
                    node.key
                )));
            }
        }

        for edge in &definition.edges {
            graph.insert_edge(edge)?;
        }

        for (key, relations) in &graph.outgoing {
            for relation in [RelationKind::IsA, RelationKind::HasBrand] {
                if relations.get(&relation).is_some_and(|targets| targets.len() > 1) {
                    return Err(SubstituteError::Validation(format!(
                        "product {key} MUST have at most one {} edge",
                        relation.as_str()
                    )));
                }
            }
        }

        tracing::debug!(
            nodes = graph.nodes.len(),
            edges = graph.edge_count,
            "knowledge graph built"
        );
        Ok(graph)
    }

    fn insert_edge(&mut self, edge: &GraphEdge) -> Result<(), SubstituteError> {
        for endpoint in [&edge.source, &edge.target] {
            if !self.nodes.contains_key(endpoint) {
                return Err(SubstituteError::Validation(format!(
                    "{} edge references undeclared node {endpoint}",
                    edge.relation.as_str()
                )));
            }
        }

        let (source_kind, target_kind) = edge.relation.endpoint_kinds();
        if edge.source.kind() != source_kind || edge.target.kind() != target_kind {
            return Err(SubstituteError::Validation(format!(
                "{} edge MUST connect {} -> {}, got {} -> {}",
                edge.relation.as_str(),
                source_kind.as_str(),
                target_kind.as_str(),
                edge.source,
                edge.target
            )));
        }

        let (source, target) = if edge.relation.is_symmetric() {
            if edge.source == edge.target {
                return Ok(());
            }
            // Symmetric edges are stored once, lowest key first.
            if edge.source < edge.target {
                (&edge.source, &edge.target)
            } else {
                (&edge.target, &edge.source)
            }
        } else {
            (&edge.source, &edge.target)
        };

        let inserted = self
            .outgoing
            .entry(source.clone())
            .or_default()
            .entry(edge.relation)
            .or_default()
            .insert(target.clone());
        self.incoming
            .entry(target.clone())
            .or_default()
            .entry(edge.relation)
            .or_default()
            .insert(source.clone());
        if inserted {
            self.edge_count += 1;
        }
        Ok(())
    }

    #[must_use]
    pub fn node(&self, key: &NodeKey) -> Option<&GraphNode> {
        self.nodes.get(key)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Product keys that take part in at least one edge.
    pub fn connected_products(&self) -> impl Iterator<Item = &NodeKey> {
        self.nodes.keys().filter(|key| {
            key.kind() == NodeKind::Product
                && (self.outgoing.contains_key(*key) || self.incoming.contains_key(*key))
        })
    }

    fn one_way(adjacency: &Adjacency, key: &NodeKey, relation: RelationKind) -> BTreeSet<NodeKey> {
        adjacency
            .get(key)
            .and_then(|relations| relations.get(&relation))
            .cloned()
            .unwrap_or_default()
    }
}

impl GraphProvider for KnowledgeGraph {
    fn neighbors(
        &self,
        key: &NodeKey,
        relation: RelationKind,
        direction: Direction,
    ) -> BTreeSet<NodeKey> {
        let direction = if relation.is_symmetric() { Direction::Either } else { direction };
        match direction {
            Direction::Out => Self::one_way(&self.outgoing, key, relation),
            Direction::In => Self::one_way(&self.incoming, key, relation),
            Direction::Either => {
                let mut keys = Self::one_way(&self.outgoing, key, relation);
                keys.extend(Self::one_way(&self.incoming, key, relation));
                keys
            }
        }
    }
}
