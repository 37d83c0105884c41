use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, CatalogProvider, Product, ProductId};
use crate::finder::{find_candidates, FinderScope};
use crate::graph::{GraphProvider, KnowledgeGraph, NodeKey};
use crate::scoring::{
    check_hard_constraints, rule_order, score_pair, Constraints, ExcludedCandidate, PairContext,
    ProductFacts, Reason, RejectionReason, RuleId, RuleWeights,
};
use crate::SubstituteError;

pub const RULESET_VERSION: &str = "substitute-ranking.v1";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RankingConfig {
    #[serde(default)]
    pub weights: RuleWeights,
    #[serde(default)]
    pub scope: FinderScope,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceSummary {
    pub product_id: ProductId,
    pub name: String,
    pub price: f64,
    pub stock: u32,
    pub in_stock: bool,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub attributes: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub rank: usize,
    pub product_id: ProductId,
    pub name: String,
    pub price: f64,
    pub stock: u32,
    pub score: u32,
    pub explanation: Vec<Reason>,
    /// Node keys linking the source to this candidate through the graph.
    pub path: Vec<NodeKey>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DeterminismMetadata {
    pub ruleset_version: String,
    pub snapshot_id: String,
    pub rule_order: Vec<RuleId>,
    pub tie_breakers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationPackage {
    pub source: SourceSummary,
    pub constraints: Constraints,
    pub config: RankingConfig,
    pub determinism: DeterminismMetadata,
    pub recommendations: Vec<Recommendation>,
    pub excluded: Vec<ExcludedCandidate>,
    pub ordering_trace: Vec<String>,
}

#[must_use]
pub fn default_tie_breakers() -> Vec<String> {
    vec!["score desc".to_string(), "price asc".to_string(), "product_id asc".to_string()]
}

struct ScoredCandidate<'a> {
    facts: ProductFacts<'a>,
    score: u32,
    reasons: Vec<Reason>,
}

impl ScoredCandidate<'_> {
    fn ranking_order(lhs: &Self, rhs: &Self) -> Ordering {
        rhs.score
            .cmp(&lhs.score)
            .then_with(|| lhs.facts.product.price.total_cmp(&rhs.facts.product.price))
            .then_with(|| lhs.facts.product.id.cmp(&rhs.facts.product.id))
    }
}

fn product_facts<'a, G>(graph: &G, product: &'a Product) -> ProductFacts<'a>
where
    G: GraphProvider + ?Sized,
{
    ProductFacts {
        product,
        category: graph.category_of(&product.id),
        brand: graph.brand_of(&product.id),
        attributes: graph.attributes_of(&product.id),
    }
}

/// Node keys linking source to candidate through the graph. Empty when only attribute tags
/// connect them.
fn relation_path(
    source: &ProductFacts<'_>,
    candidate: &ProductFacts<'_>,
    similar_categories: &BTreeSet<String>,
) -> Vec<NodeKey> {
    let from = NodeKey::product(&source.product.id);
    let to = NodeKey::product(&candidate.product.id);

    if let (Some(lhs), Some(rhs)) = (&source.category, &candidate.category) {
        if lhs == rhs {
            return vec![from, NodeKey::category(lhs), to];
        }
    }

    if let (Some(lhs), Some(rhs)) = (&source.brand, &candidate.brand) {
        if lhs == rhs {
            return vec![from, NodeKey::brand(lhs), to];
        }
    }

    if let (Some(lhs), Some(rhs)) = (&source.category, &candidate.category) {
        if similar_categories.contains(rhs) {
            return vec![from, NodeKey::category(lhs), NodeKey::category(rhs), to];
        }
    }

    Vec::new()
}

fn recommendation(
    index: usize,
    source: &ProductFacts<'_>,
    candidate: ScoredCandidate<'_>,
    similar_categories: &BTreeSet<String>,
) -> Recommendation {
    let path = relation_path(source, &candidate.facts, similar_categories);
    let product = candidate.facts.product;
    Recommendation {
        rank: index + 1,
        product_id: product.id.clone(),
        name: product.name.clone(),
        price: product.price,
        stock: product.stock,
        score: candidate.score,
        explanation: candidate.reasons,
        path,
    }
}

/// Rank explained substitutes for `source_id`.
///
/// The call is a pure function of its inputs. An empty `recommendations` list is a valid
/// outcome meaning no substitute survived the hard constraints.
///
/// # Errors
/// Returns [`SubstituteError::InvalidConstraint`] when `constraints` are malformed,
/// [`SubstituteError::NotFound`] when the source is not in the catalog (no candidate search
/// happens), or [`SubstituteError::Validation`] when the graph names a product the catalog
/// does not hold.
pub fn recommend_substitutes<C, G>(
    catalog: &C,
    graph: &G,
    source_id: &ProductId,
    constraints: &Constraints,
    config: &RankingConfig,
    snapshot_id: &str,
) -> Result<RecommendationPackage, SubstituteError>
where
    C: CatalogProvider + ?Sized,
    G: GraphProvider + ?Sized,
{
    constraints.validate()?;
    let source = product_facts(graph, catalog.get_product(source_id)?);

    let candidate_ids = find_candidates(graph, source_id, config.scope);
    let similar_categories = source
        .category
        .as_deref()
        .map(|category| graph.similar_categories(category))
        .unwrap_or_default();

    let mut survivors = Vec::new();
    let mut excluded = Vec::new();
    for candidate_id in &candidate_ids {
        let product = catalog.get_product(candidate_id).map_err(|_| {
            SubstituteError::Validation(format!(
                "graph references product {candidate_id} missing from the catalog"
            ))
        })?;
        let facts = product_facts(graph, product);

        if let Some(reason) = check_hard_constraints(&facts, constraints) {
            excluded.push(ExcludedCandidate::new(candidate_id.clone(), reason));
            continue;
        }

        let pair = PairContext {
            source: &source,
            candidate: &facts,
            similar_categories: &similar_categories,
        };
        let (score, reasons) = score_pair(&pair, &config.weights);
        if score == 0 {
            excluded.push(ExcludedCandidate::new(
                candidate_id.clone(),
                RejectionReason::NoRuleMatched,
            ));
            continue;
        }
        survivors.push(ScoredCandidate { facts, score, reasons });
    }

    survivors.sort_by(ScoredCandidate::ranking_order);
    let ranked_count = survivors.len();
    if let Some(limit) = constraints.limit {
        survivors.truncate(limit);
    }
    let recommendations = survivors
        .into_iter()
        .enumerate()
        .map(|(index, candidate)| recommendation(index, &source, candidate, &similar_categories))
        .collect::<Vec<_>>();

    tracing::debug!(
        source = %source_id,
        candidates = candidate_ids.len(),
        excluded = excluded.len(),
        ranked = ranked_count,
        returned = recommendations.len(),
        "substitute recommendation computed"
    );

    let mut ordering_trace = vec![
        "candidates: same category, one-hop similar categories, same brand".to_string(),
        "filter: in stock, required attributes, max price".to_string(),
        "score: ordered rule table, one pass".to_string(),
        "sort: score desc, price asc, product_id asc".to_string(),
    ];
    if config.scope.include_shared_attributes {
        ordering_trace.insert(1, "candidates: products sharing an attribute tag".to_string());
    }
    if let Some(limit) = constraints.limit {
        ordering_trace.push(format!("limit: top {limit}"));
    }

    Ok(RecommendationPackage {
        source: SourceSummary {
            product_id: source.product.id.clone(),
            name: source.product.name.clone(),
            price: source.product.price,
            stock: source.product.stock,
            in_stock: source.product.in_stock(),
            category: source.category.clone(),
            brand: source.brand.clone(),
            attributes: source.attributes.clone(),
        },
        constraints: constraints.clone(),
        config: *config,
        determinism: DeterminismMetadata {
            ruleset_version: RULESET_VERSION.to_string(),
            snapshot_id: snapshot_id.to_string(),
            rule_order: rule_order(),
            tie_breakers: default_tie_breakers(),
        },
        recommendations,
        excluded,
        ordering_trace,
    })
}

/// An immutable catalog and graph pair that queries run against.
#[derive(Debug, Clone)]
pub struct Snapshot {
    snapshot_id: String,
    catalog: Catalog,
    graph: KnowledgeGraph,
}

impl Snapshot {
    /// Bundle a catalog and graph after checking that every product node the graph
    /// connects is present in the catalog.
    ///
    /// # Errors
    /// Returns [`SubstituteError::Validation`] when `snapshot_id` is blank or the graph
    /// references unknown products.
    pub fn new(
        snapshot_id: impl Into<String>,
        catalog: Catalog,
        graph: KnowledgeGraph,
    ) -> Result<Self, SubstituteError> {
        let snapshot_id = snapshot_id.into();
        if snapshot_id.trim().is_empty() {
            return Err(SubstituteError::Validation(
                "snapshot_id MUST be provided for deterministic replay".to_string(),
            ));
        }

        for key in graph.connected_products() {
            if catalog.get(&ProductId::new(key.name())).is_none() {
                return Err(SubstituteError::Validation(format!(
                    "graph node {key} has no matching catalog product"
                )));
            }
        }

        Ok(Self { snapshot_id, catalog, graph })
    }

    #[must_use]
    pub fn snapshot_id(&self) -> &str {
        &self.snapshot_id
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    /// # Errors
    /// See [`recommend_substitutes`].
    pub fn recommend(
        &self,
        source_id: &ProductId,
        constraints: &Constraints,
        config: &RankingConfig,
    ) -> Result<RecommendationPackage, SubstituteError> {
        recommend_substitutes(
            &self.catalog,
            &self.graph,
            source_id,
            constraints,
            config,
            &self.snapshot_id,
        )
    }
}
