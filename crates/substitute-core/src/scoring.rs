use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::catalog::{Product, ProductId};
use crate::SubstituteError;

/// Per-query hard constraints. In-stock is always enforced and has no switch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Constraints {
    #[serde(default)]
    pub required_attributes: BTreeSet<String>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Constraints {
    /// # Errors
    /// Returns [`SubstituteError::InvalidConstraint`] for a negative or non-finite
    /// `max_price`, a zero `limit`, or a blank required attribute.
    pub fn validate(&self) -> Result<(), SubstituteError> {
        if let Some(max_price) = self.max_price {
            if !max_price.is_finite() || max_price < 0.0 {
                return Err(SubstituteError::InvalidConstraint(format!(
                    "max_price MUST be a non-negative number, got {max_price}"
                )));
            }
        }

        if self.limit == Some(0) {
            return Err(SubstituteError::InvalidConstraint(
                "limit MUST be >= 1 when provided".to_string(),
            ));
        }

        if self.required_attributes.iter().any(|tag| tag.trim().is_empty()) {
            return Err(SubstituteError::InvalidConstraint(
                "required attributes MUST be non-empty strings".to_string(),
            ));
        }

        Ok(())
    }
}

/// Points awarded per rule. Defaults follow the published rule table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RuleWeights {
    pub same_category_same_brand: u32,
    pub same_category: u32,
    pub same_brand: u32,
    pub similar_category: u32,
    pub attribute_match: u32,
    pub cheaper_bonus: u32,
    pub in_stock_bonus: u32,
}

impl Default for RuleWeights {
    fn default() -> Self {
        Self {
            same_category_same_brand: 4,
            same_category: 2,
            same_brand: 1,
            similar_category: 1,
            attribute_match: 1,
            cheaper_bonus: 1,
            in_stock_bonus: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RuleId {
    SameCategorySameBrand,
    SameCategory,
    SameBrand,
    SimilarCategory,
    AttributeMatch,
    CheaperOrEqual,
    InStock,
}

impl RuleId {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SameCategorySameBrand => "same_category_same_brand",
            Self::SameCategory => "same_category",
            Self::SameBrand => "same_brand",
            Self::SimilarCategory => "similar_category",
            Self::AttributeMatch => "attribute_match",
            Self::CheaperOrEqual => "cheaper_or_equal",
            Self::InStock => "in_stock",
        }
    }
}

/// One fired rule with the points it contributed.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Reason {
    pub rule: RuleId,
    pub description: String,
    pub points: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectionReason {
    OutOfStock,
    MissingRequiredAttributes { missing: Vec<String> },
    ExceedsMaxPrice { price: f64, max_price: f64 },
    NoRuleMatched,
}

impl RejectionReason {
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::OutOfStock => "out of stock".to_string(),
            Self::MissingRequiredAttributes { missing } => {
                format!("missing required attributes [{}]", missing.join(", "))
            }
            Self::ExceedsMaxPrice { price, max_price } => {
                format!("price {price} exceeds max_price {max_price}")
            }
            Self::NoRuleMatched => "no scoring rule awarded points".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExcludedCandidate {
    pub product_id: ProductId,
    pub reason: RejectionReason,
    pub description: String,
}

impl ExcludedCandidate {
    pub(crate) fn new(product_id: ProductId, reason: RejectionReason) -> Self {
        let description = reason.describe();
        Self { product_id, reason, description }
    }
}

/// Relational facts about one product as seen through the graph, plus catalog fields.
#[derive(Debug, Clone)]
pub(crate) struct ProductFacts<'a> {
    pub product: &'a Product,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub attributes: BTreeSet<String>,
}

pub(crate) struct PairContext<'a> {
    pub source: &'a ProductFacts<'a>,
    pub candidate: &'a ProductFacts<'a>,
    pub similar_categories: &'a BTreeSet<String>,
}

impl PairContext<'_> {
    fn same_category(&self) -> Option<&str> {
        match (&self.source.category, &self.candidate.category) {
            (Some(lhs), Some(rhs)) if lhs == rhs => Some(lhs.as_str()),
            _ => None,
        }
    }

    fn same_brand(&self) -> Option<&str> {
        match (&self.source.brand, &self.candidate.brand) {
            (Some(lhs), Some(rhs)) if lhs == rhs => Some(lhs.as_str()),
            _ => None,
        }
    }
}

struct ScoringRule {
    id: RuleId,
    weight: fn(&RuleWeights) -> u32,
    /// One description per hit; most rules hit at most once.
    hits: fn(&PairContext<'_>) -> Vec<String>,
}

const SCORING_RULES: [ScoringRule; 7] = [
    ScoringRule {
        id: RuleId::SameCategorySameBrand,
        weight: |weights| weights.same_category_same_brand,
        hits: |pair| match (pair.same_category(), pair.same_brand()) {
            (Some(category), Some(brand)) => {
                vec![format!("Same category ({category}) and same brand ({brand})")]
            }
            _ => Vec::new(),
        },
    },
    ScoringRule {
        id: RuleId::SameCategory,
        weight: |weights| weights.same_category,
        hits: |pair| match (pair.same_category(), pair.same_brand()) {
            (Some(category), None) => vec![format!("Same category ({category})")],
            _ => Vec::new(),
        },
    },
    ScoringRule {
        id: RuleId::SameBrand,
        weight: |weights| weights.same_brand,
        hits: |pair| match (pair.same_category(), pair.same_brand()) {
            (None, Some(brand)) => vec![format!("Same brand ({brand})")],
            _ => Vec::new(),
        },
    },
    ScoringRule {
        id: RuleId::SimilarCategory,
        weight: |weights| weights.similar_category,
        hits: |pair| match pair.candidate.category.as_deref() {
            Some(category) if pair.similar_categories.contains(category) => {
                vec![format!("Category {category} is similar to the original's category")]
            }
            _ => Vec::new(),
        },
    },
    ScoringRule {
        id: RuleId::AttributeMatch,
        weight: |weights| weights.attribute_match,
        hits: |pair| {
            pair.source
                .attributes
                .intersection(&pair.candidate.attributes)
                .map(|tag| format!("Shares attribute {tag}"))
                .collect()
        },
    },
    ScoringRule {
        id: RuleId::CheaperOrEqual,
        weight: |weights| weights.cheaper_bonus,
        hits: |pair| {
            if pair.candidate.product.price <= pair.source.product.price {
                vec!["Cheaper or equal price than original".to_string()]
            } else {
                Vec::new()
            }
        },
    },
    ScoringRule {
        id: RuleId::InStock,
        weight: |weights| weights.in_stock_bonus,
        hits: |pair| {
            if pair.candidate.product.in_stock() {
                vec!["Available (in stock)".to_string()]
            } else {
                Vec::new()
            }
        },
    },
];

/// Rule ids in evaluation order, which is also explanation order.
#[must_use]
pub fn rule_order() -> Vec<RuleId> {
    SCORING_RULES.iter().map(|rule| rule.id).collect()
}

/// Evaluate every rule once; the returned score is the sum of the returned reasons.
pub(crate) fn score_pair(pair: &PairContext<'_>, weights: &RuleWeights) -> (u32, Vec<Reason>) {
    let mut score = 0_u32;
    let mut reasons = Vec::new();
    for rule in &SCORING_RULES {
        let points = (rule.weight)(weights);
        for description in (rule.hits)(pair) {
            score = score.saturating_add(points);
            reasons.push(Reason { rule: rule.id, description, points });
        }
    }
    (score, reasons)
}

/// First failing hard constraint, if any. Checked in order: stock, attributes, price.
pub(crate) fn check_hard_constraints(
    candidate: &ProductFacts<'_>,
    constraints: &Constraints,
) -> Option<RejectionReason> {
    if !candidate.product.in_stock() {
        return Some(RejectionReason::OutOfStock);
    }

    let missing = constraints
        .required_attributes
        .difference(&candidate.attributes)
        .cloned()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return Some(RejectionReason::MissingRequiredAttributes { missing });
    }

    if let Some(max_price) = constraints.max_price {
        if candidate.product.price > max_price {
            return Some(RejectionReason::ExceedsMaxPrice {
                price: candidate.product.price,
                max_price,
            });
        }
    }

    None
}
