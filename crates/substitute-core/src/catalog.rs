use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::SubstituteError;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl ProductId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProductId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProductId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub price: f64,
    pub stock: u32,
}

impl Product {
    #[must_use]
    pub fn in_stock(&self) -> bool {
        self.stock > 0
    }

    /// Validate one catalog entry.
    ///
    /// # Errors
    /// Returns [`SubstituteError::Validation`] when the id is blank, the price is negative or
    /// not finite, or a provided category, brand, or tag is blank.
    pub fn validate(&self) -> Result<(), SubstituteError> {
        if self.id.as_str().trim().is_empty() {
            return Err(SubstituteError::Validation("product id MUST be non-empty".to_string()));
        }

        if !self.price.is_finite() || self.price < 0.0 {
            return Err(SubstituteError::Validation(format!(
                "product {} price MUST be a non-negative number, got {}",
                self.id, self.price
            )));
        }

        for (field, value) in [("category", &self.category), ("brand", &self.brand)] {
            if value.as_deref().is_some_and(|value| value.trim().is_empty()) {
                return Err(SubstituteError::Validation(format!(
                    "product {} {field} MUST be non-empty when provided",
                    self.id
                )));
            }
        }

        if self.tags.iter().any(|tag| tag.trim().is_empty()) {
            return Err(SubstituteError::Validation(format!(
                "product {} tags MUST be non-empty strings",
                self.id
            )));
        }

        Ok(())
    }
}

/// Read-only access to product records.
pub trait CatalogProvider {
    /// Look up one product by id.
    ///
    /// # Errors
    /// Returns [`SubstituteError::NotFound`] when the id is unknown.
    fn get_product(&self, id: &ProductId) -> Result<&Product, SubstituteError>;

    fn all_products(&self) -> Vec<&Product>;
}

/// In-memory product catalog keyed by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    products: BTreeMap<ProductId, Product>,
}

impl Catalog {
    /// Build a catalog from product records.
    ///
    /// # Errors
    /// Returns [`SubstituteError::Validation`] when any product is invalid or two products
    /// share an id.
    pub fn new(products: Vec<Product>) -> Result<Self, SubstituteError> {
        let mut by_id = BTreeMap::new();
        for mut product in products {
            product.validate()?;
            // Validated prices are non-negative, so only -0.0 carries a sign here.
            if product.price.is_sign_negative() {
                product.price = 0.0;
            }
            let id = product.id.clone();
            if by_id.insert(id.clone(), product).is_some() {
                return Err(SubstituteError::Validation(format!("duplicate product id: {id}")));
            }
        }
        Ok(Self { products: by_id })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &ProductId) -> Option<&Product> {
        self.products.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    /// Resolve free text to a product: exact id first, then the first product (by id)
    /// whose name contains the text case-insensitively.
    #[must_use]
    pub fn find(&self, query: &str) -> Option<&Product> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }

        if let Some(product) = self.products.get(&ProductId::from(query)) {
            return Some(product);
        }

        let needle = query.to_lowercase();
        self.products.values().find(|product| product.name.to_lowercase().contains(&needle))
    }
}

impl CatalogProvider for Catalog {
    fn get_product(&self, id: &ProductId) -> Result<&Product, SubstituteError> {
        self.products
            .get(id)
            .ok_or_else(|| SubstituteError::NotFound(format!("product {id} is not in the catalog")))
    }

    fn all_products(&self) -> Vec<&Product> {
        self.products.values().collect()
    }
}
