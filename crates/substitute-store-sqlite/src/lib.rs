use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use substitute_core::{
    Catalog, GraphDefinition, GraphEdge, GraphNode, KnowledgeGraph, NodeKey, NodeKind, Product,
    ProductId, RelationKind, SubstituteError,
};
use tempfile::NamedTempFile;
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 1;

pub const CATALOG_FILE_NAME: &str = "products.json";
pub const GRAPH_FILE_NAME: &str = "kg.json";
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS products (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  category TEXT,
  brand TEXT,
  price REAL NOT NULL CHECK (price >= 0),
  stock INTEGER NOT NULL CHECK (stock >= 0)
);

CREATE TABLE IF NOT EXISTS product_tags (
  product_id TEXT NOT NULL,
  tag TEXT NOT NULL,
  PRIMARY KEY (product_id, tag),
  FOREIGN KEY (product_id) REFERENCES products(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS graph_nodes (
  node_key TEXT PRIMARY KEY,
  kind TEXT NOT NULL CHECK (kind IN ('product','category','brand','attribute')),
  name TEXT
);

CREATE TABLE IF NOT EXISTS graph_edges (
  source_key TEXT NOT NULL,
  target_key TEXT NOT NULL,
  relation TEXT NOT NULL CHECK (relation IN ('IS_A','HAS_BRAND','HAS_ATTRIBUTE','SIMILAR_TO')),
  PRIMARY KEY (source_key, target_key, relation),
  FOREIGN KEY (source_key) REFERENCES graph_nodes(node_key) ON DELETE CASCADE,
  FOREIGN KEY (target_key) REFERENCES graph_nodes(node_key) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_products_category ON products(category);
CREATE INDEX IF NOT EXISTS idx_graph_edges_target ON graph_edges(target_key, relation);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub products: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportFileDigest {
    pub path: String,
    pub sha256: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub schema_version: i64,
    pub exported_at: String,
    pub files: Vec<ExportFileDigest>,
}

impl SqliteStore {
    /// Open a SQLite-backed catalog store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when bootstrapping or a migration step fails, or when the database
    /// reports a newer schema than this build understands.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let version = current_schema_version(&self.conn)?;
        if version > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected at most {LATEST_SCHEMA_VERSION}"
            ));
        }

        if version < 1 {
            let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
            tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
            record_schema_version(&tx, 1)?;
            tx.commit().context("failed to commit migration v1")?;
            tracing::info!(version = 1, "applied catalog schema migration");
        }

        Ok(())
    }

    /// Replace every product and tag row with `products` in one transaction.
    ///
    /// # Errors
    /// Returns a [`SubstituteError::Validation`] (through `anyhow`) when the products do
    /// not form a valid catalog, or an error when any write fails. Nothing is written on
    /// error.
    pub fn replace_catalog(&mut self, products: Vec<Product>) -> Result<usize> {
        let catalog = Catalog::new(products)?;
        let tx = self.conn.transaction().context("failed to start catalog transaction")?;
        write_catalog_rows(&tx, &catalog)?;
        tx.commit().context("failed to commit catalog transaction")?;

        tracing::info!(products = catalog.len(), "catalog replaced");
        Ok(catalog.len())
    }

    /// Replace every graph node and edge in one transaction.
    ///
    /// # Errors
    /// Returns a [`SubstituteError::Validation`] (through `anyhow`) when the definition does
    /// not build into a graph, or an error when any write fails.
    pub fn replace_graph(&mut self, definition: &GraphDefinition) -> Result<(usize, usize)> {
        KnowledgeGraph::build(definition)?;
        let tx = self.conn.transaction().context("failed to start graph transaction")?;
        let counts = write_graph_rows(&tx, definition)?;
        tx.commit().context("failed to commit graph transaction")?;

        tracing::info!(nodes = counts.0, edges = counts.1, "knowledge graph replaced");
        Ok(counts)
    }

    /// Replace catalog and graph together so readers never see one without the other.
    ///
    /// # Errors
    /// Returns an error when either input fails validation, when the graph names products
    /// missing from `products`, or when any write fails.
    pub fn replace_all(
        &mut self,
        products: Vec<Product>,
        definition: &GraphDefinition,
    ) -> Result<ImportSummary> {
        let catalog = Catalog::new(products)?;
        let graph = KnowledgeGraph::build(definition)?;
        for key in graph.connected_products() {
            if catalog.get(&ProductId::new(key.name())).is_none() {
                return Err(SubstituteError::Validation(format!(
                    "graph node {key} has no matching catalog product"
                ))
                .into());
            }
        }

        let tx = self.conn.transaction().context("failed to start import transaction")?;
        write_catalog_rows(&tx, &catalog)?;
        let (graph_nodes, graph_edges) = write_graph_rows(&tx, definition)?;
        tx.commit().context("failed to commit import transaction")?;

        let summary = ImportSummary { products: catalog.len(), graph_nodes, graph_edges };
        tracing::info!(
            products = summary.products,
            nodes = summary.graph_nodes,
            edges = summary.graph_edges,
            "catalog and knowledge graph imported"
        );
        Ok(summary)
    }

    /// Load every product with its tags, ordered by id.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn list_products(&self) -> Result<Vec<Product>> {
        let mut tags_by_product: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT product_id, tag FROM product_tags ORDER BY product_id ASC, tag ASC",
            )?;
            let rows =
                stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
            for row in rows {
                let (product_id, tag) = row?;
                tags_by_product.entry(product_id).or_default().insert(tag);
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT id, name, category, brand, price, stock FROM products ORDER BY id ASC",
        )?;
        let mut rows = stmt.query([])?;
        let mut products = Vec::new();

        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let tags = tags_by_product.remove(&id).unwrap_or_default();
            products.push(product_from_row(row, id, tags)?);
        }

        Ok(products)
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn get_product(&self, id: &ProductId) -> Result<Option<Product>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, category, brand, price, stock FROM products WHERE id = ?1")?;
        let mut rows = stmt.query(params![id.as_str()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let raw_id: String = row.get(0)?;
        let tags = self.product_tags(id)?;
        Ok(Some(product_from_row(row, raw_id, tags)?))
    }

    fn product_tags(&self, id: &ProductId) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT tag FROM product_tags WHERE product_id = ?1 ORDER BY tag ASC")?;
        let rows = stmt.query_map(params![id.as_str()], |row| row.get::<_, String>(0))?;
        let mut tags = BTreeSet::new();
        for row in rows {
            tags.insert(row?);
        }
        Ok(tags)
    }

    /// Load and validate the persisted catalog.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or the stored rows fail validation.
    pub fn load_catalog(&self) -> Result<Catalog> {
        let catalog = Catalog::new(self.list_products()?)?;
        Ok(catalog)
    }

    /// Load graph nodes and edges in key order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or a stored key or relation is malformed.
    pub fn load_graph_definition(&self) -> Result<GraphDefinition> {
        let mut definition = GraphDefinition::default();

        {
            let mut stmt = self
                .conn
                .prepare("SELECT node_key, name FROM graph_nodes ORDER BY node_key ASC")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let raw: String = row.get(0)?;
                let key = NodeKey::parse(&raw)
                    .with_context(|| format!("invalid node key stored in graph_nodes: {raw}"))?;
                definition.nodes.push(GraphNode { key, name: row.get(1)? });
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT source_key, target_key, relation FROM graph_edges
             ORDER BY source_key ASC, target_key ASC, relation ASC",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let source_raw: String = row.get(0)?;
            let target_raw: String = row.get(1)?;
            let relation_raw: String = row.get(2)?;
            definition.edges.push(GraphEdge {
                source: NodeKey::parse(&source_raw)
                    .with_context(|| format!("invalid edge source stored: {source_raw}"))?,
                target: NodeKey::parse(&target_raw)
                    .with_context(|| format!("invalid edge target stored: {target_raw}"))?,
                relation: RelationKind::parse(&relation_raw)
                    .ok_or_else(|| anyhow!("unknown relation stored: {relation_raw}"))?,
            });
        }

        tracing::debug!(
            nodes = definition.nodes.len(),
            edges = definition.edges.len(),
            "graph definition loaded"
        );
        Ok(definition)
    }

    /// Set one product's stock quantity and return the updated product.
    ///
    /// # Errors
    /// Returns a [`SubstituteError::NotFound`] (through `anyhow`) when the product does not
    /// exist, or an error when the update fails.
    pub fn set_stock(&mut self, id: &ProductId, quantity: u32) -> Result<Product> {
        let updated = self
            .conn
            .execute(
                "UPDATE products SET stock = ?1 WHERE id = ?2",
                params![i64::from(quantity), id.as_str()],
            )
            .with_context(|| format!("failed to update stock for product {id}"))?;

        if updated == 0 {
            return Err(
                SubstituteError::NotFound(format!("product {id} is not in the catalog")).into()
            );
        }

        tracing::info!(product_id = %id, quantity, "stock updated");
        self.get_product(id)?
            .ok_or_else(|| anyhow!("product {id} disappeared after stock update"))
    }

    /// Whether any graph nodes are stored.
    ///
    /// # Errors
    /// Returns an error when the count query fails.
    pub fn has_graph(&self) -> Result<bool> {
        let exists = self
            .conn
            .query_row("SELECT EXISTS(SELECT 1 FROM graph_nodes)", [], |row| row.get::<_, i64>(0))
            .context("failed to check for stored graph nodes")?;
        Ok(exists == 1)
    }

    /// Export catalog and graph as JSON interchange files plus a digest manifest.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or files cannot be written.
    pub fn export_snapshot(&self, out_dir: &Path) -> Result<ExportManifest> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create export directory {}", out_dir.display()))?;

        let products = self.list_products()?;
        let definition = self.load_graph_definition()?;

        let catalog_digest = write_catalog_json(&out_dir.join(CATALOG_FILE_NAME), &products)?;
        let graph_digest = write_graph_json(&out_dir.join(GRAPH_FILE_NAME), &definition)?;

        let manifest = ExportManifest {
            schema_version: LATEST_SCHEMA_VERSION,
            exported_at: now_rfc3339()?,
            files: vec![
                ExportFileDigest {
                    path: CATALOG_FILE_NAME.to_string(),
                    sha256: catalog_digest,
                    records: products.len(),
                },
                ExportFileDigest {
                    path: GRAPH_FILE_NAME.to_string(),
                    sha256: graph_digest,
                    records: definition.nodes.len() + definition.edges.len(),
                },
            ],
        };
        write_json_atomic(&out_dir.join(MANIFEST_FILE_NAME), &manifest)?;

        tracing::info!(dir = %out_dir.display(), products = products.len(), "catalog exported");
        Ok(manifest)
    }
}

fn write_catalog_rows(conn: &Connection, catalog: &Catalog) -> Result<()> {
    conn.execute("DELETE FROM product_tags", []).context("failed to clear product_tags")?;
    conn.execute("DELETE FROM products", []).context("failed to clear products")?;

    let mut product_stmt = conn.prepare(
        "INSERT INTO products(id, name, category, brand, price, stock)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    let mut tag_stmt = conn.prepare("INSERT INTO product_tags(product_id, tag) VALUES (?1, ?2)")?;

    for product in catalog.iter() {
        product_stmt
            .execute(params![
                product.id.as_str(),
                product.name,
                product.category,
                product.brand,
                product.price,
                i64::from(product.stock),
            ])
            .with_context(|| format!("failed to insert product {}", product.id))?;
        for tag in &product.tags {
            tag_stmt
                .execute(params![product.id.as_str(), tag])
                .with_context(|| format!("failed to insert tag {tag} for product {}", product.id))?;
        }
    }

    Ok(())
}

fn write_graph_rows(conn: &Connection, definition: &GraphDefinition) -> Result<(usize, usize)> {
    conn.execute("DELETE FROM graph_edges", []).context("failed to clear graph_edges")?;
    conn.execute("DELETE FROM graph_nodes", []).context("failed to clear graph_nodes")?;

    let mut node_stmt =
        conn.prepare("INSERT INTO graph_nodes(node_key, kind, name) VALUES (?1, ?2, ?3)")?;
    for node in &definition.nodes {
        node_stmt
            .execute(params![node.key.as_str(), node.kind().as_str(), node.name])
            .with_context(|| format!("failed to insert graph node {}", node.key))?;
    }

    let mut edge_stmt = conn.prepare(
        "INSERT OR IGNORE INTO graph_edges(source_key, target_key, relation) VALUES (?1, ?2, ?3)",
    )?;
    let mut edges = 0_usize;
    for edge in &definition.edges {
        edges += edge_stmt
            .execute(params![edge.source.as_str(), edge.target.as_str(), edge.relation.as_str()])
            .with_context(|| {
                format!(
                    "failed to insert {} edge {} -> {}",
                    edge.relation.as_str(),
                    edge.source,
                    edge.target
                )
            })?;
    }

    Ok((definition.nodes.len(), edges))
}

fn product_from_row(
    row: &rusqlite::Row<'_>,
    id: String,
    tags: BTreeSet<String>,
) -> Result<Product> {
    let stock_raw: i64 = row.get(5)?;
    let stock = u32::try_from(stock_raw)
        .with_context(|| format!("stock {stock_raw} for product {id} is out of range"))?;
    Ok(Product {
        id: ProductId::new(id),
        name: row.get(1)?,
        category: row.get(2)?,
        brand: row.get(3)?,
        tags,
        price: row.get(4)?,
        stock,
    })
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

/// One product as it appears in a `products.json` interchange file.
#[derive(Debug, Clone, Deserialize)]
struct CatalogEntry {
    id: String,
    name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    brand: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    price: f64,
    #[serde(default)]
    stock: u32,
}

impl From<CatalogEntry> for Product {
    fn from(entry: CatalogEntry) -> Self {
        Self {
            id: ProductId::new(entry.id),
            name: entry.name,
            category: entry.category,
            brand: entry.brand,
            tags: entry.tags.unwrap_or_default().into_iter().collect(),
            price: entry.price,
            stock: entry.stock,
        }
    }
}

/// Wire shape of a `kg.json` interchange file. Product nodes use raw product ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphFile {
    #[serde(default)]
    pub nodes: Vec<GraphFileNode>,
    #[serde(default)]
    pub edges: Vec<GraphFileEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphFileNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GraphFileEdge {
    pub source: String,
    pub target: String,
    pub relation: RelationKind,
}

impl GraphFile {
    /// Resolve file ids to namespaced node keys.
    ///
    /// # Errors
    /// Returns an error when a node id carries a prefix that contradicts its type, or an edge
    /// endpoint is neither a declared id nor a well-formed node key.
    pub fn into_definition(self) -> Result<GraphDefinition> {
        let mut keys_by_id: BTreeMap<String, NodeKey> = BTreeMap::new();
        let mut definition = GraphDefinition::default();

        for node in self.nodes {
            let key = file_id_to_key(&node.id, node.kind)?;
            keys_by_id.insert(node.id, key.clone());
            definition.nodes.push(GraphNode { key, name: node.name });
        }

        let resolve = |raw: &str| -> Result<NodeKey> {
            match keys_by_id.get(raw) {
                Some(key) => Ok(key.clone()),
                None => NodeKey::parse(raw)
                    .with_context(|| format!("edge endpoint {raw} is not a declared node id")),
            }
        };
        for edge in self.edges {
            definition.edges.push(GraphEdge {
                source: resolve(&edge.source)?,
                target: resolve(&edge.target)?,
                relation: edge.relation,
            });
        }

        Ok(definition)
    }

    #[must_use]
    pub fn from_definition(definition: &GraphDefinition) -> Self {
        Self {
            nodes: definition
                .nodes
                .iter()
                .map(|node| GraphFileNode {
                    id: key_to_file_id(&node.key),
                    kind: node.kind(),
                    name: node.name.clone(),
                })
                .collect(),
            edges: definition
                .edges
                .iter()
                .map(|edge| GraphFileEdge {
                    source: key_to_file_id(&edge.source),
                    target: key_to_file_id(&edge.target),
                    relation: edge.relation,
                })
                .collect(),
        }
    }
}

fn file_id_to_key(raw: &str, kind: NodeKind) -> Result<NodeKey> {
    if raw.trim().is_empty() {
        return Err(anyhow!("graph node id MUST be non-empty"));
    }
    if raw.starts_with(&format!("{}:", kind.prefix())) {
        return NodeKey::parse(raw).with_context(|| format!("invalid graph node id {raw}"));
    }
    if kind != NodeKind::Product && NodeKey::parse(raw).is_ok() {
        return Err(anyhow!(
            "graph node {raw} is declared as {} but carries another prefix",
            kind.as_str()
        ));
    }
    Ok(NodeKey::new(kind, raw))
}

fn key_to_file_id(key: &NodeKey) -> String {
    if key.kind() == NodeKind::Product {
        key.name().to_string()
    } else {
        key.as_str().to_string()
    }
}

fn read_json_bytes(path: &Path) -> Result<Vec<u8>> {
    let mut bytes =
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        bytes.drain(..3);
    }
    Ok(bytes)
}

/// Read a `products.json` array. A leading UTF-8 byte order mark is ignored, and missing
/// `category`, `brand`, `tags`, or `stock` fields take empty defaults.
///
/// # Errors
/// Returns an error when the file cannot be read or parsed.
pub fn read_catalog_json(path: &Path) -> Result<Vec<Product>> {
    let bytes = read_json_bytes(path)?;
    let entries: Vec<CatalogEntry> = serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse catalog JSON {}", path.display()))?;
    Ok(entries.into_iter().map(Product::from).collect())
}

/// Read a `kg.json` graph file into a definition with namespaced keys.
///
/// # Errors
/// Returns an error when the file cannot be read, parsed, or resolved.
pub fn read_graph_json(path: &Path) -> Result<GraphDefinition> {
    let bytes = read_json_bytes(path)?;
    let file: GraphFile = serde_json::from_slice(&bytes)
        .with_context(|| format!("failed to parse graph JSON {}", path.display()))?;
    file.into_definition()
        .with_context(|| format!("failed to resolve graph JSON {}", path.display()))
}

/// Atomically write `products` as pretty JSON and return the SHA-256 of the bytes written.
///
/// # Errors
/// Returns an error when serialization or any file step fails.
pub fn write_catalog_json(path: &Path, products: &[Product]) -> Result<String> {
    write_json_atomic(path, products)
}

/// Atomically write `definition` in `kg.json` shape and return the SHA-256 of the bytes
/// written.
///
/// # Errors
/// Returns an error when serialization or any file step fails.
pub fn write_graph_json(path: &Path, definition: &GraphDefinition) -> Result<String> {
    write_json_atomic(path, &GraphFile::from_definition(definition))
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<String> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory {}", parent.display()))?;

    let mut bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    bytes.push(b'\n');

    let mut file = NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    file.write_all(&bytes)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    file.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temp file for {}", path.display()))?;
    file.persist(path)
        .map_err(|err| anyhow!("failed to replace {}: {}", path.display(), err.error))?;

    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn mk_product(id: &str, category: Option<&str>, brand: Option<&str>, tags: &[&str]) -> Product {
        Product {
            id: ProductId::from(id),
            name: format!("Product {id}"),
            category: category.map(str::to_string),
            brand: brand.map(str::to_string),
            tags: tags.iter().map(|tag| (*tag).to_string()).collect(),
            price: 42.5,
            stock: 3,
        }
    }

    fn migrated_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn temp_dir(label: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("substitute-{label}-{}", Ulid::new()))
    }

    // Test IDs: TSTORE-001
    #[test]
    fn migrate_is_idempotent_and_clears_pending_versions() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        let before = store.schema_status()?;
        assert_eq!(before.current_version, 0);
        assert_eq!(before.pending_versions, vec![1]);

        store.migrate()?;
        store.migrate()?;
        let after = store.schema_status()?;
        assert_eq!(after.current_version, LATEST_SCHEMA_VERSION);
        assert!(after.pending_versions.is_empty());
        Ok(())
    }

    // Test IDs: TSTORE-002
    #[test]
    fn replace_catalog_round_trips_products_and_tags() -> Result<()> {
        let mut store = migrated_store()?;
        let written = store.replace_catalog(vec![
            mk_product("p2", Some("dairy"), None, &["veg"]),
            mk_product("p1", Some("dairy"), Some("Amul"), &["veg", "full_cream"]),
            mk_product("p3", None, None, &[]),
        ])?;
        assert_eq!(written, 3);

        let products = store.list_products()?;
        assert_eq!(
            products.iter().map(|product| product.id.as_str()).collect::<Vec<_>>(),
            vec!["p1", "p2", "p3"]
        );
        assert_eq!(
            products[0],
            mk_product("p1", Some("dairy"), Some("Amul"), &["veg", "full_cream"])
        );
        assert_eq!(products[2].category, None);

        store.replace_catalog(vec![mk_product("p9", None, None, &["organic"])])?;
        assert_eq!(store.list_products()?.len(), 1);
        assert_eq!(store.get_product(&ProductId::from("p1"))?, None);
        Ok(())
    }

    // Test IDs: TSTORE-003
    #[test]
    fn invalid_catalog_leaves_previous_rows_untouched() -> Result<()> {
        let mut store = migrated_store()?;
        store.replace_catalog(vec![mk_product("p1", Some("dairy"), None, &[])])?;

        let result = store.replace_catalog(vec![
            mk_product("p7", Some("dairy"), None, &[]),
            mk_product("p7", Some("dairy"), None, &[]),
        ]);
        let Err(err) = result else {
            panic!("duplicate ids should be rejected");
        };
        assert!(matches!(
            err.downcast_ref::<SubstituteError>(),
            Some(SubstituteError::Validation(_))
        ));
        assert_eq!(store.list_products()?.len(), 1);
        Ok(())
    }

    // Test IDs: TSTORE-004
    #[test]
    fn set_stock_updates_one_product_and_reports_unknown_ids() -> Result<()> {
        let mut store = migrated_store()?;
        store.replace_catalog(vec![
            mk_product("p1", Some("dairy"), None, &["veg"]),
            mk_product("p2", Some("dairy"), None, &[]),
        ])?;

        let updated = store.set_stock(&ProductId::from("p1"), 0)?;
        assert_eq!(updated.stock, 0);
        assert_eq!(updated.tags, BTreeSet::from(["veg".to_string()]));
        assert_eq!(
            store.get_product(&ProductId::from("p2"))?.map(|product| product.stock),
            Some(3)
        );

        let Err(err) = store.set_stock(&ProductId::from("p404"), 5) else {
            panic!("unknown product should be rejected");
        };
        assert!(matches!(
            err.downcast_ref::<SubstituteError>(),
            Some(SubstituteError::NotFound(_))
        ));
        Ok(())
    }

    // Test IDs: TSTORE-005
    #[test]
    fn graph_rows_round_trip_and_invalid_graphs_are_rejected() -> Result<()> {
        let mut store = migrated_store()?;
        let catalog = Catalog::new(vec![
            mk_product("p1", Some("dairy"), Some("Amul"), &["veg"]),
            mk_product("p2", Some("plant_milk"), None, &[]),
        ])?;
        let mut definition = GraphDefinition::from_catalog(&catalog);
        definition.edges.push(GraphEdge {
            source: NodeKey::category("plant_milk"),
            target: NodeKey::category("dairy"),
            relation: RelationKind::SimilarTo,
        });
        assert!(!store.has_graph()?);
        let (nodes, edges) = store.replace_graph(&definition)?;
        assert_eq!((nodes, edges), (definition.nodes.len(), definition.edges.len()));
        assert!(store.has_graph()?);

        let loaded = store.load_graph_definition()?;
        assert_eq!(KnowledgeGraph::build(&loaded)?.edge_count(), definition.edges.len());
        assert_eq!(loaded.nodes.len(), definition.nodes.len());

        let mut broken = definition.clone();
        broken.edges.push(GraphEdge {
            source: NodeKey::product(&ProductId::from("p1")),
            target: NodeKey::category("missing"),
            relation: RelationKind::IsA,
        });
        assert!(store.replace_graph(&broken).is_err());
        assert_eq!(store.load_graph_definition()?, loaded);
        Ok(())
    }

    // Test IDs: TSTORE-006
    #[test]
    fn replace_all_rejects_graph_products_outside_the_catalog() -> Result<()> {
        let mut store = migrated_store()?;
        let products = vec![mk_product("p1", Some("dairy"), None, &[])];
        let definition = GraphDefinition::from_catalog(&Catalog::new(vec![
            mk_product("p1", Some("dairy"), None, &[]),
            mk_product("ghost", Some("dairy"), None, &[]),
        ])?);
        let Err(err) = store.replace_all(products.clone(), &definition) else {
            panic!("graph with unknown product should be rejected");
        };
        assert!(err.to_string().contains("p:ghost"));
        assert!(store.list_products()?.is_empty());

        let own_graph = GraphDefinition::from_catalog(&Catalog::new(products.clone())?);
        let summary = store.replace_all(products, &own_graph)?;
        assert_eq!(summary, ImportSummary { products: 1, graph_nodes: 2, graph_edges: 1 });
        Ok(())
    }

    // Test IDs: TSTORE-007
    #[test]
    fn catalog_json_tolerates_bom_and_missing_fields() -> Result<()> {
        let dir = temp_dir("catalog-json");
        fs::create_dir_all(&dir)?;
        let path = dir.join(CATALOG_FILE_NAME);
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(
            br#"[
                {"id": "p1", "name": "Amul Full Cream Milk", "category": "dairy", "brand": "Amul",
                 "tags": ["veg"], "price": 50, "stock": 0},
                {"id": "p2", "name": "Loose Paneer", "category": null, "price": 80.5}
            ]"#,
        );
        fs::write(&path, bytes)?;

        let products = read_catalog_json(&path)?;
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].tags, BTreeSet::from(["veg".to_string()]));
        assert!((products[0].price - 50.0).abs() < f64::EPSILON);
        assert_eq!(products[1].brand, None);
        assert_eq!(products[1].stock, 0);
        assert!(products[1].tags.is_empty());

        fs::remove_dir_all(&dir)
            .with_context(|| format!("failed to cleanup temp dir {}", dir.display()))?;
        Ok(())
    }

    // Test IDs: TSTORE-008
    #[test]
    fn graph_json_namespaces_raw_product_ids() -> Result<()> {
        let raw = r#"{
            "nodes": [
                {"id": "p1", "type": "product", "name": "Amul Full Cream Milk", "price": 50},
                {"id": "cat:dairy", "type": "category", "name": "dairy"},
                {"id": "plant_milk", "type": "category"},
                {"id": "tag:veg", "type": "attribute"}
            ],
            "edges": [
                {"source": "p1", "target": "cat:dairy", "relation": "IS_A"},
                {"source": "p1", "target": "tag:veg", "relation": "HAS_ATTRIBUTE"},
                {"source": "cat:plant_milk", "target": "cat:dairy", "relation": "SIMILAR_TO"}
            ]
        }"#;
        let file: GraphFile = serde_json::from_str(raw)?;
        let definition = file.clone().into_definition()?;

        assert_eq!(definition.nodes[0].key.as_str(), "p:p1");
        assert_eq!(definition.nodes[2].key.as_str(), "cat:plant_milk");
        assert_eq!(definition.edges[0].source.as_str(), "p:p1");
        let graph = KnowledgeGraph::build(&definition)?;
        assert_eq!(graph.edge_count(), 3);

        let written = GraphFile::from_definition(&definition);
        assert_eq!(written.nodes[0].id, "p1");
        assert_eq!(written.edges[2].source, "cat:plant_milk");

        let mislabeled: GraphFile =
            serde_json::from_str(r#"{"nodes": [{"id": "brand:Amul", "type": "category"}]}"#)?;
        assert!(mislabeled.into_definition().is_err());
        Ok(())
    }

    // Test IDs: TSTORE-009
    #[test]
    fn export_snapshot_writes_files_matching_manifest_digests() -> Result<()> {
        let mut store = migrated_store()?;
        let products = vec![
            mk_product("p1", Some("dairy"), Some("Amul"), &["veg"]),
            mk_product("p2", Some("dairy"), None, &[]),
        ];
        let definition = GraphDefinition::from_catalog(&Catalog::new(products.clone())?);
        store.replace_all(products.clone(), &definition)?;

        let dir = temp_dir("export");
        let manifest = store.export_snapshot(&dir)?;
        assert_eq!(manifest.files.len(), 2);
        for file in &manifest.files {
            let bytes = fs::read(dir.join(&file.path))?;
            assert_eq!(format!("{:x}", Sha256::digest(&bytes)), file.sha256);
        }

        assert_eq!(read_catalog_json(&dir.join(CATALOG_FILE_NAME))?, products);
        let reread = read_graph_json(&dir.join(GRAPH_FILE_NAME))?;
        assert_eq!(reread, store.load_graph_definition()?);
        assert!(dir.join(MANIFEST_FILE_NAME).exists());

        fs::remove_dir_all(&dir)
            .with_context(|| format!("failed to cleanup temp export dir {}", dir.display()))?;
        Ok(())
    }

    // Test IDs: TSTORE-010
    #[test]
    fn sqlite_checks_reject_negative_price_and_dangling_edges() -> Result<()> {
        let store = migrated_store()?;
        let price_result = store.conn.execute(
            "INSERT INTO products(id, name, price, stock) VALUES ('bad', 'Bad', -1.0, 1)",
            [],
        );
        assert!(price_result.is_err());

        let fk_result = store.conn.execute(
            "INSERT INTO graph_edges(source_key, target_key, relation)
             VALUES ('p:x', 'cat:y', 'IS_A')",
            [],
        );
        assert!(fk_result.is_err());
        Ok(())
    }

    // Test IDs: TSTORE-011
    #[test]
    fn file_backed_store_persists_across_reopen() -> Result<()> {
        let db_path =
            std::env::temp_dir().join(format!("substitute-store-{}.sqlite3", Ulid::new()));
        {
            let mut store = SqliteStore::open(&db_path)?;
            store.migrate()?;
            store.replace_catalog(vec![mk_product("p1", Some("dairy"), None, &["veg"])])?;
        }

        let reopened = SqliteStore::open(&db_path)?;
        assert_eq!(reopened.schema_status()?.current_version, LATEST_SCHEMA_VERSION);
        assert_eq!(reopened.load_catalog()?.len(), 1);
        drop(reopened);

        for suffix in ["", "-wal", "-shm"] {
            let path = std::path::PathBuf::from(format!("{}{suffix}", db_path.display()));
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to cleanup temp db {}", path.display()))?;
            }
        }
        Ok(())
    }
}
