use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use substitute_core::{
    Catalog, Constraints, FinderScope, GraphDefinition, KnowledgeGraph, NodeKey, Product,
    ProductId, RankingConfig, RecommendationPackage, RuleWeights, Snapshot, SubstituteError,
    RULESET_VERSION,
};
use substitute_store_sqlite::{
    read_catalog_json, read_graph_json, ExportManifest, ImportSummary, SchemaStatus, SqliteStore,
};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

/// A recommendation query.
///
/// By default `product` is resolved like [`SubstituteApi::find_product`]: an exact id wins,
/// otherwise the smallest id whose name contains the text. A mistyped id can therefore
/// resolve to a different product by name. Set `exact_id` to accept only an exact id and
/// get [`SubstituteError::NotFound`] for anything else.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecommendRequest {
    pub product: String,
    #[serde(default)]
    pub exact_id: bool,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub include_shared_attributes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockUpdateRequest {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockUpdateResult {
    pub product: Product,
    pub previous_stock: u32,
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportRequest {
    pub products_path: PathBuf,
    #[serde(default)]
    pub graph_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportResult {
    pub summary: ImportSummary,
    pub graph_derived_from_catalog: bool,
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub snapshot_id: String,
    pub ruleset_version: String,
    pub products: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub weights: RuleWeights,
}

/// Read a partial rule weights file. Missing keys keep their defaults; unknown keys are
/// rejected. An empty file yields the defaults.
///
/// # Errors
/// Returns an error when the file cannot be read or is not a valid weights mapping.
pub fn load_weights(path: &Path) -> Result<RuleWeights> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read weights file {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(RuleWeights::default());
    }
    serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse weights file {}", path.display()))
}

/// Inspect schema status without mutating data.
///
/// # Errors
/// Returns an error when the `SQLite` database cannot be opened or queried.
pub fn schema_status(db_path: &Path) -> Result<SchemaStatus> {
    let store = SqliteStore::open(db_path)?;
    store.schema_status()
}

/// Apply pending migrations, or return planned versions for dry-run mode.
///
/// # Errors
/// Returns an error when migration planning or execution fails.
pub fn migrate(db_path: &Path, dry_run: bool) -> Result<MigrateResult> {
    let mut store = SqliteStore::open(db_path)?;
    let before = store.schema_status()?;
    if dry_run {
        return Ok(MigrateResult {
            dry_run: true,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: before.pending_versions,
            after_version: None,
            up_to_date: None,
        });
    }

    store.migrate()?;
    let after = store.schema_status()?;
    Ok(MigrateResult {
        dry_run: false,
        current_version: before.current_version,
        target_version: before.target_version,
        would_apply_versions: before.pending_versions,
        after_version: Some(after.current_version),
        up_to_date: Some(after.pending_versions.is_empty()),
    })
}

/// Owns the database path and the current snapshot. Queries clone the snapshot pointer
/// and never hold the lock while scoring; writers are serialized by `write_lock`.
pub struct SubstituteApi {
    db_path: PathBuf,
    weights: RuleWeights,
    snapshot: RwLock<Arc<Snapshot>>,
    write_lock: Mutex<()>,
}

impl SubstituteApi {
    /// Migrate the database at `db_path` and load the first snapshot.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or migrated, or when stored data
    /// does not form a valid snapshot.
    pub fn open(db_path: PathBuf, weights: RuleWeights) -> Result<Self> {
        let mut store = SqliteStore::open(&db_path)?;
        store.migrate()?;
        let snapshot = load_snapshot(&store)?;
        tracing::info!(
            db = %db_path.display(),
            snapshot_id = snapshot.snapshot_id(),
            products = snapshot.catalog().len(),
            "substitute snapshot loaded"
        );

        Ok(Self {
            db_path,
            weights,
            snapshot: RwLock::new(Arc::new(snapshot)),
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub fn weights(&self) -> RuleWeights {
        self.weights
    }

    /// The snapshot queries currently run against.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot.read())
    }

    #[must_use]
    pub fn snapshot_info(&self) -> SnapshotInfo {
        let snapshot = self.snapshot();
        SnapshotInfo {
            snapshot_id: snapshot.snapshot_id().to_string(),
            ruleset_version: RULESET_VERSION.to_string(),
            products: snapshot.catalog().len(),
            graph_nodes: snapshot.graph().node_count(),
            graph_edges: snapshot.graph().edge_count(),
            weights: self.weights,
        }
    }

    /// Rebuild the snapshot from the database and swap it in.
    ///
    /// # Errors
    /// Returns an error when stored data cannot be read or validated. The previous snapshot
    /// stays in place on error.
    pub fn reload(&self) -> Result<SnapshotInfo> {
        let _guard = self.write_lock.lock();
        let store = self.open_store()?;
        self.swap(load_snapshot(&store)?);
        Ok(self.snapshot_info())
    }

    /// Rank substitutes for the product named by `request.product`.
    ///
    /// # Errors
    /// Returns [`SubstituteError::InvalidConstraint`] for malformed constraints (checked
    /// before the product lookup) and [`SubstituteError::NotFound`] when no product matches.
    pub fn recommend(&self, request: &RecommendRequest) -> Result<RecommendationPackage> {
        request.constraints.validate()?;
        let snapshot = self.snapshot();
        let source = if request.exact_id {
            get_in(snapshot.catalog(), &ProductId::new(request.product.as_str()))?.id.clone()
        } else {
            find_in(snapshot.catalog(), &request.product)?.id.clone()
        };
        let config = RankingConfig {
            weights: self.weights,
            scope: FinderScope { include_shared_attributes: request.include_shared_attributes },
        };
        let package = snapshot.recommend(&source, &request.constraints, &config)?;
        Ok(package)
    }

    /// Resolve free text to one product: exact id, then case-insensitive name substring
    /// with the smallest id winning.
    ///
    /// # Errors
    /// Returns [`SubstituteError::NotFound`] when nothing matches.
    pub fn find_product(&self, query: &str) -> Result<Product> {
        let snapshot = self.snapshot();
        Ok(find_in(snapshot.catalog(), query)?.clone())
    }

    /// # Errors
    /// Returns [`SubstituteError::NotFound`] when the id is unknown.
    pub fn get_product(&self, id: &ProductId) -> Result<Product> {
        let snapshot = self.snapshot();
        Ok(get_in(snapshot.catalog(), id)?.clone())
    }

    #[must_use]
    pub fn list_products(&self) -> Vec<Product> {
        self.snapshot().catalog().iter().cloned().collect()
    }

    /// Persist a stock change, rebuild the snapshot, then swap it in.
    ///
    /// # Errors
    /// Returns [`SubstituteError::NotFound`] when the product is unknown, or an error when
    /// persistence or the rebuild fails.
    pub fn update_stock(&self, request: &StockUpdateRequest) -> Result<StockUpdateResult> {
        let _guard = self.write_lock.lock();
        let previous_stock = self.get_product(&request.product_id)?.stock;

        let mut store = self.open_store()?;
        let product = store.set_stock(&request.product_id, request.quantity)?;
        let snapshot = load_snapshot(&store)?;
        let snapshot_id = snapshot.snapshot_id().to_string();
        self.swap(snapshot);

        tracing::info!(
            product_id = %request.product_id,
            previous_stock,
            quantity = request.quantity,
            snapshot_id = %snapshot_id,
            "stock update applied"
        );
        Ok(StockUpdateResult { product, previous_stock, snapshot_id })
    }

    /// Replace catalog and graph from interchange files. Without a graph file the graph is
    /// derived from catalog fields.
    ///
    /// # Errors
    /// Returns an error when files cannot be read or the data fails validation. The
    /// database and current snapshot are unchanged on error.
    pub fn import_catalog(&self, request: &ImportRequest) -> Result<ImportResult> {
        let _guard = self.write_lock.lock();
        let products = read_catalog_json(&request.products_path)?;
        let (definition, graph_derived_from_catalog) = match &request.graph_path {
            Some(path) => (read_graph_json(path)?, false),
            None => (GraphDefinition::from_catalog(&Catalog::new(products.clone())?), true),
        };

        let mut store = self.open_store()?;
        let summary = store.replace_all(products, &definition)?;
        let snapshot = load_snapshot(&store)?;
        let snapshot_id = snapshot.snapshot_id().to_string();
        self.swap(snapshot);

        Ok(ImportResult { summary, graph_derived_from_catalog, snapshot_id })
    }

    /// # Errors
    /// Returns an error when the export files cannot be written.
    pub fn export_catalog(&self, out_dir: &Path) -> Result<ExportManifest> {
        let store = self.open_store()?;
        store.export_snapshot(out_dir)
    }

    /// # Errors
    /// Returns an error when the database cannot be queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        schema_status(&self.db_path)
    }

    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let _guard = self.write_lock.lock();
        migrate(&self.db_path, dry_run)
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn swap(&self, snapshot: Snapshot) {
        let snapshot = Arc::new(snapshot);
        let previous = std::mem::replace(&mut *self.snapshot.write(), snapshot);
        tracing::debug!(previous = previous.snapshot_id(), "snapshot swapped");
    }
}

fn get_in<'a>(catalog: &'a Catalog, id: &ProductId) -> Result<&'a Product, SubstituteError> {
    catalog
        .get(id)
        .ok_or_else(|| SubstituteError::NotFound(format!("product {id} is not in the catalog")))
}

fn find_in<'a>(catalog: &'a Catalog, query: &str) -> Result<&'a Product, SubstituteError> {
    catalog
        .find(query)
        .ok_or_else(|| SubstituteError::NotFound(format!("no product matches {query:?}")))
}

fn load_snapshot(store: &SqliteStore) -> Result<Snapshot> {
    let catalog = store.load_catalog()?;
    let definition = if store.has_graph()? {
        store.load_graph_definition()?
    } else {
        GraphDefinition::from_catalog(&catalog)
    };
    let graph = KnowledgeGraph::build(&definition)?;
    let snapshot_id = compute_snapshot_id(&catalog, &definition);
    let snapshot = Snapshot::new(snapshot_id, catalog, graph)?;
    Ok(snapshot)
}

/// Content-derived id: identical catalog and graph data always yields the same id.
fn compute_snapshot_id(catalog: &Catalog, definition: &GraphDefinition) -> String {
    let mut hasher = Sha256::new();

    for product in catalog.iter() {
        hasher.update(b"product\0");
        hasher.update(product.id.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(product.name.as_bytes());
        hasher.update(b"\0");
        hasher.update(product.category.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"\0");
        hasher.update(product.brand.as_deref().unwrap_or_default().as_bytes());
        hasher.update(b"\0");
        for tag in &product.tags {
            hasher.update(tag.as_bytes());
            hasher.update(b",");
        }
        hasher.update(product.price.to_bits().to_le_bytes());
        hasher.update(product.stock.to_le_bytes());
    }

    let mut edges: BTreeSet<(&NodeKey, &str, &NodeKey)> = BTreeSet::new();
    for edge in &definition.edges {
        let (source, target) = if edge.relation.is_symmetric() && edge.target < edge.source {
            (&edge.target, &edge.source)
        } else {
            (&edge.source, &edge.target)
        };
        if edge.relation.is_symmetric() && source == target {
            continue;
        }
        edges.insert((source, edge.relation.as_str(), target));
    }
    for (source, relation, target) in edges {
        hasher.update(b"edge\0");
        hasher.update(source.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(relation.as_bytes());
        hasher.update(b"\0");
        hasher.update(target.as_str().as_bytes());
    }

    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    format!("snap_{}", &digest_hex[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_temp_path(label: &str, extension: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("substitute-api-{label}-{}{extension}", ulid::Ulid::new()))
    }

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures").join(name)
    }

    fn cleanup_db(db_path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = fs::remove_file(format!("{}{suffix}", db_path.display()));
        }
    }

    fn imported_api(weights: RuleWeights) -> Result<(SubstituteApi, PathBuf)> {
        let db_path = unique_temp_path("db", ".sqlite3");
        let api = SubstituteApi::open(db_path.clone(), weights)?;
        api.import_catalog(&ImportRequest {
            products_path: fixture("products.json"),
            graph_path: Some(fixture("kg.json")),
        })?;
        Ok((api, db_path))
    }

    fn ranked(package: &RecommendationPackage) -> Vec<&str> {
        package.recommendations.iter().map(|item| item.product_id.as_str()).collect()
    }

    fn request(product: &str) -> RecommendRequest {
        RecommendRequest { product: product.to_string(), ..RecommendRequest::default() }
    }

    // Test IDs: TAPI-001
    #[test]
    fn import_then_recommend_by_name_ranks_fixture_catalog() -> Result<()> {
        let (api, db_path) = imported_api(RuleWeights::default())?;
        let info = api.snapshot_info();
        assert_eq!(info.products, 10);
        assert_eq!(info.graph_edges, 40);
        assert!(info.snapshot_id.starts_with("snap_"));

        let package = api.recommend(&request("amul full cream"))?;
        assert_eq!(package.source.product_id.as_str(), "p1");
        assert!(!package.source.in_stock);
        assert_eq!(ranked(&package), vec!["p2", "p9", "p3", "p5", "p6"]);
        assert_eq!(package.recommendations[0].score, 8);
        assert_eq!(
            package.excluded.iter().map(|item| item.product_id.as_str()).collect::<Vec<_>>(),
            vec!["p10", "p4", "p7"]
        );
        assert_eq!(package.determinism.snapshot_id, info.snapshot_id);

        cleanup_db(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-002
    #[test]
    fn stock_update_persists_and_swaps_snapshot() -> Result<()> {
        let (api, db_path) = imported_api(RuleWeights::default())?;
        let before = api.snapshot();
        assert!(!ranked(&api.recommend(&request("p2"))?).contains(&"p1"));

        let result = api.update_stock(&StockUpdateRequest {
            product_id: ProductId::from("p1"),
            quantity: 5,
        })?;
        assert_eq!(result.previous_stock, 0);
        assert_eq!(result.product.stock, 5);
        assert_ne!(result.snapshot_id, before.snapshot_id());

        // p3 ties p1 on score and wins on price.
        let after = api.recommend(&request("p2"))?;
        assert_eq!(ranked(&after), vec!["p3", "p1", "p9", "p5", "p6"]);
        assert_eq!(after.recommendations[1].score, 7);

        // Readers holding the old snapshot keep seeing the old stock.
        assert_eq!(
            before.catalog().get(&ProductId::from("p1")).map(|product| product.stock),
            Some(0)
        );

        let reopened = SubstituteApi::open(db_path.clone(), RuleWeights::default())?;
        assert_eq!(reopened.get_product(&ProductId::from("p1"))?.stock, 5);
        assert_eq!(reopened.snapshot_info().snapshot_id, result.snapshot_id);

        cleanup_db(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-003
    #[test]
    fn unknown_products_and_bad_constraints_map_to_typed_errors() -> Result<()> {
        let (api, db_path) = imported_api(RuleWeights::default())?;

        let Err(err) = api.recommend(&request("paneer")) else {
            panic!("unknown product should fail");
        };
        assert!(matches!(
            err.downcast_ref::<SubstituteError>(),
            Some(SubstituteError::NotFound(_))
        ));

        let invalid = RecommendRequest {
            product: "paneer".to_string(),
            constraints: Constraints { max_price: Some(-5.0), ..Constraints::default() },
            ..RecommendRequest::default()
        };
        let Err(err) = api.recommend(&invalid) else {
            panic!("negative max_price should fail");
        };
        assert!(matches!(
            err.downcast_ref::<SubstituteError>(),
            Some(SubstituteError::InvalidConstraint(_))
        ));

        let Err(err) = api.update_stock(&StockUpdateRequest {
            product_id: ProductId::from("p404"),
            quantity: 1,
        }) else {
            panic!("unknown product stock update should fail");
        };
        assert!(matches!(
            err.downcast_ref::<SubstituteError>(),
            Some(SubstituteError::NotFound(_))
        ));

        assert_eq!(api.find_product("toned")?.id.as_str(), "p2");
        assert_eq!(api.find_product("p10")?.name, "Mother Dairy Classic Curd 400g");

        cleanup_db(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-004
    #[test]
    fn snapshot_ids_follow_content_not_database() -> Result<()> {
        let (first, first_db) = imported_api(RuleWeights::default())?;
        let (second, second_db) = imported_api(RuleWeights::default())?;
        assert_eq!(first.snapshot_info().snapshot_id, second.snapshot_info().snapshot_id);

        let reloaded = first.reload()?;
        assert_eq!(reloaded.snapshot_id, second.snapshot_info().snapshot_id);

        cleanup_db(&first_db);
        cleanup_db(&second_db);
        Ok(())
    }

    // Test IDs: TAPI-005
    #[test]
    fn weights_file_overrides_and_rejects_unknown_keys() -> Result<()> {
        let partial = unique_temp_path("weights", ".yaml");
        fs::write(&partial, "same_brand: 5\nin_stock_bonus: 0\n")?;
        let weights = load_weights(&partial)?;
        assert_eq!(
            weights,
            RuleWeights { same_brand: 5, in_stock_bonus: 0, ..RuleWeights::default() }
        );

        let unknown = unique_temp_path("weights-unknown", ".yaml");
        fs::write(&unknown, "same_shelf: 2\n")?;
        assert!(load_weights(&unknown).is_err());

        let empty = unique_temp_path("weights-empty", ".yaml");
        fs::write(&empty, "\n")?;
        assert_eq!(load_weights(&empty)?, RuleWeights::default());

        let (api, db_path) = imported_api(weights)?;
        let package = api.recommend(&request("p1"))?;
        let butter = package
            .recommendations
            .iter()
            .find(|item| item.product_id.as_str() == "p6")
            .map(|item| item.score);
        assert_eq!(butter, Some(5 + 1));

        for path in [&partial, &unknown, &empty] {
            let _ = fs::remove_file(path);
        }
        cleanup_db(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-006
    #[test]
    fn migrate_dry_run_plans_without_applying() -> Result<()> {
        let db_path = unique_temp_path("migrate", ".sqlite3");
        let planned = migrate(&db_path, true)?;
        assert!(planned.dry_run);
        assert_eq!(planned.would_apply_versions, vec![1]);
        assert_eq!(schema_status(&db_path)?.current_version, 0);

        let applied = migrate(&db_path, false)?;
        assert_eq!(applied.after_version, Some(1));
        assert_eq!(applied.up_to_date, Some(true));

        cleanup_db(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-007
    #[test]
    fn import_without_graph_derives_edges_from_catalog() -> Result<()> {
        let db_path = unique_temp_path("derived", ".sqlite3");
        let api = SubstituteApi::open(db_path.clone(), RuleWeights::default())?;
        let result = api.import_catalog(&ImportRequest {
            products_path: fixture("products.json"),
            graph_path: None,
        })?;
        assert!(result.graph_derived_from_catalog);
        assert_eq!(result.summary.graph_edges, 38);

        // No SIMILAR_TO edges, so plant milk and curd drop out.
        let package = api.recommend(&request("p1"))?;
        assert_eq!(ranked(&package), vec!["p2", "p3", "p9", "p6"]);

        cleanup_db(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-008
    #[test]
    fn export_and_reimport_preserves_snapshot_id() -> Result<()> {
        let (api, db_path) = imported_api(RuleWeights::default())?;
        let out_dir = unique_temp_path("export", "");
        let manifest = api.export_catalog(&out_dir)?;
        assert_eq!(manifest.files.len(), 2);

        let copy_db = unique_temp_path("copy", ".sqlite3");
        let copy = SubstituteApi::open(copy_db.clone(), RuleWeights::default())?;
        copy.import_catalog(&ImportRequest {
            products_path: out_dir.join("products.json"),
            graph_path: Some(out_dir.join("kg.json")),
        })?;
        assert_eq!(copy.snapshot_info().snapshot_id, api.snapshot_info().snapshot_id);

        let _ = fs::remove_dir_all(&out_dir);
        cleanup_db(&db_path);
        cleanup_db(&copy_db);
        Ok(())
    }

    // Test IDs: TAPI-009
    #[test]
    fn concurrent_queries_observe_whole_snapshots_during_updates() -> Result<()> {
        let (api, db_path) = imported_api(RuleWeights::default())?;
        let known_ids = BTreeSet::from([
            api.snapshot_info().snapshot_id,
            compute_snapshot_id(
                &Catalog::new(
                    api.list_products()
                        .into_iter()
                        .map(|mut product| {
                            if product.id.as_str() == "p1" {
                                product.stock = 9;
                            }
                            product
                        })
                        .collect(),
                )?,
                &read_graph_json(&fixture("kg.json"))?,
            ),
        ]);

        let api_ref = &api;
        let known_ref = &known_ids;
        std::thread::scope(|scope| -> Result<()> {
            let readers = (0..4)
                .map(|_| {
                    scope.spawn(move || -> Result<()> {
                        for _ in 0..25 {
                            let package = api_ref.recommend(&request("p2"))?;
                            assert!(known_ref.contains(&package.determinism.snapshot_id));
                            for item in &package.recommendations {
                                assert!(item.stock > 0);
                            }
                        }
                        Ok(())
                    })
                })
                .collect::<Vec<_>>();

            api_ref.update_stock(&StockUpdateRequest {
                product_id: ProductId::from("p1"),
                quantity: 9,
            })?;

            for reader in readers {
                match reader.join() {
                    Ok(result) => result?,
                    Err(_) => panic!("reader thread panicked"),
                }
            }
            Ok(())
        })?;

        assert!(known_ids.contains(&api.snapshot_info().snapshot_id));
        cleanup_db(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-010
    #[test]
    fn exact_id_requests_skip_name_matching() -> Result<()> {
        let (api, db_path) = imported_api(RuleWeights::default())?;

        // No product has the id "milk", but several names contain it.
        assert_eq!(api.recommend(&request("milk"))?.source.product_id.as_str(), "p1");

        let exact = RecommendRequest { exact_id: true, ..request("milk") };
        let Err(err) = api.recommend(&exact) else {
            panic!("exact id lookup should not fall back to names");
        };
        assert!(matches!(
            err.downcast_ref::<SubstituteError>(),
            Some(SubstituteError::NotFound(_))
        ));

        let exact = RecommendRequest { exact_id: true, ..request("p9") };
        let package = api.recommend(&exact)?;
        assert_eq!(package.source.product_id.as_str(), "p9");
        assert_eq!(package, api.recommend(&request("p9"))?);

        cleanup_db(&db_path);
        Ok(())
    }
}
