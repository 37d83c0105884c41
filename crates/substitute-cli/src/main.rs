use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use substitute_api::{
    load_weights, ImportRequest, RecommendRequest, StockUpdateRequest, SubstituteApi,
};
use substitute_core::{Constraints, ProductId, RuleWeights};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "sr")]
#[command(about = "Substitute recommendation CLI")]
struct Cli {
    #[arg(long, default_value = "./substitute_kernel.sqlite3")]
    db: PathBuf,

    /// YAML file overriding rule weights.
    #[arg(long)]
    weights: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
    Stock {
        #[command(subcommand)]
        command: StockCommand,
    },
    Recommend(RecommendArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum CatalogCommand {
    Import(CatalogImportArgs),
    Export(CatalogExportArgs),
    List,
    Find(CatalogFindArgs),
}

#[derive(Debug, Args)]
struct CatalogImportArgs {
    #[arg(long)]
    products: PathBuf,
    /// Knowledge graph file. Without it the graph is derived from catalog fields.
    #[arg(long)]
    graph: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CatalogExportArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct CatalogFindArgs {
    #[arg(long)]
    query: String,
}

#[derive(Debug, Subcommand)]
enum StockCommand {
    Set(StockSetArgs),
}

#[derive(Debug, Args)]
struct StockSetArgs {
    #[arg(long)]
    product_id: String,
    #[arg(long)]
    quantity: u32,
}

#[derive(Debug, Args)]
struct RecommendArgs {
    /// Exact product id, or a name fragment when `--match-name` is set.
    #[arg(long)]
    product_id: String,
    #[arg(long, default_value_t = false)]
    match_name: bool,
    #[arg(long = "require")]
    require: Vec<String>,
    #[arg(long)]
    max_price: Option<f64>,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long, default_value_t = false)]
    include_shared_attributes: bool,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_api(cli: &Cli) -> Result<SubstituteApi> {
    let weights = match &cli.weights {
        Some(path) => load_weights(path)?,
        None => RuleWeights::default(),
    };
    SubstituteApi::open(cli.db.clone(), weights)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match &cli.command {
        Command::Db { command } => run_db(command, &cli),
        Command::Catalog { command } => run_catalog(command, &open_api(&cli)?),
        Command::Stock { command } => run_stock(command, &open_api(&cli)?),
        Command::Recommend(args) => run_recommend(args, &open_api(&cli)?),
    }
}

fn run_db(command: &DbCommand, cli: &Cli) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = substitute_api::schema_status(&cli.db)?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => {
            let result = substitute_api::migrate(&cli.db, args.dry_run)?;
            emit_json(serde_json::to_value(result)?)
        }
    }
}

fn run_catalog(command: &CatalogCommand, api: &SubstituteApi) -> Result<()> {
    match command {
        CatalogCommand::Import(args) => {
            let result = api.import_catalog(&ImportRequest {
                products_path: args.products.clone(),
                graph_path: args.graph.clone(),
            })?;
            emit_json(serde_json::to_value(result)?)
        }
        CatalogCommand::Export(args) => {
            let manifest = api.export_catalog(&args.out)?;
            emit_json(serde_json::json!({
                "out": args.out.display().to_string(),
                "manifest": manifest
            }))
        }
        CatalogCommand::List => {
            let snapshot_id = api.snapshot().snapshot_id().to_string();
            emit_json(serde_json::json!({
                "snapshot_id": snapshot_id,
                "products": api.list_products()
            }))
        }
        CatalogCommand::Find(args) => {
            let product = api.find_product(&args.query)?;
            emit_json(serde_json::json!({ "product": product }))
        }
    }
}

fn run_stock(command: &StockCommand, api: &SubstituteApi) -> Result<()> {
    match command {
        StockCommand::Set(args) => {
            let result = api.update_stock(&StockUpdateRequest {
                product_id: ProductId::new(args.product_id.clone()),
                quantity: args.quantity,
            })?;
            emit_json(serde_json::to_value(result)?)
        }
    }
}

fn run_recommend(args: &RecommendArgs, api: &SubstituteApi) -> Result<()> {
    let request = RecommendRequest {
        product: args.product_id.clone(),
        exact_id: !args.match_name,
        constraints: Constraints {
            required_attributes: args.require.iter().cloned().collect::<BTreeSet<_>>(),
            max_price: args.max_price,
            limit: args.limit,
        },
        include_shared_attributes: args.include_shared_attributes,
    };
    let package = api.recommend(&request)?;
    emit_json(serde_json::to_value(package)?)
}
