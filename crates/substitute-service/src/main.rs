use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use substitute_api::{
    load_weights, RecommendRequest, SnapshotInfo, StockUpdateRequest, StockUpdateResult,
    SubstituteApi, API_CONTRACT_VERSION,
};
use substitute_core::{Product, ProductId, RecommendationPackage, RuleWeights, SubstituteError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Clone)]
struct ServiceState {
    api: Arc<SubstituteApi>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error_kind: &'static str,
    error: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StockBody {
    quantity: u32,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "substitute-service")]
#[command(about = "Local HTTP service for substitute recommendations")]
struct Args {
    #[arg(long, default_value = "./substitute_kernel.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// YAML file overriding rule weights.
    #[arg(long)]
    weights: Option<PathBuf>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        let (status, error_kind) = match err.downcast_ref::<SubstituteError>() {
            Some(SubstituteError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            Some(SubstituteError::InvalidConstraint(_)) => {
                (StatusCode::BAD_REQUEST, "invalid_constraint")
            }
            Some(SubstituteError::Validation(_)) => (StatusCode::BAD_REQUEST, "validation"),
            None => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            tracing::warn!(error = format!("{err:#}"), "request failed");
        }
        ServiceError {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error_kind,
            error: format!("{err:#}"),
        }
    }
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/snapshot", get(snapshot_show))
        .route("/v1/products", get(products_list))
        .route("/v1/products/:product_id", get(product_show))
        .route("/v1/products/:product_id/stock", post(product_stock))
        .route("/v1/recommend", post(recommend))
        .route("/v1/catalog/reload", post(catalog_reload))
        .with_state(state)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let weights = match &args.weights {
        Some(path) => load_weights(path)?,
        None => RuleWeights::default(),
    };
    let api = SubstituteApi::open(args.db, weights)?;
    let state = ServiceState { api: Arc::new(api) };

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    tracing::info!(bind = %args.bind, "substitute service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn snapshot_show(State(state): State<ServiceState>) -> Json<ServiceEnvelope<SnapshotInfo>> {
    Json(envelope(state.api.snapshot_info()))
}

async fn products_list(State(state): State<ServiceState>) -> Json<ServiceEnvelope<Vec<Product>>> {
    Json(envelope(state.api.list_products()))
}

async fn product_show(
    State(state): State<ServiceState>,
    Path(product_id): Path<String>,
) -> Result<Json<ServiceEnvelope<Product>>, ServiceError> {
    let product = state.api.get_product(&ProductId::new(product_id))?;
    Ok(Json(envelope(product)))
}

async fn product_stock(
    State(state): State<ServiceState>,
    Path(product_id): Path<String>,
    Json(body): Json<StockBody>,
) -> Result<Json<ServiceEnvelope<StockUpdateResult>>, ServiceError> {
    let request =
        StockUpdateRequest { product_id: ProductId::new(product_id), quantity: body.quantity };
    let result = state.api.update_stock(&request)?;
    Ok(Json(envelope(result)))
}

async fn recommend(
    State(state): State<ServiceState>,
    Json(request): Json<RecommendRequest>,
) -> Result<Json<ServiceEnvelope<RecommendationPackage>>, ServiceError> {
    let package = state.api.recommend(&request)?;
    Ok(Json(envelope(package)))
}

async fn catalog_reload(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<SnapshotInfo>>, ServiceError> {
    let info = state.api.reload()?;
    Ok(Json(envelope(info)))
}
