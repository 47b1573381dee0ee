use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod memory;
pub mod models;
pub mod queries;

pub use error::QueryError;
pub use executor::{run_query, QueryExecutor};
pub use queries::{get_query, QueryName, QueryOverrides, QueryResult, QuerySpec};

#[derive(Clone)]
pub struct AppState {
    executor: Arc<dyn QueryExecutor>,
    query_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(executor: Arc<dyn QueryExecutor>, query_timeout: Option<Duration>) -> Self {
        Self {
            executor,
            query_timeout,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryInfo {
    pub name: String,
    pub alias: String,
    pub description: String,
    pub root: String,
    pub parameters: Vec<String>,
}

impl From<QueryName> for QueryInfo {
    fn from(name: QueryName) -> Self {
        QueryInfo {
            name: name.as_str().to_string(),
            alias: name.alias().to_string(),
            description: name.description().to_string(),
            root: name.root().to_string(),
            parameters: name.parameters().iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RunParams {
    now: Option<DateTime<Utc>>,
    window_days: Option<i64>,
    country: Option<String>,
    tier: Option<String>,
    genre: Option<String>,
    artist: Option<String>,
    limit: Option<i64>,
    boundaries: Option<String>,
}

impl RunParams {
    fn overrides(&self) -> QueryOverrides {
        QueryOverrides {
            window_days: self.window_days,
            country: self.country.clone(),
            tier: self.tier.clone(),
            genre: self.genre.clone(),
            artist: self.artist.clone(),
            limit: self.limit,
            boundaries: self.boundaries.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

pub fn status_for(err: &QueryError) -> StatusCode {
    match err {
        QueryError::NotFound(_) => StatusCode::NOT_FOUND,
        QueryError::Validation(_) => StatusCode::BAD_REQUEST,
        QueryError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        QueryError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        QueryError::CollectionNotFound(_) | QueryError::Store(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for QueryError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status_for(&self), Json(body)).into_response()
    }
}

async fn list_queries() -> Json<Vec<QueryInfo>> {
    Json(QueryName::ALL.into_iter().map(QueryInfo::from).collect())
}

async fn run_report(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<RunParams>,
) -> Result<Json<QueryResult>, QueryError> {
    let mut spec = get_query(&name)?;
    spec.apply(&params.overrides())?;
    let now = params.now.unwrap_or_else(Utc::now);

    let rows = run_query(state.executor.as_ref(), &spec, now, state.query_timeout).await?;
    Ok(Json(rows))
}

async fn health_check() -> &'static str {
    "ok"
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/queries", get(list_queries))
        .route("/api/queries/:name", get(run_report))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("music_reports=debug,tower_http=debug")
        .init();

    let store_config = config::StoreConfig::from_env()?;
    let server_config = config::ServerConfig::from_env()?;

    let store = db::PgStore::connect(&store_config).await?;
    tracing::info!("database initialized");

    let app = router(AppState::new(
        Arc::new(store.clone()),
        server_config.query_timeout,
    ));

    tracing::info!("listening on {}", server_config.addr);
    let listener = tokio::net::TcpListener::bind(server_config.addr).await?;
    let served = axum::serve(listener, app).await;

    store.close().await;
    served?;
    Ok(())
}
