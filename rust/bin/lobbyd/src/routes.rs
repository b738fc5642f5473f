//! HTTP routes: system endpoints plus a small bucket API over the registry.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use lobby_bucket::{BucketError, Item, Registry};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 1000;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

pub fn build_router(state: AppState) -> Router {
    let buckets = Router::new()
        .route("/v1/buckets", post(create_bucket))
        .route("/v1/buckets/{bucket}", get(list_items))
        .route(
            "/v1/buckets/{bucket}/{key}",
            get(get_item).put(put_item).delete(delete_item),
        )
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .merge(buckets)
}

/// Run a registry call on the blocking pool. Remote buckets block the calling
/// thread for the whole RPC.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, BucketError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("registry task failed: {}", e)))?
        .map_err(ApiError::from)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
    }))
}

async fn version() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": "lobbyd",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct CreateBucket {
    backend: String,
    name: String,
}

async fn create_bucket(
    State(state): State<AppState>,
    Json(req): Json<CreateBucket>,
) -> Result<impl IntoResponse, ApiError> {
    let registry = Arc::clone(&state.registry);
    let (backend, name) = (req.backend.clone(), req.name.clone());
    blocking(move || registry.create(&backend, &name)).await?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "name": req.name,
            "backend": req.backend,
        })),
    ))
}

/// Item as JSON; the value is base64.
#[derive(Debug, Serialize)]
struct ItemJson {
    key: String,
    value: String,
}

impl From<Item> for ItemJson {
    fn from(item: Item) -> Self {
        Self {
            key: item.key,
            value: STANDARD.encode(item.value),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    per_page: Option<u32>,
}

async fn list_items(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page.unwrap_or(1);
    let per_page = query.per_page.unwrap_or(DEFAULT_PER_PAGE);
    if per_page > MAX_PER_PAGE {
        return Err(ApiError::Validation(format!(
            "per_page must be at most {}",
            MAX_PER_PAGE
        )));
    }

    let registry = Arc::clone(&state.registry);
    let items = blocking(move || registry.bucket(&bucket)?.page(page, per_page)).await?;
    let items: Vec<ItemJson> = items.into_iter().map(ItemJson::from).collect();

    Ok(Json(serde_json::json!({ "items": items })))
}

async fn get_item(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let registry = Arc::clone(&state.registry);
    let item = blocking(move || registry.bucket(&bucket)?.get(&key)).await?;

    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], item.value))
}

async fn put_item(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let registry = Arc::clone(&state.registry);
    let item = blocking(move || registry.bucket(&bucket)?.put(&key, &body)).await?;

    Ok(Json(ItemJson::from(item)))
}

async fn delete_item(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let registry = Arc::clone(&state.registry);
    blocking(move || registry.bucket(&bucket)?.delete(&key)).await?;

    Ok(StatusCode::NO_CONTENT)
}
