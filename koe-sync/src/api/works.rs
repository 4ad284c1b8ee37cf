//! Work catalog API handlers
//!
//! Simple CRUD reads plus the catalog/filesystem delta report.

use crate::db::works;
use crate::engine;
use crate::error::{ApiError, ApiResult};
use crate::resolver::LibraryScanner;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

const DEFAULT_PAGE_SIZE: i64 = 24;
const MAX_PAGE_SIZE: i64 = 100;

/// GET /api/works query parameters
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub page_size: Option<i64>,
}

/// GET /api/works response
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub works: Vec<works::WorkRecord>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

/// GET /api/works — paged catalog listing
pub async fn list_works(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let works = works::list_works(&state.db, page_size, (page - 1) * page_size).await?;
    let total = works::count_works(&state.db).await?;

    Ok(Json(ListResponse {
        works,
        total,
        page,
        page_size,
    }))
}

/// GET /api/work/{id}
pub async fn get_work(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<works::WorkRecord>> {
    let work = works::get_work(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("work not found: {}", id)))?;
    Ok(Json(work))
}

/// DELETE /api/work/{id}
pub async fn delete_work(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !works::delete_work(&state.db, &id).await? {
        return Err(ApiError::NotFound(format!("work not found: {}", id)));
    }
    tracing::info!(work_id = %id, "Work deleted from catalog");
    Ok(Json(json!({ "id": id, "deleted": true })))
}

/// GET /api/work/library/status — stored/orphaned delta between the catalog
/// and the library filesystem
pub async fn library_status(
    State(state): State<AppState>,
) -> ApiResult<Json<engine::LibraryStatus>> {
    let scanner = LibraryScanner::new(state.config.clone());
    let status = engine::library_status(&state.db, &scanner)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(status))
}

/// Build work catalog routes
pub fn work_routes() -> Router<AppState> {
    Router::new()
        .route("/api/works", get(list_works))
        .route("/api/work/library/status", get(library_status))
        .route("/api/work/:id", get(get_work).delete(delete_work))
}
