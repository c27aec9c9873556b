//! Management API: CRUD over the local registry view.
//!
//! Mirrors the registry operations one to one; conflict and lookup errors
//! surface as 409/404 with the gateway's JSON error shape.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::context::AppContext;
use crate::error::AppResult;
use crate::registry::definition::ApiDefinition;

/// Definition plus its registry key, as returned to admin callers
#[derive(Debug, Serialize)]
pub struct ApiEntry {
    pub id: String,
    #[serde(flatten)]
    pub definition: ApiDefinition,
}

/// GET /apis
pub async fn list_apis(State(ctx): State<Arc<AppContext>>) -> Json<Vec<ApiEntry>> {
    let entries = ctx
        .registry
        .list_apis()
        .into_iter()
        .map(|(id, definition)| ApiEntry { id, definition })
        .collect();
    Json(entries)
}

/// GET /apis/:api_id
pub async fn get_api(
    State(ctx): State<Arc<AppContext>>,
    Path(api_id): Path<String>,
) -> AppResult<Json<ApiEntry>> {
    let definition = ctx
        .registry
        .get_api(&api_id)
        .ok_or_else(|| crate::error::AppError::NotFound(api_id.clone()))?;
    Ok(Json(ApiEntry {
        id: api_id,
        definition,
    }))
}

/// POST /apis/:api_id
pub async fn add_api(
    State(ctx): State<Arc<AppContext>>,
    Path(api_id): Path<String>,
    Json(definition): Json<ApiDefinition>,
) -> AppResult<(StatusCode, Json<ApiEntry>)> {
    let stored = ctx.registry.add_api(&api_id, definition)?;
    Ok((
        StatusCode::CREATED,
        Json(ApiEntry {
            id: api_id,
            definition: stored,
        }),
    ))
}

/// PUT /apis/:api_id
pub async fn update_api(
    State(ctx): State<Arc<AppContext>>,
    Path(api_id): Path<String>,
    Json(definition): Json<ApiDefinition>,
) -> AppResult<Json<ApiEntry>> {
    let stored = ctx.registry.update_api(&api_id, definition)?;
    Ok(Json(ApiEntry {
        id: api_id,
        definition: stored,
    }))
}

/// DELETE /apis/:api_id
pub async fn delete_api(
    State(ctx): State<Arc<AppContext>>,
    Path(api_id): Path<String>,
) -> AppResult<StatusCode> {
    ctx.registry.delete_api(&api_id)?;
    Ok(StatusCode::NO_CONTENT)
}
