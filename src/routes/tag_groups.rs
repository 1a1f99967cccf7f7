use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use super::ListResponse;
use crate::error::{AppError, AppResult};
use crate::records::{tag_groups, TagGroup, TagGroupInput, TagGroupPatch};
use crate::state::AppState;
use crate::utils::json::{classify_id_list, classify_string, Patch};

pub async fn list_tag_groups(
    State(state): State<AppState>,
) -> AppResult<Json<ListResponse<TagGroup>>> {
    let groups = state
        .with_conn(|conn| Ok(tag_groups::list_tag_groups(conn)?))
        .await?;
    Ok(Json(groups.into()))
}

pub async fn get_tag_group(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<TagGroup>> {
    let group = state
        .with_conn(move |conn| Ok(tag_groups::get_tag_group(conn, id)?))
        .await?;
    Ok(Json(group))
}

pub async fn create_tag_group(
    State(state): State<AppState>,
    Json(payload): Json<TagGroupInput>,
) -> AppResult<(StatusCode, Json<TagGroup>)> {
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    let group = state
        .with_conn(move |conn| Ok(tag_groups::create_tag_group(conn, payload)?))
        .await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn update_tag_group(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<Value>,
) -> AppResult<Json<TagGroup>> {
    let patch = patch_from_payload(&payload)?;
    let group = state
        .with_conn(move |conn| Ok(tag_groups::update_tag_group(conn, id, patch)?))
        .await?;
    Ok(Json(group))
}

pub async fn delete_tag_group(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    state
        .with_conn(move |conn| Ok(tag_groups::delete_tag_group(conn, id)?))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Blank names are treated as absent; `tag_ids: null` clears membership.
fn patch_from_payload(payload: &Value) -> AppResult<TagGroupPatch> {
    let name = match classify_string(payload.get("name")).map_err(AppError::bad_request)? {
        Patch::Value(name) if !name.trim().is_empty() => Some(name),
        _ => None,
    };
    let description = classify_string(payload.get("description")).map_err(AppError::bad_request)?;
    let tag_ids = match classify_id_list(payload.get("tag_ids")).map_err(AppError::bad_request)? {
        Patch::Omitted => None,
        Patch::Null => Some(Vec::new()),
        Patch::Value(ids) => Some(ids),
    };
    Ok(TagGroupPatch {
        name,
        description,
        tag_ids,
    })
}
