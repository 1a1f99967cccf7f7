use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use crate::error::AppResult;
use crate::records::{tag_descriptions, TagDescription};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetTagDescriptionRequest {
    #[serde(default)]
    pub description: Option<String>,
}

pub async fn get_tag_description(
    State(state): State<AppState>,
    Path(tag_id): Path<i64>,
) -> AppResult<Json<TagDescription>> {
    let description = state
        .with_conn(move |conn| Ok(tag_descriptions::get_tag_description(conn, tag_id)?))
        .await?;
    Ok(Json(description))
}

pub async fn set_tag_description(
    State(state): State<AppState>,
    Path(tag_id): Path<i64>,
    Json(payload): Json<SetTagDescriptionRequest>,
) -> AppResult<Json<TagDescription>> {
    let description = state
        .with_conn(move |conn| {
            Ok(tag_descriptions::set_tag_description(
                conn,
                tag_id,
                payload.description,
            )?)
        })
        .await?;
    Ok(Json(description))
}

pub async fn delete_tag_description(
    State(state): State<AppState>,
    Path(tag_id): Path<i64>,
) -> AppResult<StatusCode> {
    state
        .with_conn(move |conn| Ok(tag_descriptions::delete_tag_description(conn, tag_id)?))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
