use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;

use super::ListResponse;
use crate::auth::RequestIdentity;
use crate::error::AppResult;
use crate::records::{views, CustomView, CustomViewInput};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListViewsQuery {
    pub global_only: Option<String>,
}

pub async fn list_views(
    State(state): State<AppState>,
    Query(query): Query<ListViewsQuery>,
    identity: RequestIdentity,
) -> AppResult<Json<ListResponse<CustomView>>> {
    let include_global = query.global_only.as_deref() != Some("true");
    let results = state
        .with_conn(move |conn| Ok(views::list_views(conn, identity.user_id, include_global)?))
        .await?;
    Ok(Json(results.into()))
}

pub async fn get_view(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<CustomView>> {
    let view = state
        .with_conn(move |conn| Ok(views::get_view(conn, id)?))
        .await?;
    Ok(Json(view))
}

pub async fn create_view(
    State(state): State<AppState>,
    identity: RequestIdentity,
    Json(payload): Json<CustomViewInput>,
) -> AppResult<(StatusCode, Json<CustomView>)> {
    let view = state
        .with_conn(move |conn| {
            Ok(views::create_view(
                conn,
                payload,
                identity.user_id,
                &identity.username,
            )?)
        })
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn update_view(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    identity: RequestIdentity,
    Json(payload): Json<CustomViewInput>,
) -> AppResult<Json<CustomView>> {
    let view = state
        .with_conn(move |conn| Ok(views::update_view(conn, id, payload, identity.user_id)?))
        .await?;
    Ok(Json(view))
}

pub async fn delete_view(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    identity: RequestIdentity,
) -> AppResult<StatusCode> {
    state
        .with_conn(move |conn| Ok(views::delete_view(conn, id, identity.user_id)?))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
