use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::{filter_rules_from_body, SortQuery};
use crate::error::{AppError, AppResult};
use crate::facets::{self, FieldValuesResponse, ValueFacet};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(flatten)]
    pub sort: SortQuery,
}

pub async fn get_field_values(
    State(state): State<AppState>,
    Path(field_id): Path<i64>,
    Query(query): Query<SortQuery>,
) -> AppResult<Json<FieldValuesResponse>> {
    let sort = query.options();
    let response = state
        .with_conn(move |conn| Ok(facets::get_field_values(conn, field_id, &sort)?))
        .await?;
    Ok(Json(response))
}

pub async fn search_field_values(
    State(state): State<AppState>,
    Path(field_id): Path<i64>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<ValueFacet>>> {
    let needle = query.q;
    if needle.is_empty() {
        return Err(AppError::bad_request("query parameter 'q' is required"));
    }
    let sort = query.sort.options();
    let values = state
        .with_conn(move |conn| {
            Ok(facets::search_field_values(conn, field_id, &needle, &sort)?)
        })
        .await?;
    Ok(Json(values))
}

pub async fn get_value_counts(
    State(state): State<AppState>,
    Path(field_id): Path<i64>,
    Query(query): Query<SortQuery>,
    body: Bytes,
) -> AppResult<Json<Vec<ValueFacet>>> {
    let sort = query.options();
    let filter_rules = filter_rules_from_body(&body);
    let values = state
        .with_conn(move |conn| {
            Ok(facets::get_value_counts(conn, field_id, &filter_rules, &sort)?)
        })
        .await?;
    Ok(Json(values))
}
