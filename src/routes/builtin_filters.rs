use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};

use super::filter_rules_from_body;
use crate::error::AppResult;
use crate::facets::{self, BuiltinValueFacet};
use crate::state::AppState;

pub async fn get_builtin_filter_values(
    State(state): State<AppState>,
    Path(filter_type): Path<String>,
    body: Bytes,
) -> AppResult<Json<Vec<BuiltinValueFacet>>> {
    let filter_rules = filter_rules_from_body(&body);
    let values = state
        .with_conn(move |conn| {
            Ok(facets::get_builtin_filter_values(
                conn,
                &filter_type,
                &filter_rules,
            )?)
        })
        .await?;
    Ok(Json(values))
}
