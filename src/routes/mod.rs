use axum::{
    body::Bytes,
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::facets::SortOptions;
use crate::state::AppState;

pub mod builtin_filters;
pub mod custom_field_values;
pub mod custom_views;
pub mod health;
pub mod tag_descriptions;
pub mod tag_groups;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .filter_map(|value| match value.parse::<HeaderValue>() {
                Ok(header) => Some(header),
                Err(err) => {
                    tracing::warn!(origin = value, error = %err, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let field_value_routes = Router::new()
        .route("/:field_id/", get(custom_field_values::get_field_values))
        .route(
            "/:field_id/search/",
            get(custom_field_values::search_field_values),
        )
        .route(
            "/:field_id/counts/",
            post(custom_field_values::get_value_counts),
        );

    let builtin_filter_routes = Router::new().route(
        "/:filter_type/",
        post(builtin_filters::get_builtin_filter_values),
    );

    let custom_view_routes = Router::new().route(
        "/:id/",
        get(custom_views::get_view)
            .put(custom_views::update_view)
            .patch(custom_views::update_view)
            .delete(custom_views::delete_view),
    );

    let tag_group_routes = Router::new().route(
        "/:id/",
        get(tag_groups::get_tag_group)
            .put(tag_groups::update_tag_group)
            .patch(tag_groups::update_tag_group)
            .delete(tag_groups::delete_tag_group),
    );

    let tag_description_routes = Router::new().route(
        "/:tag_id/",
        get(tag_descriptions::get_tag_description)
            .put(tag_descriptions::set_tag_description)
            .post(tag_descriptions::set_tag_description)
            .delete(tag_descriptions::delete_tag_description),
    );

    // A nested "/" only matches the prefix without a trailing slash, so the
    // collection endpoints are registered on the outer router.
    Router::new()
        .route(
            "/api/custom_views/",
            get(custom_views::list_views).post(custom_views::create_view),
        )
        .route(
            "/api/tag-groups/",
            get(tag_groups::list_tag_groups).post(tag_groups::create_tag_group),
        )
        .nest("/api/custom-field-values", field_value_routes)
        .nest("/api/builtin-filter-values", builtin_filter_routes)
        .nest("/api/custom_views", custom_view_routes)
        .nest("/api/tag-groups", tag_group_routes)
        .nest("/api/tag-descriptions", tag_description_routes)
        .route("/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
}

/// Paginated-style envelope used by the list endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub results: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(results: Vec<T>) -> Self {
        Self {
            count: results.len(),
            results,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SortQuery {
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub ignore_case: Option<String>,
}

impl SortQuery {
    pub fn options(&self) -> SortOptions {
        let ignore_case = self
            .ignore_case
            .as_deref()
            .is_some_and(|value| value == "true" || value == "1");
        SortOptions::from_params(
            self.sort_by.as_deref(),
            self.sort_order.as_deref(),
            ignore_case,
        )
    }
}

/// Extracts `filter_rules` from a facet request body as the JSON text the
/// engines take. A missing or unreadable body yields no rules.
pub(crate) fn filter_rules_from_body(body: &Bytes) -> String {
    if body.is_empty() {
        return String::new();
    }
    let payload: Value = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(err) => {
            tracing::warn!(error = %err, "ignoring unreadable facet request body");
            return String::new();
        }
    };
    match payload.get("filter_rules") {
        Some(Value::String(raw)) => raw.clone(),
        Some(Value::Null) | None => String::new(),
        Some(rules) => rules.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facets::values::{SortBy, SortOrder};

    #[test]
    fn reads_filter_rules_from_body() {
        let body = Bytes::from_static(br#"{"filter_rules":[{"rule_type":3,"value":"4"}]}"#);
        assert_eq!(
            filter_rules_from_body(&body),
            r#"[{"rule_type":3,"value":"4"}]"#
        );
        assert_eq!(filter_rules_from_body(&Bytes::new()), "");
        assert_eq!(filter_rules_from_body(&Bytes::from_static(b"not json")), "");
        assert_eq!(filter_rules_from_body(&Bytes::from_static(b"{}")), "");
    }

    #[test]
    fn ignore_case_accepts_true_or_one() {
        let query = SortQuery {
            sort_by: Some("label".to_string()),
            sort_order: None,
            ignore_case: Some("1".to_string()),
        };
        let options = query.options();
        assert!(options.ignore_case);
        assert_eq!(options.sort_by, SortBy::Label);
        assert_eq!(options.sort_order, SortOrder::Asc);

        let query = SortQuery {
            ignore_case: Some("yes".to_string()),
            ..SortQuery::default()
        };
        assert!(!query.options().ignore_case);
    }
}
