//! Value/count facets for filter UIs.

pub mod builtin;
pub mod custom_fields;
pub mod values;

use thiserror::Error;

pub use builtin::{get_builtin_filter_values, BuiltinFilterType, BuiltinValueFacet};
pub use custom_fields::{
    get_field_values, get_value_counts, search_field_values, FieldValuesResponse,
};
pub use values::{decompose, sort_values, value_id, SortOptions, ValueFacet};

#[derive(Debug, Error)]
pub enum FacetError {
    #[error("custom field with id {0} not found")]
    FieldNotFound(i64),
    #[error("unsupported filter type: {0}")]
    UnsupportedFilterType(String),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}
