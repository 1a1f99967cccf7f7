//! Tables owned by this service: saved custom views, tag groups and tag
//! descriptions.

pub mod tag_descriptions;
pub mod tag_groups;
pub mod views;

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

use crate::db::SqlParam;
use crate::dialect::SqlDialect;

pub use tag_descriptions::TagDescription;
pub use tag_groups::{TagGroup, TagGroupInput, TagGroupPatch};
pub use views::{CustomView, CustomViewInput};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub(crate) fn is_unique_violation(err: &DieselError) -> bool {
    matches!(
        err,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

/// Column/value pairs for an `INSERT` or `UPDATE ... SET`, numbering
/// placeholders in the order values are pushed.
pub(crate) struct Assignments {
    dialect: &'static dyn SqlDialect,
    columns: Vec<&'static str>,
    values: Vec<String>,
    params: Vec<SqlParam>,
}

impl Assignments {
    pub fn new(dialect: &'static dyn SqlDialect) -> Self {
        Self {
            dialect,
            columns: Vec::new(),
            values: Vec::new(),
            params: Vec::new(),
        }
    }

    pub fn push(&mut self, column: &'static str, param: SqlParam) {
        let placeholder = self.next_placeholder(param);
        self.columns.push(column);
        self.values.push(placeholder);
    }

    /// Binds serialized JSON for a JSON column.
    pub fn push_json(&mut self, column: &'static str, json: String) {
        let placeholder = self.next_placeholder(SqlParam::Text(json));
        self.columns.push(column);
        self.values.push(self.dialect.json_value(&placeholder));
    }

    /// A raw SQL expression with no parameter, e.g. `CURRENT_TIMESTAMP`.
    pub fn push_expression(&mut self, column: &'static str, expression: &str) {
        self.columns.push(column);
        self.values.push(expression.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Binds a value that follows the assignments, e.g. a `WHERE` key.
    pub fn next_placeholder(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        self.dialect.placeholder(self.params.len())
    }

    pub fn insert_sql(&self, table: &str) -> String {
        format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            self.columns.join(", "),
            self.values.join(", ")
        )
    }

    pub fn set_clause(&self) -> String {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(column, value)| format!("{column} = {value}"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn into_params(self) -> Vec<SqlParam> {
        self.params
    }
}
