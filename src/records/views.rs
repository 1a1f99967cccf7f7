use std::collections::BTreeMap;

use diesel::sql_types::{BigInt, Bool, Nullable, Text};
use diesel::QueryableByName;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Assignments, StoreError, StoreResult};
use crate::db::{DbConnection, SqlParam};
use crate::utils::fallback::FailOpen;

/// A saved document table layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomView {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub column_order: Vec<Value>,
    pub column_sizing: BTreeMap<String, i64>,
    pub column_visibility: BTreeMap<String, bool>,
    pub column_display_types: BTreeMap<String, String>,
    pub filter_rules: Vec<Value>,
    pub filter_visibility: BTreeMap<String, bool>,
    pub filter_types: BTreeMap<String, String>,
    pub edit_mode_settings: Map<String, Value>,
    pub column_styles: BTreeMap<String, String>,
    pub subrow_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subrow_content: Option<String>,
    pub column_spanning: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_field: Option<String>,
    pub sort_reverse: bool,
    pub is_global: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

/// Body of a create or update request; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CustomViewInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub column_order: Option<Vec<Value>>,
    pub column_sizing: Option<BTreeMap<String, i64>>,
    pub column_visibility: Option<BTreeMap<String, bool>>,
    pub column_display_types: Option<BTreeMap<String, String>>,
    pub filter_rules: Option<Vec<Value>>,
    pub filter_visibility: Option<BTreeMap<String, bool>>,
    pub filter_types: Option<BTreeMap<String, String>>,
    pub edit_mode_settings: Option<Map<String, Value>>,
    pub column_styles: Option<BTreeMap<String, String>>,
    pub subrow_enabled: Option<bool>,
    pub subrow_content: Option<String>,
    pub column_spanning: Option<BTreeMap<String, bool>>,
    pub sort_field: Option<String>,
    pub sort_reverse: Option<bool>,
    pub is_global: Option<bool>,
}

#[derive(QueryableByName)]
struct CustomViewRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Nullable<Text>)]
    description: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    column_order: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    column_sizing: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    column_visibility: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    column_display_types: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    filter_rules: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    filter_visibility: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    filter_types: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    edit_mode_settings: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    column_styles: Option<String>,
    #[diesel(sql_type = Bool)]
    subrow_enabled: bool,
    #[diesel(sql_type = Nullable<Text>)]
    subrow_content: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    column_spanning: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    sort_field: Option<String>,
    #[diesel(sql_type = Bool)]
    sort_reverse: bool,
    #[diesel(sql_type = Bool)]
    is_global: bool,
    #[diesel(sql_type = Nullable<BigInt>)]
    owner_id: Option<i64>,
    #[diesel(sql_type = Nullable<Text>)]
    username: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    created: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    modified: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    deleted_at: Option<String>,
}

const JSON_COLUMNS: [&str; 10] = [
    "column_order",
    "column_sizing",
    "column_visibility",
    "column_display_types",
    "filter_rules",
    "filter_visibility",
    "filter_types",
    "edit_mode_settings",
    "column_styles",
    "column_spanning",
];

fn json_column<T: DeserializeOwned + Default>(raw: Option<String>, column: &str) -> T {
    match raw {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
            .fail_open(&format!("unreadable custom view column {column}")),
        _ => T::default(),
    }
}

impl From<CustomViewRow> for CustomView {
    fn from(row: CustomViewRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            column_order: json_column(row.column_order, "column_order"),
            column_sizing: json_column(row.column_sizing, "column_sizing"),
            column_visibility: json_column(row.column_visibility, "column_visibility"),
            column_display_types: json_column(row.column_display_types, "column_display_types"),
            filter_rules: json_column(row.filter_rules, "filter_rules"),
            filter_visibility: json_column(row.filter_visibility, "filter_visibility"),
            filter_types: json_column(row.filter_types, "filter_types"),
            edit_mode_settings: json_column(row.edit_mode_settings, "edit_mode_settings"),
            column_styles: json_column(row.column_styles, "column_styles"),
            subrow_enabled: row.subrow_enabled,
            subrow_content: row.subrow_content,
            column_spanning: json_column(row.column_spanning, "column_spanning"),
            sort_field: row.sort_field,
            sort_reverse: row.sort_reverse,
            is_global: row.is_global,
            owner_id: row.owner_id,
            username: row.username,
            created: row.created,
            modified: row.modified,
            deleted_at: row.deleted_at,
        }
    }
}

fn select_sql(conn: &DbConnection) -> String {
    let dialect = conn.dialect();
    let json_columns: Vec<String> = JSON_COLUMNS
        .iter()
        .map(|column| format!("{} AS {column}", dialect.cast_text(column)))
        .collect();
    format!(
        "SELECT {id} AS id, name, description, {json_columns}, subrow_enabled, subrow_content, \
         sort_field, sort_reverse, is_global, {owner} AS owner_id, username, \
         {created} AS created, {modified} AS modified, {deleted} AS deleted_at \
         FROM custom_views",
        id = dialect.cast_bigint("id"),
        json_columns = json_columns.join(", "),
        owner = dialect.cast_bigint("owner_id"),
        created = dialect.cast_text("created"),
        modified = dialect.cast_text("modified"),
        deleted = dialect.cast_text("deleted_at"),
    )
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// Views owned by `user_id`, plus global ones when `include_global`,
/// newest first.
pub fn list_views(
    conn: &mut DbConnection,
    user_id: i64,
    include_global: bool,
) -> StoreResult<Vec<CustomView>> {
    let dialect = conn.dialect();
    let owner = dialect.placeholder(1);
    let scope = if include_global {
        format!("(owner_id = {owner} OR is_global = {})", dialect.true_literal())
    } else {
        format!("owner_id = {owner}")
    };
    let sql = format!(
        "{} WHERE deleted_at IS NULL AND {scope} ORDER BY created DESC, id DESC",
        select_sql(conn)
    );
    let rows = conn.load::<CustomViewRow>(&sql, &[SqlParam::Int(user_id)])?;
    Ok(rows.into_iter().map(CustomView::from).collect())
}

pub fn get_view(conn: &mut DbConnection, id: i64) -> StoreResult<CustomView> {
    let sql = format!(
        "{} WHERE id = {} AND deleted_at IS NULL",
        select_sql(conn),
        conn.dialect().placeholder(1)
    );
    conn.load_optional::<CustomViewRow>(&sql, &[SqlParam::Int(id)])?
        .map(CustomView::from)
        .ok_or_else(|| StoreError::NotFound(format!("custom view {id}")))
}

pub fn create_view(
    conn: &mut DbConnection,
    input: CustomViewInput,
    user_id: i64,
    username: &str,
) -> StoreResult<CustomView> {
    let name = input
        .name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| StoreError::Validation("name is required".to_string()))?
        .to_string();

    let mut row = Assignments::new(conn.dialect());
    row.push("name", SqlParam::Text(name));
    row.push("description", SqlParam::NullableText(input.description));
    row.push_json("column_order", to_json(&input.column_order.unwrap_or_default()));
    row.push_json("column_sizing", to_json(&input.column_sizing.unwrap_or_default()));
    row.push_json(
        "column_visibility",
        to_json(&input.column_visibility.unwrap_or_default()),
    );
    row.push_json(
        "column_display_types",
        to_json(&input.column_display_types.unwrap_or_default()),
    );
    row.push_json("filter_rules", to_json(&input.filter_rules.unwrap_or_default()));
    row.push_json(
        "filter_visibility",
        to_json(&input.filter_visibility.unwrap_or_default()),
    );
    row.push_json("filter_types", to_json(&input.filter_types.unwrap_or_default()));
    row.push_json(
        "edit_mode_settings",
        to_json(&input.edit_mode_settings.unwrap_or_default()),
    );
    row.push_json("column_styles", to_json(&input.column_styles.unwrap_or_default()));
    row.push("subrow_enabled", SqlParam::Bool(input.subrow_enabled.unwrap_or(false)));
    row.push("subrow_content", SqlParam::NullableText(input.subrow_content));
    row.push_json(
        "column_spanning",
        to_json(&input.column_spanning.unwrap_or_default()),
    );
    row.push("sort_field", SqlParam::NullableText(input.sort_field));
    row.push("sort_reverse", SqlParam::Bool(input.sort_reverse.unwrap_or(false)));
    row.push("is_global", SqlParam::Bool(input.is_global.unwrap_or(false)));
    row.push("owner_id", SqlParam::Int(user_id));
    row.push("username", SqlParam::Text(username.to_string()));

    let sql = row.insert_sql("custom_views");
    let id = conn.insert_returning_id(&sql, &row.into_params())?;
    tracing::info!(view_id = id, user_id, "created custom view");
    get_view(conn, id)
}

/// Applies the fields present in `input`. Views owned by someone else can
/// only be changed when they are global.
pub fn update_view(
    conn: &mut DbConnection,
    id: i64,
    input: CustomViewInput,
    user_id: i64,
) -> StoreResult<CustomView> {
    let existing = get_view(conn, id)?;
    if existing.owner_id.is_some_and(|owner| owner != user_id) && !existing.is_global {
        return Err(StoreError::Forbidden(
            "permission denied: view belongs to another user".to_string(),
        ));
    }

    let mut changes = Assignments::new(conn.dialect());
    if let Some(name) = input.name.as_deref().map(str::trim).filter(|name| !name.is_empty()) {
        changes.push("name", SqlParam::Text(name.to_string()));
    }
    if let Some(description) = input.description {
        changes.push("description", SqlParam::Text(description));
    }
    if let Some(value) = input.column_order {
        changes.push_json("column_order", to_json(&value));
    }
    if let Some(value) = input.column_sizing {
        changes.push_json("column_sizing", to_json(&value));
    }
    if let Some(value) = input.column_visibility {
        changes.push_json("column_visibility", to_json(&value));
    }
    if let Some(value) = input.column_display_types {
        changes.push_json("column_display_types", to_json(&value));
    }
    if let Some(value) = input.filter_rules {
        changes.push_json("filter_rules", to_json(&value));
    }
    if let Some(value) = input.filter_visibility {
        changes.push_json("filter_visibility", to_json(&value));
    }
    if let Some(value) = input.filter_types {
        changes.push_json("filter_types", to_json(&value));
    }
    if let Some(value) = input.edit_mode_settings {
        changes.push_json("edit_mode_settings", to_json(&value));
    }
    if let Some(value) = input.column_styles {
        changes.push_json("column_styles", to_json(&value));
    }
    if let Some(value) = input.subrow_enabled {
        changes.push("subrow_enabled", SqlParam::Bool(value));
    }
    if let Some(value) = input.subrow_content {
        changes.push("subrow_content", SqlParam::Text(value));
    }
    if let Some(value) = input.column_spanning {
        changes.push_json("column_spanning", to_json(&value));
    }
    if let Some(value) = input.sort_field {
        changes.push("sort_field", SqlParam::Text(value));
    }
    if let Some(value) = input.sort_reverse {
        changes.push("sort_reverse", SqlParam::Bool(value));
    }
    if let Some(value) = input.is_global {
        changes.push("is_global", SqlParam::Bool(value));
    }

    if changes.is_empty() {
        return Ok(existing);
    }

    changes.push_expression("modified", "CURRENT_TIMESTAMP");
    let key = changes.next_placeholder(SqlParam::Int(id));
    let sql = format!("UPDATE custom_views SET {} WHERE id = {key}", changes.set_clause());
    conn.execute(&sql, &changes.into_params())?;
    tracing::info!(view_id = id, user_id, "updated custom view");
    get_view(conn, id)
}

/// Soft-deletes a view. Only its owner may delete it.
pub fn delete_view(conn: &mut DbConnection, id: i64, user_id: i64) -> StoreResult<()> {
    let existing = get_view(conn, id)?;
    if existing.owner_id.is_some_and(|owner| owner != user_id) {
        return Err(StoreError::Forbidden(
            "permission denied: view belongs to another user".to_string(),
        ));
    }

    let sql = format!(
        "UPDATE custom_views SET deleted_at = CURRENT_TIMESTAMP WHERE id = {}",
        conn.dialect().placeholder(1)
    );
    conn.execute(&sql, &[SqlParam::Int(id)])?;
    tracing::info!(view_id = id, user_id, "deleted custom view");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreadable_json_columns_fall_back_to_empty() {
        let sizing: BTreeMap<String, i64> = json_column(Some("{broken".to_string()), "column_sizing");
        assert!(sizing.is_empty());
        let order: Vec<Value> = json_column(None, "column_order");
        assert!(order.is_empty());
        let visibility: BTreeMap<String, bool> =
            json_column(Some(r#"{"title": true}"#.to_string()), "column_visibility");
        assert_eq!(visibility.get("title"), Some(&true));
    }

    #[test]
    fn input_fields_are_optional() {
        let input: CustomViewInput = serde_json::from_str(r#"{"name": "Inbox"}"#).unwrap();
        assert_eq!(input.name.as_deref(), Some("Inbox"));
        assert!(input.column_order.is_none());
        assert!(input.is_global.is_none());
    }
}
