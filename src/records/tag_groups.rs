use std::collections::{BTreeMap, BTreeSet};

use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::QueryableByName;
use serde::{Deserialize, Serialize};

use super::{is_unique_violation, Assignments, StoreError, StoreResult};
use crate::db::{DbConnection, SqlParam};
use crate::utils::json::Patch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGroup {
    pub id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tag_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagGroupInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tag_ids: Vec<i64>,
}

/// Partial update. `description` distinguishes an explicit `null` (clear)
/// from an absent key (keep).
#[derive(Debug, Clone)]
pub struct TagGroupPatch {
    pub name: Option<String>,
    pub description: Patch<String>,
    pub tag_ids: Option<Vec<i64>>,
}

impl Default for TagGroupPatch {
    fn default() -> Self {
        Self {
            name: None,
            description: Patch::Omitted,
            tag_ids: None,
        }
    }
}

#[derive(QueryableByName)]
struct TagGroupRow {
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Nullable<Text>)]
    description: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    created: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    modified: Option<String>,
}

#[derive(QueryableByName)]
struct MembershipRow {
    #[diesel(sql_type = BigInt)]
    tag_group_id: i64,
    #[diesel(sql_type = BigInt)]
    tag_id: i64,
}

fn select_sql(conn: &DbConnection) -> String {
    let dialect = conn.dialect();
    format!(
        "SELECT {} AS id, name, description, {} AS created, {} AS modified FROM tag_groups",
        dialect.cast_bigint("id"),
        dialect.cast_text("created"),
        dialect.cast_text("modified"),
    )
}

fn membership_sql(conn: &DbConnection) -> String {
    let dialect = conn.dialect();
    format!(
        "SELECT {} AS tag_group_id, {} AS tag_id FROM tag_group_memberships",
        dialect.cast_bigint("tag_group_id"),
        dialect.cast_bigint("tag_id"),
    )
}

fn with_members(row: TagGroupRow, tag_ids: Vec<i64>) -> TagGroup {
    TagGroup {
        id: row.id,
        name: row.name,
        description: row.description,
        tag_ids,
        created: row.created,
        modified: row.modified,
    }
}

fn normalize_name(name: &str) -> StoreResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::Validation("name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

fn map_conflict(err: diesel::result::Error, name: &str) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict(format!("tag group with name '{name}' already exists"))
    } else {
        StoreError::Database(err)
    }
}

/// All groups ordered by name, each with its member tag ids ascending.
pub fn list_tag_groups(conn: &mut DbConnection) -> StoreResult<Vec<TagGroup>> {
    let sql = format!("{} ORDER BY name ASC", select_sql(conn));
    let rows = conn.load::<TagGroupRow>(&sql, &[])?;

    let sql = format!("{} ORDER BY tag_group_id, tag_id", membership_sql(conn));
    let mut members: BTreeMap<i64, Vec<i64>> = BTreeMap::new();
    for membership in conn.load::<MembershipRow>(&sql, &[])? {
        members
            .entry(membership.tag_group_id)
            .or_default()
            .push(membership.tag_id);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let tag_ids = members.remove(&row.id).unwrap_or_default();
            with_members(row, tag_ids)
        })
        .collect())
}

pub fn get_tag_group(conn: &mut DbConnection, id: i64) -> StoreResult<TagGroup> {
    let placeholder = conn.dialect().placeholder(1);
    let sql = format!("{} WHERE id = {placeholder}", select_sql(conn));
    let row = conn
        .load_optional::<TagGroupRow>(&sql, &[SqlParam::Int(id)])?
        .ok_or_else(|| StoreError::NotFound(format!("tag group {id}")))?;

    let sql = format!(
        "{} WHERE tag_group_id = {placeholder} ORDER BY tag_id",
        membership_sql(conn)
    );
    let tag_ids = conn
        .load::<MembershipRow>(&sql, &[SqlParam::Int(id)])?
        .into_iter()
        .map(|membership| membership.tag_id)
        .collect();
    Ok(with_members(row, tag_ids))
}

pub fn create_tag_group(conn: &mut DbConnection, input: TagGroupInput) -> StoreResult<TagGroup> {
    let name = normalize_name(&input.name)?;

    let mut row = Assignments::new(conn.dialect());
    row.push("name", SqlParam::Text(name.clone()));
    row.push("description", SqlParam::NullableText(input.description));
    let sql = row.insert_sql("tag_groups");
    let id = conn
        .insert_returning_id(&sql, &row.into_params())
        .map_err(|err| map_conflict(err, &name))?;

    replace_memberships(conn, id, &input.tag_ids)?;
    tracing::info!(tag_group_id = id, tags = input.tag_ids.len(), "created tag group");
    get_tag_group(conn, id)
}

pub fn update_tag_group(
    conn: &mut DbConnection,
    id: i64,
    patch: TagGroupPatch,
) -> StoreResult<TagGroup> {
    get_tag_group(conn, id)?;

    let mut changes = Assignments::new(conn.dialect());
    let name = match patch.name.as_deref() {
        Some(name) => Some(normalize_name(name)?),
        None => None,
    };
    if let Some(name) = &name {
        changes.push("name", SqlParam::Text(name.clone()));
    }
    match patch.description {
        Patch::Omitted => {}
        Patch::Null => changes.push("description", SqlParam::NullableText(None)),
        Patch::Value(description) => changes.push("description", SqlParam::Text(description)),
    }

    if !changes.is_empty() || patch.tag_ids.is_some() {
        changes.push_expression("modified", "CURRENT_TIMESTAMP");
        let key = changes.next_placeholder(SqlParam::Int(id));
        let sql = format!("UPDATE tag_groups SET {} WHERE id = {key}", changes.set_clause());
        conn.execute(&sql, &changes.into_params())
            .map_err(|err| map_conflict(err, name.as_deref().unwrap_or_default()))?;
    }

    if let Some(tag_ids) = &patch.tag_ids {
        replace_memberships(conn, id, tag_ids)?;
    }

    tracing::info!(tag_group_id = id, "updated tag group");
    get_tag_group(conn, id)
}

pub fn delete_tag_group(conn: &mut DbConnection, id: i64) -> StoreResult<()> {
    let placeholder = conn.dialect().placeholder(1);
    conn.execute(
        &format!("DELETE FROM tag_group_memberships WHERE tag_group_id = {placeholder}"),
        &[SqlParam::Int(id)],
    )?;
    let deleted = conn.execute(
        &format!("DELETE FROM tag_groups WHERE id = {placeholder}"),
        &[SqlParam::Int(id)],
    )?;
    if deleted == 0 {
        return Err(StoreError::NotFound(format!("tag group {id}")));
    }
    tracing::info!(tag_group_id = id, "deleted tag group");
    Ok(())
}

fn replace_memberships(conn: &mut DbConnection, group_id: i64, tag_ids: &[i64]) -> StoreResult<()> {
    let dialect = conn.dialect();
    conn.execute(
        &format!(
            "DELETE FROM tag_group_memberships WHERE tag_group_id = {}",
            dialect.placeholder(1)
        ),
        &[SqlParam::Int(group_id)],
    )?;

    let insert = format!(
        "INSERT INTO tag_group_memberships (tag_group_id, tag_id) VALUES ({}, {})",
        dialect.placeholder(1),
        dialect.placeholder(2)
    );
    let unique: BTreeSet<i64> = tag_ids.iter().copied().collect();
    for tag_id in unique {
        conn.execute(&insert, &[SqlParam::Int(group_id), SqlParam::Int(tag_id)])?;
    }
    Ok(())
}
