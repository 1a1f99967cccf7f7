use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::QueryableByName;
use serde::{Deserialize, Serialize};

use super::StoreResult;
use crate::db::{DbConnection, SqlParam};

/// Free-text notes attached to a tag. A tag without a stored description
/// reads back as just its `tag_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, QueryableByName)]
pub struct TagDescription {
    #[diesel(sql_type = BigInt)]
    pub tag_id: i64,
    #[diesel(sql_type = Nullable<Text>)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[diesel(sql_type = Nullable<Text>)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

impl TagDescription {
    fn empty(tag_id: i64) -> Self {
        Self {
            tag_id,
            description: None,
            created: None,
            modified: None,
        }
    }
}

fn find(conn: &mut DbConnection, tag_id: i64) -> StoreResult<Option<TagDescription>> {
    let dialect = conn.dialect();
    let sql = format!(
        "SELECT {} AS tag_id, description, {} AS created, {} AS modified \
         FROM tag_descriptions WHERE tag_id = {}",
        dialect.cast_bigint("tag_id"),
        dialect.cast_text("created"),
        dialect.cast_text("modified"),
        dialect.placeholder(1),
    );
    Ok(conn.load_optional::<TagDescription>(&sql, &[SqlParam::Int(tag_id)])?)
}

pub fn get_tag_description(conn: &mut DbConnection, tag_id: i64) -> StoreResult<TagDescription> {
    Ok(find(conn, tag_id)?.unwrap_or_else(|| TagDescription::empty(tag_id)))
}

/// Inserts or replaces the description for `tag_id`.
pub fn set_tag_description(
    conn: &mut DbConnection,
    tag_id: i64,
    description: Option<String>,
) -> StoreResult<TagDescription> {
    let dialect = conn.dialect();
    let params = [SqlParam::NullableText(description), SqlParam::Int(tag_id)];
    let updated = conn.execute(
        &format!(
            "UPDATE tag_descriptions SET description = {}, modified = CURRENT_TIMESTAMP \
             WHERE tag_id = {}",
            dialect.placeholder(1),
            dialect.placeholder(2)
        ),
        &params,
    )?;
    if updated == 0 {
        conn.execute(
            &format!(
                "INSERT INTO tag_descriptions (description, tag_id) VALUES ({}, {})",
                dialect.placeholder(1),
                dialect.placeholder(2)
            ),
            &params,
        )?;
        tracing::info!(tag_id, "created tag description");
    }
    get_tag_description(conn, tag_id)
}

/// Removes the description. Deleting one that does not exist is not an error.
pub fn delete_tag_description(conn: &mut DbConnection, tag_id: i64) -> StoreResult<()> {
    let sql = format!(
        "DELETE FROM tag_descriptions WHERE tag_id = {}",
        conn.dialect().placeholder(1)
    );
    conn.execute(&sql, &[SqlParam::Int(tag_id)])?;
    Ok(())
}
