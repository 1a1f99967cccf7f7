use std::fmt;
use std::str::FromStr;

use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::QueryableByName;
use serde::{Deserialize, Serialize};

use super::FacetError;
use crate::db::DbConnection;
use crate::dialect::SqlDialect;
use crate::filters::{parse_filter_rules, BuiltinRule, CompiledFilter, FilterCompiler};
use crate::utils::fallback::FailOpen;

/// A system field that facets can be computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinFilterType {
    Correspondent,
    DocumentType,
    Tag,
    StoragePath,
    Owner,
    Asn,
}

impl BuiltinFilterType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Correspondent => "correspondent",
            Self::DocumentType => "document_type",
            Self::Tag => "tag",
            Self::StoragePath => "storage_path",
            Self::Owner => "owner",
            Self::Asn => "asn",
        }
    }

    /// The filter rule that targets this field, skipped when faceting it.
    pub fn rule(self) -> BuiltinRule {
        match self {
            Self::Correspondent => BuiltinRule::Correspondent,
            Self::DocumentType => BuiltinRule::DocumentType,
            Self::Tag => BuiltinRule::HasTagsAny,
            Self::StoragePath => BuiltinRule::StoragePath,
            Self::Owner => BuiltinRule::OwnerAny,
            Self::Asn => BuiltinRule::Asn,
        }
    }
}

impl FromStr for BuiltinFilterType {
    type Err = FacetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value {
            "correspondent" => Self::Correspondent,
            "document_type" => Self::DocumentType,
            "tag" => Self::Tag,
            "storage_path" => Self::StoragePath,
            "owner" => Self::Owner,
            "asn" => Self::Asn,
            other => return Err(FacetError::UnsupportedFilterType(other.to_string())),
        })
    }
}

impl fmt::Display for BuiltinFilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltinValueFacet {
    pub id: i64,
    pub label: String,
    pub count: i64,
}

#[derive(QueryableByName)]
struct BuiltinValueRow {
    #[diesel(sql_type = Nullable<BigInt>)]
    id: Option<i64>,
    #[diesel(sql_type = Nullable<Text>)]
    label: Option<String>,
    #[diesel(sql_type = BigInt)]
    doc_count: i64,
}

/// Document counts per correspondent, document type, tag, storage path,
/// owner or ASN, most used first.
pub fn get_builtin_filter_values(
    conn: &mut DbConnection,
    filter_type: &str,
    filter_rules: &str,
) -> Result<Vec<BuiltinValueFacet>, FacetError> {
    let filter_type: BuiltinFilterType = filter_type.parse()?;
    let rules = parse_filter_rules(filter_rules).fail_open("ignoring malformed filter rules");

    let dialect = conn.dialect();
    let filter = if rules.is_empty() {
        CompiledFilter::default()
    } else {
        FilterCompiler::new(dialect, &mut *conn)
            .excluding_rule(filter_type.rule())
            .compile_rules(&rules)
    };

    let sql = builtin_query(dialect, filter_type, &filter);
    let rows = conn.load::<BuiltinValueRow>(&sql, &filter.params)?;

    let values: Vec<BuiltinValueFacet> = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id?;
            Some(BuiltinValueFacet {
                id,
                label: row.label.unwrap_or_else(|| id.to_string()),
                count: row.doc_count,
            })
        })
        .collect();

    tracing::debug!(
        filter_type = %filter_type,
        values = values.len(),
        filtered = !filter.is_empty(),
        "aggregated builtin filter values"
    );
    Ok(values)
}

fn builtin_query(
    dialect: &dyn SqlDialect,
    filter_type: BuiltinFilterType,
    filter: &CompiledFilter,
) -> String {
    let (table, document_column) = match filter_type {
        BuiltinFilterType::Correspondent => ("documents_correspondent", "correspondent_id"),
        BuiltinFilterType::DocumentType => ("documents_documenttype", "document_type_id"),
        BuiltinFilterType::StoragePath => ("documents_storagepath", "storage_path_id"),
        BuiltinFilterType::Tag => return tag_query(dialect, filter),
        BuiltinFilterType::Owner => return document_column_query(dialect, "d.owner_id", filter),
        BuiltinFilterType::Asn => {
            return document_column_query(dialect, "d.archive_serial_number", filter)
        }
    };

    let select = format!(
        "SELECT {} AS id, x.name AS label, COUNT(DISTINCT d.id) AS doc_count FROM {table} x",
        dialect.cast_bigint("x.id")
    );
    let join = format!("JOIN documents_document d ON d.{document_column} = x.id AND d.deleted_at IS NULL");
    if filter.is_empty() {
        format!(
            "{select} LEFT {join} GROUP BY x.id, x.name \
             HAVING COUNT(DISTINCT d.id) > 0 ORDER BY doc_count DESC, x.name ASC"
        )
    } else {
        format!(
            "{select} INNER {join} WHERE {} GROUP BY x.id, x.name \
             ORDER BY doc_count DESC, x.name ASC",
            filter.sql
        )
    }
}

fn tag_query(dialect: &dyn SqlDialect, filter: &CompiledFilter) -> String {
    let condition = if filter.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", filter.sql)
    };
    format!(
        "SELECT {} AS id, t.name AS label, COUNT(DISTINCT d.id) AS doc_count \
         FROM documents_tag t \
         INNER JOIN documents_document_tags dt ON dt.tag_id = t.id \
         INNER JOIN documents_document d ON d.id = dt.document_id AND d.deleted_at IS NULL\
         {condition} GROUP BY t.id, t.name ORDER BY doc_count DESC, t.name ASC",
        dialect.cast_bigint("t.id")
    )
}

fn document_column_query(dialect: &dyn SqlDialect, column: &str, filter: &CompiledFilter) -> String {
    format!(
        "SELECT {id} AS id, {label} AS label, COUNT(DISTINCT d.id) AS doc_count \
         FROM documents_document d \
         WHERE d.deleted_at IS NULL AND {column} IS NOT NULL{filter_clause} \
         GROUP BY {column} ORDER BY doc_count DESC, {column} ASC",
        id = dialect.cast_bigint(column),
        label = dialect.cast_text(column),
        filter_clause = filter.and_clause(),
    )
}
