use std::collections::{BTreeMap, BTreeSet};

use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::QueryableByName;
use serde::Serialize;

use super::values::{decompose, filter_by_label, sort_values, value_id, SortOptions, ValueFacet};
use super::FacetError;
use crate::db::{DbConnection, SqlParam};
use crate::fields::{CustomField, FieldCatalog, FieldDataType, SelectOptions};
use crate::filters::{parse_filter_rules, CompiledFilter, FilterCompiler, FilterRule};
use crate::utils::fallback::FailOpen;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValuesResponse {
    pub field_id: i64,
    pub field_name: String,
    pub values: Vec<ValueFacet>,
    pub total_documents: i64,
}

#[derive(QueryableByName)]
struct InstanceValueRow {
    #[diesel(sql_type = Nullable<Text>)]
    value: Option<String>,
    #[diesel(sql_type = Nullable<BigInt>)]
    document_id: Option<i64>,
}

/// All facets of a custom field across live documents.
pub fn get_field_values(
    conn: &mut DbConnection,
    field_id: i64,
    sort: &SortOptions,
) -> Result<FieldValuesResponse, FacetError> {
    aggregate(conn, field_id, &[], sort)
}

/// Facets whose label contains `query`.
pub fn search_field_values(
    conn: &mut DbConnection,
    field_id: i64,
    query: &str,
    sort: &SortOptions,
) -> Result<Vec<ValueFacet>, FacetError> {
    let response = aggregate(conn, field_id, &[], sort)?;
    let mut values = filter_by_label(response.values, query, sort.ignore_case);
    sort_values(&mut values, sort);
    Ok(values)
}

/// Facets restricted to documents matching `filter_rules`. Rules that do not
/// parse are ignored and the facets are computed unfiltered.
pub fn get_value_counts(
    conn: &mut DbConnection,
    field_id: i64,
    filter_rules: &str,
    sort: &SortOptions,
) -> Result<Vec<ValueFacet>, FacetError> {
    let rules = parse_filter_rules(filter_rules).fail_open("ignoring malformed filter rules");
    Ok(aggregate(conn, field_id, &rules, sort)?.values)
}

pub fn aggregate(
    conn: &mut DbConnection,
    field_id: i64,
    rules: &[FilterRule],
    sort: &SortOptions,
) -> Result<FieldValuesResponse, FacetError> {
    let field = conn
        .custom_field(field_id)?
        .ok_or(FacetError::FieldNotFound(field_id))?;
    let data_type = field.data_type();
    let options = field.select_options();

    let dialect = conn.dialect();
    let filter = if rules.is_empty() {
        CompiledFilter::default()
    } else {
        FilterCompiler::new(dialect, &mut *conn)
            .excluding_field(field_id)
            .with_offset(1)
            .compile_rules(rules)
    };

    let mut params = vec![SqlParam::Int(field_id)];
    params.extend(filter.params.iter().cloned());

    let column = format!("fi.{}", data_type.value_column());
    let has_value = format!(
        "{column} IS NOT NULL AND {} <> ''",
        dialect.cast_text(&column)
    );

    let document_scope = if filter.is_empty() {
        String::new()
    } else {
        " INNER JOIN documents_document d ON d.id = fi.document_id AND d.deleted_at IS NULL"
            .to_string()
    };
    let values_sql = format!(
        "SELECT {value} AS value, {document} AS document_id \
         FROM documents_customfieldinstance fi{document_scope} \
         WHERE fi.field_id = {field_param} AND fi.deleted_at IS NULL AND {has_value}{filter_clause}",
        value = dialect.cast_text(&column),
        document = dialect.cast_bigint("fi.document_id"),
        field_param = dialect.placeholder(1),
        filter_clause = filter.and_clause(),
    );
    let rows = conn.load::<InstanceValueRow>(&values_sql, &params)?;

    let mut documents_by_value: BTreeMap<String, BTreeSet<i64>> = BTreeMap::new();
    for row in rows {
        let (Some(raw), Some(document_id)) = (row.value, row.document_id) else {
            continue;
        };
        for value in decompose(&raw) {
            documents_by_value
                .entry(value.to_string())
                .or_default()
                .insert(document_id);
        }
    }

    let mut values: Vec<ValueFacet> = documents_by_value
        .into_iter()
        .map(|(value, documents)| facet_for(&value, documents.len(), data_type, &options))
        .collect();

    let blank_sql = format!(
        "SELECT COUNT(DISTINCT d.id) AS count FROM documents_document d \
         WHERE d.deleted_at IS NULL AND NOT EXISTS (SELECT 1 FROM documents_customfieldinstance fi \
         WHERE fi.document_id = d.id AND fi.field_id = {field_param} AND fi.deleted_at IS NULL \
         AND {has_value}){filter_clause}",
        field_param = dialect.placeholder(1),
        filter_clause = filter.and_clause(),
    );
    let blank_count = conn.count(&blank_sql, &params)?;
    if blank_count > 0 {
        values.push(ValueFacet::blank(blank_count));
    }

    sort_values(&mut values, sort);

    let total_documents = conn.count(
        "SELECT COUNT(DISTINCT id) AS count FROM documents_document WHERE deleted_at IS NULL",
        &[],
    )?;

    tracing::debug!(
        field_id,
        values = values.len(),
        blank_count,
        total_documents,
        filtered = !filter.is_empty(),
        "aggregated custom field values"
    );

    let CustomField { name, .. } = field;
    Ok(FieldValuesResponse {
        field_id,
        field_name: name,
        values,
        total_documents,
    })
}

fn facet_for(
    value: &str,
    documents: usize,
    data_type: FieldDataType,
    options: &SelectOptions,
) -> ValueFacet {
    let count = i64::try_from(documents).unwrap_or(i64::MAX);
    if data_type == FieldDataType::Select {
        ValueFacet {
            id: value.to_string(),
            label: options.label_for(value).to_string(),
            count,
        }
    } else {
        ValueFacet {
            id: value_id(value),
            label: value.to_string(),
            count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_facets_keep_option_ids() {
        let options = SelectOptions::parse(
            r#"{"select_options":[{"id":"o1","label":"Finance"}]}"#,
        )
        .unwrap();
        let facet = facet_for("o1", 2, FieldDataType::Select, &options);
        assert_eq!(facet.id, "o1");
        assert_eq!(facet.label, "Finance");
        assert_eq!(facet.count, 2);

        let unknown = facet_for("o7", 1, FieldDataType::Select, &options);
        assert_eq!(unknown.label, "o7");
    }

    #[test]
    fn free_text_facets_use_hashed_ids() {
        let facet = facet_for("Paris", 1, FieldDataType::LongText, &SelectOptions::default());
        assert_eq!(facet.id, value_id("Paris"));
        assert_eq!(facet.label, "Paris");
    }
}
