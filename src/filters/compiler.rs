use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;

use super::expression::{FieldOperator, FieldPredicate, FilterExpression};
use super::rules::{BuiltinRule, FilterRule};
use crate::db::SqlParam;
use crate::dialect::SqlDialect;
use crate::fields::{CustomField, FieldCatalog, FieldDataType};
use crate::utils::fallback::FailOpen;

const INSTANCE_TABLE: &str = "documents_customfieldinstance";

/// A boolean SQL condition over the document alias `d` and the values
/// bound to its placeholders, in order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilter {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl CompiledFilter {
    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }

    /// `" AND (<condition>)"`, or nothing for an empty filter.
    pub fn and_clause(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!(" AND ({})", self.sql)
        }
    }
}

pub struct FilterCompiler<'a> {
    dialect: &'a dyn SqlDialect,
    catalog: &'a mut dyn FieldCatalog,
    exclude_field: Option<i64>,
    exclude_rule: Option<BuiltinRule>,
    offset: usize,
    params: Vec<SqlParam>,
    fields: HashMap<i64, Option<CustomField>>,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(dialect: &'a dyn SqlDialect, catalog: &'a mut dyn FieldCatalog) -> Self {
        Self {
            dialect,
            catalog,
            exclude_field: None,
            exclude_rule: None,
            offset: 0,
            params: Vec::new(),
            fields: HashMap::new(),
        }
    }

    /// Drops every leaf that references `field_id`.
    pub fn excluding_field(mut self, field_id: i64) -> Self {
        self.exclude_field = Some(field_id);
        self
    }

    /// Drops every builtin rule of type `rule`.
    pub fn excluding_rule(mut self, rule: BuiltinRule) -> Self {
        self.exclude_rule = Some(rule);
        self
    }

    /// Number of parameters bound before the filter in the final statement.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn compile_expression(mut self, expression: &FilterExpression) -> CompiledFilter {
        let sql = self.expression(expression);
        CompiledFilter {
            sql,
            params: self.params,
        }
    }

    /// Builtin rules of the same type are OR-ed together; distinct types and
    /// every custom field query are AND-ed.
    pub fn compile_rules(mut self, rules: &[FilterRule]) -> CompiledFilter {
        let mut builtin: BTreeMap<BuiltinRule, Vec<&str>> = BTreeMap::new();
        let mut queries = Vec::new();
        for rule in rules {
            match rule {
                FilterRule::Builtin { rule, value } => {
                    if Some(*rule) != self.exclude_rule {
                        builtin.entry(*rule).or_default().push(value);
                    }
                }
                FilterRule::CustomFieldQuery(expression) => queries.push(expression),
            }
        }

        let mut parts = Vec::new();
        for (rule, values) in builtin {
            let alternatives: Vec<String> = values
                .into_iter()
                .filter_map(|value| self.builtin(rule, value))
                .collect();
            match alternatives.len() {
                0 => {}
                1 => parts.extend(alternatives),
                _ => parts.push(format!("({})", alternatives.join(" OR "))),
            }
        }
        for expression in queries {
            let sql = self.expression(expression);
            if !sql.is_empty() {
                parts.push(sql);
            }
        }

        CompiledFilter {
            sql: parts.join(" AND "),
            params: self.params,
        }
    }

    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        self.dialect.placeholder(self.offset + self.params.len())
    }

    fn expression(&mut self, expression: &FilterExpression) -> String {
        match expression {
            FilterExpression::And(children) => {
                let parts: Vec<String> = children
                    .iter()
                    .map(|child| self.expression(child))
                    .filter(|sql| !sql.is_empty())
                    .collect();
                parts.join(" AND ")
            }
            FilterExpression::Or(children) => {
                let parts: Vec<String> = children
                    .iter()
                    .map(|child| self.expression(child))
                    .filter(|sql| !sql.is_empty())
                    .map(|sql| format!("({sql})"))
                    .collect();
                if parts.is_empty() {
                    String::new()
                } else {
                    format!("({})", parts.join(" OR "))
                }
            }
            FilterExpression::Leaf(predicate) => {
                if Some(predicate.field_id) == self.exclude_field {
                    String::new()
                } else {
                    self.leaf(predicate)
                }
            }
        }
    }

    fn leaf(&mut self, predicate: &FieldPredicate) -> String {
        match &predicate.operator {
            FieldOperator::Exists(true) => self.instance_exists(predicate.field_id, ""),
            FieldOperator::Exists(false) => {
                format!("NOT {}", self.instance_exists(predicate.field_id, ""))
            }
            FieldOperator::IsNull => {
                let column = format!("cfi.{}", self.data_type(predicate.field_id).value_column());
                let condition = format!(
                    " AND {column} IS NOT NULL AND {} <> ''",
                    self.dialect.cast_text(&column)
                );
                format!("NOT {}", self.instance_exists(predicate.field_id, &condition))
            }
            FieldOperator::In(values) => {
                let field = self.field(predicate.field_id);
                let data_type = field
                    .as_ref()
                    .map(CustomField::data_type)
                    .unwrap_or(FieldDataType::String);
                let options = field
                    .as_ref()
                    .map(CustomField::select_options)
                    .unwrap_or_default();

                let field_param = self.bind(SqlParam::Int(predicate.field_id));
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|value| self.bind(SqlParam::Text(options.id_for_label(value).to_string())))
                    .collect();
                let column = format!("cfi.{}", data_type.value_column());
                self.instance_exists_bound(
                    &field_param,
                    &format!(
                        " AND {} IN ({})",
                        self.dialect.cast_text(&column),
                        placeholders.join(", ")
                    ),
                )
            }
            FieldOperator::Range { start, end } => {
                let field_param = self.bind(SqlParam::Int(predicate.field_id));
                let start = self.bind(SqlParam::Text(start.clone()));
                let end = self.bind(SqlParam::Text(end.clone()));
                let column = self.dialect.cast_date("cfi.value_date");
                let condition = format!(
                    " AND {column} >= {} AND {column} <= {}",
                    self.dialect.cast_date(&start),
                    self.dialect.cast_date(&end)
                );
                self.instance_exists_bound(&field_param, &condition)
            }
            FieldOperator::Gte(bound) | FieldOperator::Lte(bound) => {
                let comparison = if matches!(predicate.operator, FieldOperator::Gte(_)) {
                    ">="
                } else {
                    "<="
                };
                let field_param = self.bind(SqlParam::Int(predicate.field_id));
                let bound = self.bind(SqlParam::Text(bound.clone()));
                let condition = format!(
                    " AND {} {comparison} {}",
                    self.dialect.cast_date("cfi.value_date"),
                    self.dialect.cast_date(&bound)
                );
                self.instance_exists_bound(&field_param, &condition)
            }
        }
    }

    fn instance_exists(&mut self, field_id: i64, condition: &str) -> String {
        let field_param = self.bind(SqlParam::Int(field_id));
        self.instance_exists_bound(&field_param, condition)
    }

    fn instance_exists_bound(&self, field_param: &str, condition: &str) -> String {
        format!(
            "EXISTS (SELECT 1 FROM {INSTANCE_TABLE} cfi WHERE cfi.document_id = d.id \
             AND cfi.field_id = {field_param} AND cfi.deleted_at IS NULL{condition})"
        )
    }

    fn field(&mut self, field_id: i64) -> Option<CustomField> {
        if let Some(cached) = self.fields.get(&field_id) {
            return cached.clone();
        }
        let field = self
            .catalog
            .custom_field(field_id)
            .map_err(|err| format!("custom field {field_id} lookup failed: {err}"))
            .fail_open("filter metadata unavailable");
        self.fields.insert(field_id, field.clone());
        field
    }

    fn data_type(&mut self, field_id: i64) -> FieldDataType {
        self.field(field_id)
            .as_ref()
            .map(CustomField::data_type)
            .unwrap_or(FieldDataType::String)
    }

    fn builtin(&mut self, rule: BuiltinRule, value: &str) -> Option<String> {
        let column = match rule {
            BuiltinRule::Correspondent => "d.correspondent_id",
            BuiltinRule::DocumentType => "d.document_type_id",
            BuiltinRule::StoragePath => "d.storage_path_id",
            BuiltinRule::OwnerAny => "d.owner_id",
            BuiltinRule::Asn => "d.archive_serial_number",
            BuiltinRule::HasTagsAny => {
                let tag = self.bind(SqlParam::Int(parse_id(rule, value)?));
                return Some(format!(
                    "EXISTS (SELECT 1 FROM documents_document_tags dtf \
                     WHERE dtf.document_id = d.id AND dtf.tag_id = {tag})"
                ));
            }
            BuiltinRule::CreatedAfter | BuiltinRule::CreatedBefore => {
                let comparison = if rule == BuiltinRule::CreatedAfter { ">" } else { "<" };
                let date = self.bind(SqlParam::Text(parse_date(rule, value)?));
                return Some(format!(
                    "{} {comparison} {}",
                    self.dialect.cast_date("d.created"),
                    self.dialect.cast_date(&date)
                ));
            }
            BuiltinRule::IsInInbox => {
                return Some(format!("d.is_in_inbox = {}", self.dialect.true_literal()));
            }
        };
        let id = self.bind(SqlParam::Int(parse_id(rule, value)?));
        Some(format!("{column} = {id}"))
    }
}

fn parse_id(rule: BuiltinRule, value: &str) -> Option<i64> {
    match value.trim().parse() {
        Ok(id) => Some(id),
        Err(_) => {
            tracing::warn!(rule_type = rule.code(), value, "ignoring filter rule with non-numeric id");
            None
        }
    }
}

/// Accepts `YYYY-MM-DD`, optionally followed by a time part.
fn parse_date(rule: BuiltinRule, value: &str) -> Option<String> {
    let value = value.trim();
    let day = value.get(..10).unwrap_or(value);
    match NaiveDate::parse_from_str(day, "%Y-%m-%d") {
        Ok(date) => Some(date.format("%Y-%m-%d").to_string()),
        Err(_) => {
            tracing::warn!(rule_type = rule.code(), value, "ignoring filter rule with invalid date");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Engine;
    use crate::filters::rules::parse_filter_rules;

    fn catalog() -> HashMap<i64, CustomField> {
        let mut fields = HashMap::new();
        fields.insert(
            7,
            CustomField {
                id: 7,
                name: "Department".to_string(),
                data_type: "select".to_string(),
                extra_data: Some(
                    r#"{"select_options":[{"id":"o1","label":"Finance"},{"id":"o2","label":"Legal"}]}"#
                        .to_string(),
                ),
            },
        );
        fields.insert(
            3,
            CustomField {
                id: 3,
                name: "Cities".to_string(),
                data_type: "longtext".to_string(),
                extra_data: None,
            },
        );
        fields
    }

    fn compile(engine: Engine, raw: &str, exclude: Option<i64>) -> CompiledFilter {
        let mut fields = catalog();
        let expression = FilterExpression::parse(raw).unwrap();
        let mut compiler = FilterCompiler::new(engine.dialect(), &mut fields);
        if let Some(field_id) = exclude {
            compiler = compiler.excluding_field(field_id);
        }
        compiler.compile_expression(&expression)
    }

    fn text(value: &str) -> SqlParam {
        SqlParam::Text(value.to_string())
    }

    #[test]
    fn exists_leaf_binds_field_id() {
        let compiled = compile(Engine::Postgres, r#"["AND", [[5, "exists", true]]]"#, None);
        assert_eq!(
            compiled.sql,
            "EXISTS (SELECT 1 FROM documents_customfieldinstance cfi WHERE cfi.document_id = d.id \
             AND cfi.field_id = $1 AND cfi.deleted_at IS NULL)"
        );
        assert_eq!(compiled.params, vec![SqlParam::Int(5)]);
    }

    #[test]
    fn select_labels_are_translated_to_option_ids() {
        let compiled = compile(
            Engine::Postgres,
            r#"["AND", [[7, "in", ["Finance", "o9"]]]]"#,
            None,
        );
        assert!(compiled
            .sql
            .contains("CAST(cfi.value_select AS TEXT) IN ($2, $3)"));
        assert_eq!(
            compiled.params,
            vec![SqlParam::Int(7), text("o1"), text("o9")]
        );
    }

    #[test]
    fn isnull_uses_the_fields_value_column() {
        let compiled = compile(Engine::Sqlite, r#"[3, "isnull"]"#, None);
        assert!(compiled.sql.starts_with("NOT EXISTS ("));
        assert!(compiled
            .sql
            .contains("cfi.value_long_text IS NOT NULL AND CAST(cfi.value_long_text AS TEXT) <> ''"));
    }

    #[test]
    fn unknown_fields_fall_back_to_text_column() {
        let compiled = compile(Engine::Sqlite, r#"[99, "in", ["x"]]"#, None);
        assert!(compiled.sql.contains("CAST(cfi.value_text AS TEXT) IN (?)"));
    }

    #[test]
    fn or_groups_are_parenthesised() {
        let compiled = compile(
            Engine::Mysql,
            r#"["OR", [[1, "exists"], [2, "exists"]]]"#,
            None,
        );
        assert!(compiled.sql.starts_with("((EXISTS"));
        assert!(compiled.sql.contains(")) OR (EXISTS"));
        assert!(compiled.sql.ends_with("))"));
        assert_eq!(compiled.params, vec![SqlParam::Int(1), SqlParam::Int(2)]);
    }

    #[test]
    fn excluded_field_never_appears() {
        let compiled = compile(
            Engine::Postgres,
            r#"["AND", [[7, "in", ["Finance"]], ["OR", [[7, "exists"]]], [3, "exists"]]]"#,
            Some(7),
        );
        assert!(!compiled.params.contains(&SqlParam::Int(7)));
        assert_eq!(compiled.params, vec![SqlParam::Int(3)]);
        assert!(compiled.sql.contains("cfi.field_id = $1"));
        assert!(!compiled.sql.contains(" OR "));
    }

    #[test]
    fn fully_excluded_tree_is_empty() {
        let compiled = compile(Engine::Postgres, r#"["OR", [[7, "exists"]]]"#, Some(7));
        assert!(compiled.is_empty());
        assert!(compiled.params.is_empty());
        assert_eq!(compiled.and_clause(), "");
    }

    #[test]
    fn date_bounds_are_parameterised() {
        let compiled = compile(
            Engine::Postgres,
            r#"[4, "range", ["2024-01-01", "2024-12-31"]]"#,
            None,
        );
        assert!(compiled.sql.contains(
            "CAST(cfi.value_date AS DATE) >= CAST($2 AS DATE) AND CAST(cfi.value_date AS DATE) <= CAST($3 AS DATE)"
        ));
        assert!(!compiled.sql.contains("2024"));
        assert_eq!(
            compiled.params,
            vec![SqlParam::Int(4), text("2024-01-01"), text("2024-12-31")]
        );
    }

    #[test]
    fn placeholders_continue_after_offset() {
        let mut fields = catalog();
        let expression = FilterExpression::parse(r#"[3, "lte", "2024-06-01"]"#).unwrap();
        let compiled = FilterCompiler::new(Engine::Postgres.dialect(), &mut fields)
            .with_offset(1)
            .compile_expression(&expression);
        assert!(compiled.sql.contains("cfi.field_id = $2"));
        assert!(compiled.sql.contains("<= CAST($3 AS DATE)"));
    }

    #[test]
    fn same_builtin_rules_are_ored() {
        let mut fields = catalog();
        let rules = parse_filter_rules(
            r#"[{"rule_type": 3, "value": "1"}, {"rule_type": 1, "value": "9"}, {"rule_type": 3, "value": "2"}]"#,
        )
        .unwrap();
        let compiled =
            FilterCompiler::new(Engine::Postgres.dialect(), &mut fields).compile_rules(&rules);
        assert_eq!(
            compiled.sql,
            "d.correspondent_id = $1 AND (EXISTS (SELECT 1 FROM documents_document_tags dtf \
             WHERE dtf.document_id = d.id AND dtf.tag_id = $2) OR EXISTS (SELECT 1 FROM \
             documents_document_tags dtf WHERE dtf.document_id = d.id AND dtf.tag_id = $3))"
        );
        assert_eq!(
            compiled.params,
            vec![SqlParam::Int(9), SqlParam::Int(1), SqlParam::Int(2)]
        );
    }

    #[test]
    fn excluded_rule_type_is_dropped() {
        let mut fields = catalog();
        let rules = parse_filter_rules(
            r#"[{"rule_type": 1, "value": "9"}, {"rule_type": 9, "value": ""}]"#,
        )
        .unwrap();
        let compiled = FilterCompiler::new(Engine::Sqlite.dialect(), &mut fields)
            .excluding_rule(BuiltinRule::Correspondent)
            .compile_rules(&rules);
        assert_eq!(compiled.sql, "d.is_in_inbox = 1");
        assert!(compiled.params.is_empty());
    }

    #[test]
    fn unparseable_builtin_values_are_dropped() {
        let mut fields = catalog();
        let rules = parse_filter_rules(
            r#"[{"rule_type": 1, "value": "abc"}, {"rule_type": 6, "value": "yesterday"},
                {"rule_type": 7, "value": "2024-03-01T10:00:00"}]"#,
        )
        .unwrap();
        let compiled =
            FilterCompiler::new(Engine::Sqlite.dialect(), &mut fields).compile_rules(&rules);
        assert_eq!(compiled.sql, "date(d.created) < date(?)");
        assert_eq!(compiled.params, vec![text("2024-03-01")]);
    }

    #[test]
    fn custom_queries_follow_builtin_rules() {
        let mut fields = catalog();
        let rules = parse_filter_rules(
            r#"[{"rule_type": 42, "value": "[7, \"in\", [\"Legal\"]]"}, {"rule_type": 8, "value": 12}]"#,
        )
        .unwrap();
        let compiled = FilterCompiler::new(Engine::Postgres.dialect(), &mut fields)
            .compile_rules(&rules);
        assert!(compiled.sql.starts_with("d.archive_serial_number = $1 AND EXISTS"));
        assert_eq!(
            compiled.params,
            vec![SqlParam::Int(12), SqlParam::Int(7), text("o2")]
        );
    }
}
