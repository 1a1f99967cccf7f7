use serde_json::Value;
use thiserror::Error;

use crate::utils::json::scalar_to_string;

#[derive(Debug, Error)]
pub enum FilterParseError {
    #[error("invalid filter json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("filter expression must be a JSON array, got {0}")]
    Shape(String),
}

/// A custom-field query tree.
///
/// Wire form: `["AND", [expr, ...]]`, `["OR", [expr, ...]]` or a leaf
/// `[field_id, operator, operand]`.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    And(Vec<FilterExpression>),
    Or(Vec<FilterExpression>),
    Leaf(FieldPredicate),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldPredicate {
    pub field_id: i64,
    pub operator: FieldOperator,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOperator {
    /// `exists`; an explicit `false` operand negates the test.
    Exists(bool),
    IsNull,
    In(Vec<String>),
    Range { start: String, end: String },
    Gte(String),
    Lte(String),
}

impl FilterExpression {
    pub fn parse(raw: &str) -> Result<Self, FilterParseError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(&value)
    }

    /// Parses an already decoded tree. Only the top level must be an
    /// array; malformed nodes further down are skipped.
    pub fn from_value(value: &Value) -> Result<Self, FilterParseError> {
        let Value::Array(items) = value else {
            return Err(FilterParseError::Shape(value.to_string()));
        };
        Ok(parse_node(items).unwrap_or(FilterExpression::And(Vec::new())))
    }

    /// Whether any leaf references `field_id`.
    pub fn references_field(&self, field_id: i64) -> bool {
        match self {
            FilterExpression::And(children) | FilterExpression::Or(children) => {
                children.iter().any(|child| child.references_field(field_id))
            }
            FilterExpression::Leaf(predicate) => predicate.field_id == field_id,
        }
    }
}

fn parse_node(items: &[Value]) -> Option<FilterExpression> {
    let head = items.first()?;
    if let Some(keyword) = head.as_str() {
        if keyword.eq_ignore_ascii_case("and") {
            return Some(FilterExpression::And(parse_children(items.get(1))));
        }
        if keyword.eq_ignore_ascii_case("or") {
            return Some(FilterExpression::Or(parse_children(items.get(1))));
        }
    }
    parse_leaf(items).map(FilterExpression::Leaf)
}

fn parse_children(value: Option<&Value>) -> Vec<FilterExpression> {
    let Some(Value::Array(children)) = value else {
        return Vec::new();
    };
    children
        .iter()
        .filter_map(|child| match child {
            Value::Array(items) => parse_node(items),
            _ => None,
        })
        .collect()
}

fn parse_leaf(items: &[Value]) -> Option<FieldPredicate> {
    let field_id = field_id(items.first()?)?;
    let operator = items.get(1)?.as_str()?;
    let operand = items.get(2);

    let operator = match operator.to_ascii_lowercase().as_str() {
        "exists" => FieldOperator::Exists(!matches!(operand, Some(Value::Bool(false)))),
        "isnull" => FieldOperator::IsNull,
        "in" => {
            let values: Vec<String> = operand?
                .as_array()?
                .iter()
                .filter_map(scalar_to_string)
                .collect();
            if values.is_empty() {
                return None;
            }
            FieldOperator::In(values)
        }
        "range" => {
            let bounds = operand?.as_array()?;
            FieldOperator::Range {
                start: scalar_to_string(bounds.first()?)?,
                end: scalar_to_string(bounds.get(1)?)?,
            }
        }
        "gte" => FieldOperator::Gte(scalar_to_string(operand?)?),
        "lte" => FieldOperator::Lte(scalar_to_string(operand?)?),
        _ => return None,
    };

    Some(FieldPredicate { field_id, operator })
}

fn field_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(field_id: i64, operator: FieldOperator) -> FilterExpression {
        FilterExpression::Leaf(FieldPredicate { field_id, operator })
    }

    #[test]
    fn parses_nested_tree() {
        let expr = FilterExpression::parse(
            r#"["AND", [[3, "exists", true], ["OR", [[5, "in", ["a", 2]], [6, "isnull"]]]]]"#,
        )
        .unwrap();
        assert_eq!(
            expr,
            FilterExpression::And(vec![
                leaf(3, FieldOperator::Exists(true)),
                FilterExpression::Or(vec![
                    leaf(5, FieldOperator::In(vec!["a".to_string(), "2".to_string()])),
                    leaf(6, FieldOperator::IsNull),
                ]),
            ])
        );
    }

    #[test]
    fn bare_leaf_is_accepted_at_top_level() {
        let expr = FilterExpression::parse(r#"["12", "gte", "2024-01-01"]"#).unwrap();
        assert_eq!(expr, leaf(12, FieldOperator::Gte("2024-01-01".to_string())));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let expr = FilterExpression::parse(r#"["or", [[1, "exists"]]]"#).unwrap();
        assert_eq!(
            expr,
            FilterExpression::Or(vec![leaf(1, FieldOperator::Exists(true))])
        );
    }

    #[test]
    fn exists_false_negates() {
        let expr = FilterExpression::parse(r#"[1, "exists", false]"#).unwrap();
        assert_eq!(expr, leaf(1, FieldOperator::Exists(false)));
    }

    #[test]
    fn malformed_leaves_are_skipped() {
        let expr = FilterExpression::parse(
            r#"["AND", [[1], ["x", "exists"], [2, "in", []], [3, "range", ["2024-01-01"]], [4, "between", 1], "junk", [5, "lte", "2024-12-31"]]]"#,
        )
        .unwrap();
        assert_eq!(
            expr,
            FilterExpression::And(vec![leaf(5, FieldOperator::Lte("2024-12-31".to_string()))])
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(
            FilterExpression::parse("[1, "),
            Err(FilterParseError::Json(_))
        ));
        assert!(matches!(
            FilterExpression::parse(r#"{"a": 1}"#),
            Err(FilterParseError::Shape(_))
        ));
    }

    #[test]
    fn reports_referenced_fields() {
        let expr =
            FilterExpression::parse(r#"["AND", [[1, "exists"], ["OR", [[9, "isnull"]]]]]"#)
                .unwrap();
        assert!(expr.references_field(9));
        assert!(!expr.references_field(2));
    }
}
