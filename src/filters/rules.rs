use serde_json::Value;

use super::expression::{FilterExpression, FilterParseError};
use crate::utils::json::scalar_to_string;

pub const CUSTOM_FIELD_QUERY: i64 = 42;

/// Fixed document predicates addressed by their numeric rule type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BuiltinRule {
    Correspondent,
    DocumentType,
    HasTagsAny,
    StoragePath,
    OwnerAny,
    CreatedAfter,
    CreatedBefore,
    Asn,
    IsInInbox,
}

impl BuiltinRule {
    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => Self::Correspondent,
            2 => Self::DocumentType,
            3 => Self::HasTagsAny,
            4 => Self::StoragePath,
            5 => Self::OwnerAny,
            6 => Self::CreatedAfter,
            7 => Self::CreatedBefore,
            8 => Self::Asn,
            9 => Self::IsInInbox,
            _ => return None,
        })
    }

    pub fn code(self) -> i64 {
        match self {
            Self::Correspondent => 1,
            Self::DocumentType => 2,
            Self::HasTagsAny => 3,
            Self::StoragePath => 4,
            Self::OwnerAny => 5,
            Self::CreatedAfter => 6,
            Self::CreatedBefore => 7,
            Self::Asn => 8,
            Self::IsInInbox => 9,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterRule {
    Builtin { rule: BuiltinRule, value: String },
    CustomFieldQuery(FilterExpression),
}

/// Parses a `filter_rules` list. An empty string means no rules; elements
/// that are not usable rules are skipped.
pub fn parse_filter_rules(raw: &str) -> Result<Vec<FilterRule>, FilterParseError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    let value: Value = serde_json::from_str(raw)?;
    rules_from_value(&value)
}

pub fn rules_from_value(value: &Value) -> Result<Vec<FilterRule>, FilterParseError> {
    let Value::Array(items) = value else {
        return Err(FilterParseError::Shape(value.to_string()));
    };

    let mut rules = Vec::with_capacity(items.len());
    for item in items {
        match parse_rule(item) {
            Ok(Some(rule)) => rules.push(rule),
            Ok(None) => {}
            Err(err) => tracing::warn!(error = %err, rule = %item, "skipping malformed filter rule"),
        }
    }
    Ok(rules)
}

fn parse_rule(item: &Value) -> Result<Option<FilterRule>, FilterParseError> {
    let Some(rule_type) = item.get("rule_type").and_then(rule_code) else {
        return Ok(None);
    };
    let value = item.get("value").unwrap_or(&Value::Null);

    if rule_type == CUSTOM_FIELD_QUERY {
        let expression = match value {
            Value::String(raw) => FilterExpression::parse(raw)?,
            other => FilterExpression::from_value(other)?,
        };
        return Ok(Some(FilterRule::CustomFieldQuery(expression)));
    }

    let Some(rule) = BuiltinRule::from_code(rule_type) else {
        return Ok(None);
    };
    Ok(Some(FilterRule::Builtin {
        rule,
        value: scalar_to_string(value).unwrap_or_default(),
    }))
}

fn rule_code(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::expression::{FieldOperator, FieldPredicate};

    #[test]
    fn empty_input_means_no_rules() {
        assert!(parse_filter_rules("").unwrap().is_empty());
        assert!(parse_filter_rules("  ").unwrap().is_empty());
        assert!(parse_filter_rules("[]").unwrap().is_empty());
    }

    #[test]
    fn parses_builtin_and_custom_rules() {
        let rules = parse_filter_rules(
            r#"[{"rule_type": 1, "value": "4"}, {"rule_type": 3, "value": 12},
                {"rule_type": 42, "value": "[\"AND\", [[7, \"exists\", true]]]"}]"#,
        )
        .unwrap();
        assert_eq!(
            rules,
            vec![
                FilterRule::Builtin {
                    rule: BuiltinRule::Correspondent,
                    value: "4".to_string()
                },
                FilterRule::Builtin {
                    rule: BuiltinRule::HasTagsAny,
                    value: "12".to_string()
                },
                FilterRule::CustomFieldQuery(FilterExpression::And(vec![FilterExpression::Leaf(
                    FieldPredicate {
                        field_id: 7,
                        operator: FieldOperator::Exists(true)
                    }
                )])),
            ]
        );
    }

    #[test]
    fn custom_query_may_be_inline_json() {
        let rules = parse_filter_rules(r#"[{"rule_type": 42, "value": [5, "isnull"]}]"#).unwrap();
        assert_eq!(
            rules,
            vec![FilterRule::CustomFieldQuery(FilterExpression::Leaf(
                FieldPredicate {
                    field_id: 5,
                    operator: FieldOperator::IsNull
                }
            ))]
        );
    }

    #[test]
    fn skips_unknown_and_malformed_rules() {
        let rules = parse_filter_rules(
            r#"[{"rule_type": 99, "value": "x"}, {"value": "1"}, 5,
                {"rule_type": 42, "value": "[oops"}, {"rule_type": 9}]"#,
        )
        .unwrap();
        assert_eq!(
            rules,
            vec![FilterRule::Builtin {
                rule: BuiltinRule::IsInInbox,
                value: String::new()
            }]
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(parse_filter_rules("[{").is_err());
        assert!(parse_filter_rules(r#"{"rule_type": 1}"#).is_err());
    }

    #[test]
    fn codes_round_trip() {
        for code in 1..=9 {
            assert_eq!(BuiltinRule::from_code(code).map(BuiltinRule::code), Some(code));
        }
        assert_eq!(BuiltinRule::from_code(42), None);
    }
}
