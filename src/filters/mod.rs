//! Document filters: the rule list sent by the UI, the custom field query
//! tree carried by rule type 42, and their compilation to SQL.

pub mod compiler;
pub mod expression;
pub mod rules;

pub use compiler::{CompiledFilter, FilterCompiler};
pub use expression::{FieldOperator, FieldPredicate, FilterExpression, FilterParseError};
pub use rules::{parse_filter_rules, BuiltinRule, FilterRule, CUSTOM_FIELD_QUERY};
