use std::collections::HashMap;

use diesel::sql_types::{BigInt, Nullable, Text};
use diesel::{QueryResult, QueryableByName};
use serde_json::Value;

use crate::db::{DbConnection, SqlParam};
use crate::utils::fallback::FailOpen;

/// A row of `documents_customfield`.
#[derive(Debug, Clone, PartialEq, QueryableByName)]
pub struct CustomField {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = Text)]
    pub name: String,
    #[diesel(sql_type = Text)]
    pub data_type: String,
    #[diesel(sql_type = Nullable<Text>)]
    pub extra_data: Option<String>,
}

impl CustomField {
    pub fn data_type(&self) -> FieldDataType {
        FieldDataType::parse(&self.data_type)
    }

    /// Option id to label map. Only select fields carry options; anything
    /// malformed yields an empty set.
    pub fn select_options(&self) -> SelectOptions {
        if self.data_type() != FieldDataType::Select {
            return SelectOptions::default();
        }
        match self.extra_data.as_deref() {
            Some(raw) => SelectOptions::parse(raw).fail_open("malformed select options"),
            None => SelectOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldDataType {
    String,
    Url,
    Date,
    Boolean,
    Integer,
    Float,
    Monetary,
    DocumentLink,
    Select,
    LongText,
}

impl FieldDataType {
    /// Unknown types are treated as plain strings.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "url" => Self::Url,
            "date" => Self::Date,
            "boolean" => Self::Boolean,
            "integer" => Self::Integer,
            "float" => Self::Float,
            "monetary" => Self::Monetary,
            "documentlink" => Self::DocumentLink,
            "select" => Self::Select,
            "longtext" => Self::LongText,
            _ => Self::String,
        }
    }

    /// Column of `documents_customfieldinstance` holding values of this type.
    pub fn value_column(self) -> &'static str {
        match self {
            Self::String => "value_text",
            Self::Url => "value_url",
            Self::Date => "value_date",
            Self::Boolean => "value_bool",
            Self::Integer => "value_int",
            Self::Float => "value_float",
            Self::Monetary => "value_monetary",
            Self::DocumentLink => "value_document_ids",
            Self::Select => "value_select",
            Self::LongText => "value_long_text",
        }
    }
}

pub fn value_column(data_type: &str) -> &'static str {
    FieldDataType::parse(data_type).value_column()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectOptions {
    options: Vec<(String, String)>,
}

impl SelectOptions {
    /// Reads `select_options` from a field's `extra_data`. Options are
    /// either `{id, label}` objects or bare labels, whose id is their index.
    pub fn parse(extra_data: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(extra_data)?;
        let Some(items) = value.get("select_options").and_then(Value::as_array) else {
            return Ok(Self::default());
        };

        let options = items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| match item {
                Value::String(label) => Some((index.to_string(), label.clone())),
                Value::Object(map) => {
                    let id = map.get("id").and_then(crate::utils::json::scalar_to_string)?;
                    let label = map
                        .get("label")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| id.clone());
                    Some((id, label))
                }
                _ => None,
            })
            .collect();

        Ok(Self { options })
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn label_for<'a>(&'a self, id: &'a str) -> &'a str {
        self.options
            .iter()
            .find(|(option_id, _)| option_id == id)
            .map(|(_, label)| label.as_str())
            .unwrap_or(id)
    }

    pub fn id_for_label<'a>(&'a self, label: &'a str) -> &'a str {
        self.options
            .iter()
            .find(|(_, option_label)| option_label == label)
            .map(|(id, _)| id.as_str())
            .unwrap_or(label)
    }
}

/// Source of custom-field metadata.
pub trait FieldCatalog {
    fn custom_field(&mut self, field_id: i64) -> QueryResult<Option<CustomField>>;
}

impl FieldCatalog for DbConnection {
    fn custom_field(&mut self, field_id: i64) -> QueryResult<Option<CustomField>> {
        let dialect = self.dialect();
        let sql = format!(
            "SELECT {id} AS id, name, data_type, {extra} AS extra_data \
             FROM documents_customfield WHERE id = {p}",
            id = dialect.cast_bigint("id"),
            extra = dialect.cast_text("extra_data"),
            p = dialect.placeholder(1),
        );
        self.load_optional::<CustomField>(&sql, &[SqlParam::Int(field_id)])
    }
}

impl FieldCatalog for HashMap<i64, CustomField> {
    fn custom_field(&mut self, field_id: i64) -> QueryResult<Option<CustomField>> {
        Ok(self.get(&field_id).cloned())
    }
}
