use serde_json::Value;

/// A field in a partial-update body: absent, explicitly null, or set.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Omitted,
    Null,
    Value(T),
}

impl<T> Patch<T> {
    pub fn is_omitted(&self) -> bool {
        matches!(self, Patch::Omitted)
    }
}

pub fn classify_string(optional_value: Option<&Value>) -> Result<Patch<String>, String> {
    match optional_value {
        None => Ok(Patch::Omitted),
        Some(Value::Null) => Ok(Patch::Null),
        Some(Value::String(s)) => Ok(Patch::Value(s.to_owned())),
        Some(other) => Err(format!("expected string or null, got {other}")),
    }
}

pub fn classify_id_list(optional_value: Option<&Value>) -> Result<Patch<Vec<i64>>, String> {
    match optional_value {
        None => Ok(Patch::Omitted),
        Some(Value::Null) => Ok(Patch::Null),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_i64()
                    .ok_or_else(|| format!("expected integer id, got {item}"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Patch::Value),
        Some(other) => Err(format!("expected array of ids or null, got {other}")),
    }
}

/// Renders a scalar JSON value as text; arrays, objects and null have no
/// scalar form.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
