use crate::property::{ArrayProperty, Property, PropertyKind, resolve_property};
use crate::schema::EntitySchema;
use crate::value::{EntityValues, Value};

/// A value that breaks a property's validation rules.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{path}: {message}")]
    Required { path: String, message: String },
    #[error("{path}: must be at least {min}")]
    BelowMin { path: String, min: f64 },
    #[error("{path}: must be at most {max}")]
    AboveMax { path: String, max: f64 },
}

impl ValidationError {
    pub fn path(&self) -> &str {
        match self {
            ValidationError::Required { path, .. }
            | ValidationError::BelowMin { path, .. }
            | ValidationError::AboveMax { path, .. } => path,
        }
    }
}

/// Checks entity values against the validation rules of their properties.
///
/// Bounds apply to the numeric value of numbers and to the length of strings
/// and arrays. Map children and `of` array elements are checked recursively.
pub fn validate_entity(
    values: &EntityValues,
    schema: &EntitySchema,
    collection_path: &str,
    entity_id: Option<&str>,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (key, slot) in &schema.properties {
        let property = resolve_property(slot, values, collection_path, entity_id);
        validate_value(values.get(key), &property, key, &mut errors);
    }
    errors
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn measure(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => Some(*n),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        _ => None,
    }
}

fn validate_value(value: Option<&Value>, property: &Property, path: &str, errors: &mut Vec<ValidationError>) {
    let validation = property.validation.as_ref();

    if is_empty(value) {
        if let Some(validation) = validation.filter(|v| v.required) {
            errors.push(ValidationError::Required {
                path: path.to_string(),
                message: validation
                    .required_message
                    .clone()
                    .unwrap_or_else(|| "required".to_string()),
            });
        }
        return;
    }
    let Some(value) = value else {
        return;
    };

    if let (Some(validation), Some(size)) = (validation, measure(value)) {
        if let Some(min) = validation.min.filter(|min| size < *min) {
            errors.push(ValidationError::BelowMin {
                path: path.to_string(),
                min,
            });
        }
        if let Some(max) = validation.max.filter(|max| size > *max) {
            errors.push(ValidationError::AboveMax {
                path: path.to_string(),
                max,
            });
        }
    }

    match (&property.kind, value) {
        (PropertyKind::Map(map), Value::Map(entries)) => {
            for (key, child) in &map.properties {
                if map.pick_only_some_keys && !entries.contains_key(key) {
                    continue;
                }
                validate_value(entries.get(key), child, &format!("{path}.{key}"), errors);
            }
        }
        (PropertyKind::Array(ArrayProperty::Of(of)), Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                validate_value(Some(item), of, &format!("{path}[{i}]"), errors);
            }
        }
        _ => {}
    }
}
