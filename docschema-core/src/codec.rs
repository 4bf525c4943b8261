//! Schema-driven conversion between store documents and typed values.
//!
//! Both directions walk the schema tree alongside the data, so coercion is
//! decided by the declared property rather than by the shape of the data.
//! Fields the schema does not describe are carried through untyped in both
//! directions; they are never dropped and never synthesized.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::property::{ArrayProperty, DataKind, OneOf, Property, PropertyKind, resolve_property};
use crate::schema::EntitySchema;
use crate::store_value::{StoreDocument, StoreValue};
use crate::value::{EntityReference, EntityValues, GeoPoint, Value};

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// A value that cannot be written under its declared property.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("{path}: oneOf element has no {type_field:?} tag")]
    MissingVariantTag { path: String, type_field: String },
    #[error("{path}: unknown oneOf variant {tag:?}")]
    UnknownVariant { path: String, tag: String },
}

/// A stored field that does not match its declared property.
///
/// Recovered per field: the field is left out of the decoded values and
/// decoding of its siblings continues.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConversionError {
    #[error("{path}: expected {expected}, found {found}")]
    KindMismatch {
        path: String,
        expected: DataKind,
        found: &'static str,
    },
    #[error("{path}: oneOf element has no {type_field:?} tag")]
    MissingVariantTag { path: String, type_field: String },
    #[error("{path}: unknown oneOf variant {tag:?}")]
    UnknownVariant { path: String, tag: String },
    #[error("{path}: timestamp out of range")]
    TimestampOutOfRange { path: String },
    #[error("{path}: {reference:?} is not a document path")]
    InvalidReference { path: String, reference: String },
}

impl ConversionError {
    /// Path of the offending field, e.g. `content[2].value`.
    pub fn path(&self) -> &str {
        match self {
            ConversionError::KindMismatch { path, .. }
            | ConversionError::MissingVariantTag { path, .. }
            | ConversionError::UnknownVariant { path, .. }
            | ConversionError::TimestampOutOfRange { path }
            | ConversionError::InvalidReference { path, .. } => path,
        }
    }
}

/// Result of decoding a document: the values that converted, plus the
/// errors for those that did not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    pub values: EntityValues,
    pub errors: Vec<ConversionError>,
}

/// Encodes entity values into the store's native format.
pub fn to_store_format(
    values: &EntityValues,
    schema: &EntitySchema,
    collection_path: &str,
) -> Result<StoreDocument, EncodeError> {
    encode_entity(values, schema, collection_path, None)
}

/// Decodes a store document into entity values.
///
/// Output keys are the schema's keys, not the stored field names.
pub fn from_store_format(
    document: &StoreDocument,
    schema: &EntitySchema,
    collection_path: &str,
) -> Decoded {
    decode_entity(document, schema, collection_path, None)
}

/// Encodes a value no schema describes.
pub fn to_store_value(value: &Value) -> StoreValue {
    match value {
        Value::Null => StoreValue::Null,
        Value::String(s) => StoreValue::String(s.clone()),
        Value::Number(n) => number_to_store(*n),
        Value::Boolean(b) => StoreValue::Boolean(*b),
        Value::Timestamp(t) => timestamp_to_store(t),
        Value::GeoPoint(p) => StoreValue::GeoPoint {
            latitude: p.lat,
            longitude: p.lng,
        },
        Value::Reference(r) => StoreValue::Reference(r.full_path()),
        Value::Array(items) => StoreValue::Array(items.iter().map(to_store_value).collect()),
        Value::Map(entries) => StoreValue::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_store_value(v)))
                .collect(),
        ),
    }
}

pub(crate) fn encode_entity(
    values: &EntityValues,
    schema: &EntitySchema,
    collection_path: &str,
    entity_id: Option<&str>,
) -> Result<StoreDocument, EncodeError> {
    let mut document = StoreDocument::with_capacity(values.len());
    for (key, value) in values {
        match schema.get(key) {
            Some(slot) => {
                let property = resolve_property(slot, values, collection_path, entity_id);
                let encoded = encode_value(value, &property, key)?;
                document.insert(property.store_key(key).to_string(), encoded);
            }
            None => {
                document.insert(key.clone(), to_store_value(value));
            }
        }
    }
    Ok(document)
}

pub(crate) fn encode_value(
    value: &Value,
    property: &Property,
    path: &str,
) -> Result<StoreValue, EncodeError> {
    match (&property.kind, value) {
        (_, Value::Null) => Ok(StoreValue::Null),
        (PropertyKind::Reference(_), Value::String(s)) if EntityReference::parse(s).is_ok() => {
            Ok(StoreValue::Reference(s.trim_matches('/').to_string()))
        }
        (PropertyKind::Array(ArrayProperty::Of(of)), Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| encode_value(item, of, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(StoreValue::Array),
        (PropertyKind::Array(ArrayProperty::OneOf(one_of)), Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| encode_variant(item, one_of, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>, _>>()
            .map(StoreValue::Array),
        (PropertyKind::Map(map), Value::Map(entries)) => {
            let mut encoded = IndexMap::with_capacity(entries.len());
            for (key, child_value) in entries {
                match map.properties.get(key) {
                    Some(child) => {
                        let child_path = format!("{path}.{key}");
                        encoded.insert(
                            child.store_key(key).to_string(),
                            encode_value(child_value, child, &child_path)?,
                        );
                    }
                    None => {
                        encoded.insert(key.clone(), to_store_value(child_value));
                    }
                }
            }
            Ok(StoreValue::Map(encoded))
        }
        // Matching scalars and anything the property does not describe.
        _ => Ok(to_store_value(value)),
    }
}

fn encode_variant(item: &Value, one_of: &OneOf, path: &str) -> Result<StoreValue, EncodeError> {
    let missing_tag = || EncodeError::MissingVariantTag {
        path: path.to_string(),
        type_field: one_of.type_field.clone(),
    };
    let Value::Map(entry) = item else {
        return Err(missing_tag());
    };
    let Some(Value::String(tag)) = entry.get(&one_of.type_field) else {
        return Err(missing_tag());
    };
    let variant = one_of
        .properties
        .get(tag)
        .ok_or_else(|| EncodeError::UnknownVariant {
            path: path.to_string(),
            tag: tag.clone(),
        })?;

    let mut encoded = IndexMap::with_capacity(entry.len());
    for (key, value) in entry {
        let stored = if *key == one_of.value_field {
            encode_value(value, variant, &format!("{path}.{key}"))?
        } else {
            to_store_value(value)
        };
        encoded.insert(key.clone(), stored);
    }
    Ok(StoreValue::Map(encoded))
}

fn number_to_store(n: f64) -> StoreValue {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        StoreValue::Integer(n as i64)
    } else {
        StoreValue::Double(n)
    }
}

fn timestamp_to_store(t: &DateTime<Utc>) -> StoreValue {
    StoreValue::Timestamp {
        seconds: t.timestamp(),
        nanos: t.timestamp_subsec_nanos() as i32,
    }
}

fn timestamp_from_store(seconds: i64, nanos: i32) -> Option<DateTime<Utc>> {
    let nanos = u32::try_from(nanos).ok().filter(|n| *n < 1_000_000_000)?;
    DateTime::from_timestamp(seconds, nanos)
}

pub(crate) fn decode_entity(
    document: &StoreDocument,
    schema: &EntitySchema,
    collection_path: &str,
    entity_id: Option<&str>,
) -> Decoded {
    let mut decoded = Decoded::default();
    let mut consumed: HashSet<String> = HashSet::with_capacity(schema.properties.len());

    for (key, slot) in &schema.properties {
        let property = resolve_property(slot, &decoded.values, collection_path, entity_id);
        let store_key = property.store_key(key);
        consumed.insert(store_key.to_string());
        let Some(raw) = document.get(store_key) else {
            continue;
        };
        if let Some(value) = decode_value(raw, &property, key, &mut decoded.errors) {
            decoded.values.insert(key.clone(), value);
        }
    }

    for (store_key, raw) in document {
        if consumed.contains(store_key) || decoded.values.contains_key(store_key) {
            continue;
        }
        if let Some(value) = decode_untyped(raw, store_key, &mut decoded.errors) {
            decoded.values.insert(store_key.clone(), value);
        }
    }
    decoded
}

fn decode_value(
    raw: &StoreValue,
    property: &Property,
    path: &str,
    errors: &mut Vec<ConversionError>,
) -> Option<Value> {
    let result = match (&property.kind, raw) {
        (_, StoreValue::Null) => Ok(Value::Null),
        (PropertyKind::String, StoreValue::String(s)) => Ok(Value::String(s.clone())),
        (PropertyKind::Number, StoreValue::Integer(i)) => Ok(Value::Number(*i as f64)),
        (PropertyKind::Number, StoreValue::Double(d)) => Ok(Value::Number(*d)),
        (PropertyKind::Boolean, StoreValue::Boolean(b)) => Ok(Value::Boolean(*b)),
        (PropertyKind::Timestamp, StoreValue::Timestamp { seconds, nanos }) => {
            timestamp_from_store(*seconds, *nanos)
                .map(Value::Timestamp)
                .ok_or_else(|| ConversionError::TimestampOutOfRange {
                    path: path.to_string(),
                })
        }
        (PropertyKind::GeoPoint, StoreValue::GeoPoint { latitude, longitude }) => {
            Ok(Value::GeoPoint(GeoPoint::new(*latitude, *longitude)))
        }
        (PropertyKind::Reference(_), StoreValue::Reference(full_path)) => {
            decode_reference(full_path, path)
        }
        (PropertyKind::Array(ArrayProperty::Of(of)), StoreValue::Array(items)) => Ok(Value::Array(
            items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| decode_value(item, of, &format!("{path}[{i}]"), errors))
                .collect(),
        )),
        (PropertyKind::Array(ArrayProperty::OneOf(one_of)), StoreValue::Array(items)) => {
            Ok(Value::Array(
                items
                    .iter()
                    .enumerate()
                    .filter_map(|(i, item)| {
                        decode_variant(item, one_of, &format!("{path}[{i}]"), errors)
                    })
                    .collect(),
            ))
        }
        (PropertyKind::Map(map), StoreValue::Map(entries)) => {
            Ok(Value::Map(decode_map(entries, &map.properties, path, errors)))
        }
        (_, other) => Err(ConversionError::KindMismatch {
            path: path.to_string(),
            expected: property.data_kind(),
            found: other.kind_name(),
        }),
    };

    match result {
        Ok(value) => Some(value),
        Err(error) => {
            errors.push(error);
            None
        }
    }
}

fn decode_map(
    entries: &IndexMap<String, StoreValue>,
    properties: &IndexMap<String, Property>,
    path: &str,
    errors: &mut Vec<ConversionError>,
) -> IndexMap<String, Value> {
    let mut decoded = IndexMap::with_capacity(entries.len());
    let mut consumed = HashSet::with_capacity(properties.len());

    for (key, child) in properties {
        let store_key = child.store_key(key);
        consumed.insert(store_key);
        let Some(raw) = entries.get(store_key) else {
            continue;
        };
        if let Some(value) = decode_value(raw, child, &format!("{path}.{key}"), errors) {
            decoded.insert(key.clone(), value);
        }
    }

    for (store_key, raw) in entries {
        if consumed.contains(store_key.as_str()) || decoded.contains_key(store_key) {
            continue;
        }
        if let Some(value) = decode_untyped(raw, &format!("{path}.{store_key}"), errors) {
            decoded.insert(store_key.clone(), value);
        }
    }
    decoded
}

fn decode_variant(
    item: &StoreValue,
    one_of: &OneOf,
    path: &str,
    errors: &mut Vec<ConversionError>,
) -> Option<Value> {
    let StoreValue::Map(entry) = item else {
        errors.push(ConversionError::KindMismatch {
            path: path.to_string(),
            expected: DataKind::Map,
            found: item.kind_name(),
        });
        return None;
    };
    let Some(StoreValue::String(tag)) = entry.get(&one_of.type_field) else {
        errors.push(ConversionError::MissingVariantTag {
            path: path.to_string(),
            type_field: one_of.type_field.clone(),
        });
        return None;
    };
    let Some(variant) = one_of.properties.get(tag) else {
        errors.push(ConversionError::UnknownVariant {
            path: path.to_string(),
            tag: tag.clone(),
        });
        return None;
    };

    let mut decoded = IndexMap::with_capacity(entry.len());
    for (key, raw) in entry {
        let child_path = format!("{path}.{key}");
        let value = if *key == one_of.value_field {
            decode_value(raw, variant, &child_path, errors)
        } else {
            decode_untyped(raw, &child_path, errors)
        };
        if let Some(value) = value {
            decoded.insert(key.clone(), value);
        }
    }
    Some(Value::Map(decoded))
}

fn decode_reference(full_path: &str, path: &str) -> Result<Value, ConversionError> {
    EntityReference::parse(full_path)
        .map(Value::Reference)
        .map_err(|_| ConversionError::InvalidReference {
            path: path.to_string(),
            reference: full_path.to_string(),
        })
}

/// Decodes a value no schema describes, mapping each native kind to its
/// canonical counterpart.
fn decode_untyped(
    raw: &StoreValue,
    path: &str,
    errors: &mut Vec<ConversionError>,
) -> Option<Value> {
    let result = match raw {
        StoreValue::Null => Ok(Value::Null),
        StoreValue::Boolean(b) => Ok(Value::Boolean(*b)),
        StoreValue::Integer(i) => Ok(Value::Number(*i as f64)),
        StoreValue::Double(d) => Ok(Value::Number(*d)),
        StoreValue::String(s) => Ok(Value::String(s.clone())),
        StoreValue::Timestamp { seconds, nanos } => timestamp_from_store(*seconds, *nanos)
            .map(Value::Timestamp)
            .ok_or_else(|| ConversionError::TimestampOutOfRange {
                path: path.to_string(),
            }),
        StoreValue::GeoPoint { latitude, longitude } => {
            Ok(Value::GeoPoint(GeoPoint::new(*latitude, *longitude)))
        }
        StoreValue::Reference(full_path) => decode_reference(full_path, path),
        StoreValue::Array(items) => Ok(Value::Array(
            items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| decode_untyped(item, &format!("{path}[{i}]"), errors))
                .collect(),
        )),
        StoreValue::Map(entries) => Ok(Value::Map(
            entries
                .iter()
                .filter_map(|(k, v)| {
                    decode_untyped(v, &format!("{path}.{k}"), errors).map(|value| (k.clone(), value))
                })
                .collect(),
        )),
    };

    match result {
        Ok(value) => Some(value),
        Err(error) => {
            errors.push(error);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(seconds: i64, nanos: u32) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, nanos).unwrap()
    }

    fn doc(entries: impl IntoIterator<Item = (&'static str, StoreValue)>) -> StoreDocument {
        entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn timestamp_field_decodes_to_date() {
        let schema = EntitySchema::new("Test entity")
            .property("created_at", Property::timestamp().with_title("Created at"));
        let document = doc([(
            "created_at",
            StoreValue::Timestamp {
                seconds: 1_600_000_000,
                nanos: 123_000_000,
            },
        )]);

        let decoded = from_store_format(&document, &schema, "any");
        assert!(decoded.errors.is_empty());
        assert_eq!(
            decoded.values["created_at"],
            Value::Timestamp(at(1_600_000_000, 123_000_000))
        );
    }

    #[test]
    fn string_in_timestamp_field_is_a_field_error() {
        let schema = EntitySchema::new("Test entity")
            .property("created_at", Property::timestamp())
            .property("name", Property::string());
        let document = doc([
            ("created_at", StoreValue::String("yesterday".into())),
            ("name", StoreValue::String("kept".into())),
        ]);

        let decoded = from_store_format(&document, &schema, "any");
        assert!(!decoded.values.contains_key("created_at"));
        assert_eq!(decoded.values["name"], Value::from("kept"));
        assert_eq!(
            decoded.errors,
            vec![ConversionError::KindMismatch {
                path: "created_at".into(),
                expected: DataKind::Timestamp,
                found: "string",
            }]
        );
    }

    #[test]
    fn array_element_errors_drop_only_the_element() {
        let schema =
            EntitySchema::new("Test entity").property("dates", Property::array_of(Property::timestamp()));
        let document = doc([(
            "dates",
            StoreValue::Array(vec![
                StoreValue::Timestamp { seconds: 1, nanos: 0 },
                StoreValue::Boolean(true),
                StoreValue::Timestamp { seconds: 2, nanos: 0 },
            ]),
        )]);

        let decoded = from_store_format(&document, &schema, "any");
        assert_eq!(
            decoded.values["dates"],
            Value::array([Value::Timestamp(at(1, 0)), Value::Timestamp(at(2, 0))])
        );
        assert_eq!(decoded.errors.len(), 1);
        assert_eq!(decoded.errors[0].path(), "dates[1]");
    }

    #[test]
    fn unknown_one_of_tag_is_rejected_on_both_paths() {
        let one_of = OneOf::new([("text", Property::string())]);
        let schema = EntitySchema::new("Blog").property("content", Property::one_of(one_of.clone()));

        let mut values = EntityValues::new();
        values.insert(
            "content".into(),
            Value::array([one_of.element("video", Value::from("clip"))]),
        );
        assert!(matches!(
            to_store_format(&values, &schema, "blog"),
            Err(EncodeError::UnknownVariant { tag, .. }) if tag == "video"
        ));

        let mut element = IndexMap::new();
        element.insert("type".to_string(), StoreValue::String("video".into()));
        element.insert("value".to_string(), StoreValue::String("clip".into()));
        let document = doc([("content", StoreValue::Array(vec![StoreValue::Map(element)]))]);
        let decoded = from_store_format(&document, &schema, "blog");
        assert_eq!(decoded.values["content"], Value::Array(vec![]));
        assert!(matches!(
            &decoded.errors[..],
            [ConversionError::UnknownVariant { path, tag }] if path == "content[0]" && tag == "video"
        ));
    }

    #[test]
    fn reference_written_as_path_string_is_coerced() {
        let schema = EntitySchema::new("Order").property("customer", Property::reference("users"));
        let mut values = EntityValues::new();
        values.insert("customer".into(), Value::from("users/u1"));

        let document = to_store_format(&values, &schema, "orders").unwrap();
        assert_eq!(document["customer"], StoreValue::Reference("users/u1".into()));

        let decoded = from_store_format(&document, &schema, "orders");
        assert_eq!(
            decoded.values["customer"],
            Value::Reference(EntityReference::new("users", "u1"))
        );
    }

    #[test]
    fn mismatched_write_passes_raw_value_through() {
        let schema = EntitySchema::new("Product").property("price", Property::number());
        let mut values = EntityValues::new();
        values.insert("price".into(), Value::from("free"));

        let document = to_store_format(&values, &schema, "products").unwrap();
        assert_eq!(document["price"], StoreValue::String("free".into()));
    }

    #[test]
    fn unmodeled_fields_pass_through_both_ways() {
        let schema = EntitySchema::new("Product").property("name", Property::string());
        let document = doc([
            ("name", StoreValue::String("Lamp".into())),
            ("legacy_at", StoreValue::Timestamp { seconds: 5, nanos: 0 }),
        ]);

        let decoded = from_store_format(&document, &schema, "products");
        assert_eq!(decoded.values["legacy_at"], Value::Timestamp(at(5, 0)));

        let encoded = to_store_format(&decoded.values, &schema, "products").unwrap();
        assert_eq!(encoded, document);
    }

    #[test]
    fn numbers_keep_integers_and_infinities() {
        assert_eq!(number_to_store(3.0), StoreValue::Integer(3));
        assert_eq!(number_to_store(2.5), StoreValue::Double(2.5));
        assert_eq!(number_to_store(f64::INFINITY), StoreValue::Double(f64::INFINITY));
        assert_eq!(number_to_store(1e300), StoreValue::Double(1e300));
    }

    #[test]
    fn invalid_nanos_are_out_of_range() {
        assert!(timestamp_from_store(0, -1).is_none());
        assert!(timestamp_from_store(0, 1_000_000_000).is_none());
        assert!(timestamp_from_store(0, 999_999_999).is_some());
    }
}
