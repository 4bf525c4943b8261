use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Decoded values of an entity, keyed by schema property key.
///
/// Order follows the schema declaration order.
pub type EntityValues = IndexMap<String, Value>;

/// A geographic point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        GeoPoint { lat, lng }
    }
}

/// Error parsing an entity address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid entity address: {0:?}")]
pub struct InvalidAddress(pub String);

/// The address of an entity: its collection path plus its id.
///
/// A reference only ever denotes where the target lives. Loading the target
/// is a separate operation (see [`crate::DataSource::resolve_reference`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityReference {
    pub path: String,
    pub id: String,
}

impl EntityReference {
    pub fn new(path: impl Into<String>, id: impl Into<String>) -> Self {
        EntityReference {
            path: path.into(),
            id: id.into(),
        }
    }

    /// Parses a full document path such as `products/abc/locales/es`.
    ///
    /// The path must have an even, non-zero number of non-empty segments.
    pub fn parse(full_path: &str) -> Result<Self, InvalidAddress> {
        let trimmed = full_path.trim_matches('/');
        let segments: Vec<&str> = trimmed.split('/').collect();
        if segments.len() < 2 || segments.len() % 2 != 0 || segments.iter().any(|s| s.is_empty()) {
            return Err(InvalidAddress(full_path.to_string()));
        }
        let (collection, id) = trimmed
            .rsplit_once('/')
            .ok_or_else(|| InvalidAddress(full_path.to_string()))?;
        Ok(EntityReference::new(collection, id))
    }

    /// Returns `path/id`.
    pub fn full_path(&self) -> String {
        format!("{}/{}", self.path, self.id)
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.path, self.id)
    }
}

/// Typed application value for a property.
///
/// Every property kind has exactly one canonical decoded shape here, so the
/// rendering layer can match on the variant to pick a widget.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    String(String),
    /// May be `INFINITY` or `NEG_INFINITY`.
    Number(f64),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    GeoPoint(GeoPoint),
    Reference(EntityReference),
    Array(Vec<Value>),
    Map(IndexMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::Timestamp(_) => "timestamp",
            Value::GeoPoint(_) => "geopoint",
            Value::Reference(_) => "reference",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&EntityReference> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Creates a map value from key/value pairs.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Creates an array value.
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(items.into_iter().collect())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(t: DateTime<Utc>) -> Self {
        Value::Timestamp(t)
    }
}

impl From<GeoPoint> for Value {
    fn from(p: GeoPoint) -> Self {
        Value::GeoPoint(p)
    }
}

impl From<EntityReference> for Value {
    fn from(r: EntityReference) -> Self {
        Value::Reference(r)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

// Serde form: plain JSON for the untyped variants, single-key `$` objects for
// the rest. Lossless, so schema files and fixtures can carry every kind.
// A map whose only key is one of the tags is written as `{"$map": [[key, value]]}`
// so it reads back as a map.
const TIMESTAMP_TAG: &str = "$timestamp";
const GEOPOINT_TAG: &str = "$geopoint";
const REF_TAG: &str = "$ref";
const NUMBER_TAG: &str = "$number";
const MAP_TAG: &str = "$map";
const TAGS: [&str; 5] = [TIMESTAMP_TAG, GEOPOINT_TAG, REF_TAG, NUMBER_TAG, MAP_TAG];

fn is_tag_shaped(entries: &IndexMap<String, Value>) -> bool {
    entries.len() == 1 && entries.keys().all(|key| TAGS.contains(&key.as_str()))
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::String(s) => serializer.serialize_str(s),
            Value::Number(n) if n.is_finite() => serializer.serialize_f64(*n),
            Value::Number(n) => {
                let text = if n.is_nan() {
                    "NaN"
                } else if *n > 0.0 {
                    "Infinity"
                } else {
                    "-Infinity"
                };
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(NUMBER_TAG, text)?;
                map.end()
            }
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Timestamp(t) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(TIMESTAMP_TAG, &t.to_rfc3339_opts(SecondsFormat::AutoSi, true))?;
                map.end()
            }
            Value::GeoPoint(p) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(GEOPOINT_TAG, &[p.lat, p.lng])?;
                map.end()
            }
            Value::Reference(r) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(REF_TAG, &r.full_path())?;
                map.end()
            }
            Value::Array(items) => items.serialize(serializer),
            Value::Map(entries) if is_tag_shaped(entries) => {
                let pairs: Vec<(&String, &Value)> = entries.iter().collect();
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(MAP_TAG, &pairs)?;
                map.end()
            }
            Value::Map(entries) => entries.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a document value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Boolean(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(Value::Number(v as f64))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Number(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut entries: IndexMap<String, Value> = IndexMap::new();
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            entries.insert(key, value);
        }
        if entries.len() == 1 {
            if let Some((key, inner)) = entries.first() {
                if let Some(typed) = typed_from_tag(key, inner).map_err(de::Error::custom)? {
                    return Ok(typed);
                }
            }
        }
        Ok(Value::Map(entries))
    }
}

fn typed_from_tag(tag: &str, inner: &Value) -> Result<Option<Value>, String> {
    let typed = match (tag, inner) {
        (TIMESTAMP_TAG, Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .map(|t| Value::Timestamp(t.with_timezone(&Utc)))
            .map_err(|e| format!("invalid {TIMESTAMP_TAG} {s:?}: {e}"))?,
        (GEOPOINT_TAG, Value::Array(pair)) => match pair.as_slice() {
            [Value::Number(lat), Value::Number(lng)] => Value::GeoPoint(GeoPoint::new(*lat, *lng)),
            _ => return Err(format!("{GEOPOINT_TAG} expects [lat, lng]")),
        },
        (REF_TAG, Value::String(s)) => {
            Value::Reference(EntityReference::parse(s).map_err(|e| e.to_string())?)
        }
        (NUMBER_TAG, Value::String(s)) => match s.as_str() {
            "Infinity" => Value::Number(f64::INFINITY),
            "-Infinity" => Value::Number(f64::NEG_INFINITY),
            "NaN" => Value::Number(f64::NAN),
            other => return Err(format!("invalid {NUMBER_TAG} {other:?}")),
        },
        (MAP_TAG, Value::Array(pairs)) => {
            let mut entries = IndexMap::with_capacity(pairs.len());
            for pair in pairs {
                match pair {
                    Value::Array(kv) => match kv.as_slice() {
                        [Value::String(key), value] => {
                            entries.insert(key.clone(), value.clone());
                        }
                        _ => return Err(format!("{MAP_TAG} expects [key, value] pairs")),
                    },
                    _ => return Err(format!("{MAP_TAG} expects [key, value] pairs")),
                }
            }
            Value::Map(entries)
        }
        _ => return Ok(None),
    };
    Ok(Some(typed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reference_parse_nested_path() {
        let r = EntityReference::parse("products/abc/locales/es").unwrap();
        assert_eq!(r.path, "products/abc/locales");
        assert_eq!(r.id, "es");
        assert_eq!(r.full_path(), "products/abc/locales/es");
    }

    #[test]
    fn reference_parse_rejects_collection_path() {
        assert!(EntityReference::parse("products").is_err());
        assert!(EntityReference::parse("products/abc/locales").is_err());
        assert!(EntityReference::parse("products//abc").is_err());
    }

    #[test]
    fn typed_values_survive_json() {
        let value = Value::map([
            ("at", Value::Timestamp(Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap())),
            ("where", Value::GeoPoint(GeoPoint::new(41.4, 2.17))),
            ("owner", Value::Reference(EntityReference::new("users", "u1"))),
            ("priority", Value::Number(f64::NEG_INFINITY)),
            ("tags", Value::array([Value::from("a"), Value::Null])),
        ]);

        let text = serde_json::to_string(&value).unwrap();
        let recovered: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(recovered, value);
    }

    #[test]
    fn plain_object_with_dollar_key_and_extra_fields_stays_a_map() {
        let recovered: Value =
            serde_json::from_str(r#"{"$ref": "users/u1", "note": "x"}"#).unwrap();
        assert!(matches!(recovered, Value::Map(ref m) if m.len() == 2));
    }

    #[test]
    fn map_keyed_by_a_tag_reads_back_as_a_map() {
        let value = Value::map([("$ref", Value::from("users/u1"))]);
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, r#"{"$map":[["$ref","users/u1"]]}"#);
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), value);

        let number = Value::map([("$number", Value::from("not a number"))]);
        let text = serde_json::to_string(&number).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), number);

        let nested = Value::map([("$map", Value::map([("$ref", Value::Number(3.0))]))]);
        let text = serde_json::to_string(&nested).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), nested);
    }

    #[test]
    fn malformed_tag_is_rejected() {
        let result: Result<Value, _> = serde_json::from_str(r#"{"$timestamp": "yesterday"}"#);
        assert!(result.is_err());
    }
}
