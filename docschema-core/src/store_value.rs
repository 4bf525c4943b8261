use std::cmp::Ordering;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A document as the remote store holds it.
pub type StoreDocument = IndexMap<String, StoreValue>;

/// Native wire representation of a document field.
///
/// This is the store's own value model; the codec maps it to and from
/// [`crate::Value`] under the guidance of a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Timestamp { seconds: i64, nanos: i32 },
    GeoPoint { latitude: f64, longitude: f64 },
    /// Full document path, e.g. `products/abc`.
    Reference(String),
    Array(Vec<StoreValue>),
    Map(IndexMap<String, StoreValue>),
}

impl StoreValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            StoreValue::Null => "null",
            StoreValue::Boolean(_) => "boolean",
            StoreValue::Integer(_) => "integer",
            StoreValue::Double(_) => "double",
            StoreValue::String(_) => "string",
            StoreValue::Timestamp { .. } => "timestamp",
            StoreValue::GeoPoint { .. } => "geopoint",
            StoreValue::Reference(_) => "reference",
            StoreValue::Array(_) => "array",
            StoreValue::Map(_) => "map",
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            StoreValue::Integer(i) => Some(*i as f64),
            StoreValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Orders two values of the same kind. Integers and doubles compare
    /// numerically; values of different kinds are unordered.
    pub fn compare(&self, other: &StoreValue) -> Option<Ordering> {
        match (self, other) {
            (StoreValue::Null, StoreValue::Null) => Some(Ordering::Equal),
            (StoreValue::Boolean(a), StoreValue::Boolean(b)) => Some(a.cmp(b)),
            (StoreValue::String(a), StoreValue::String(b)) => Some(a.cmp(b)),
            (StoreValue::Reference(a), StoreValue::Reference(b)) => Some(a.cmp(b)),
            (
                StoreValue::Timestamp { seconds: s1, nanos: n1 },
                StoreValue::Timestamp { seconds: s2, nanos: n2 },
            ) => Some((s1, n1).cmp(&(s2, n2))),
            (
                StoreValue::GeoPoint { latitude: a1, longitude: o1 },
                StoreValue::GeoPoint { latitude: a2, longitude: o2 },
            ) => match a1.partial_cmp(a2)? {
                Ordering::Equal => o1.partial_cmp(o2),
                ord => Some(ord),
            },
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        }
    }

    /// Position of the value's kind in the cross-kind sort order.
    fn kind_rank(&self) -> u8 {
        match self {
            StoreValue::Null => 0,
            StoreValue::Boolean(_) => 1,
            StoreValue::Integer(_) | StoreValue::Double(_) => 2,
            StoreValue::Timestamp { .. } => 3,
            StoreValue::String(_) => 4,
            StoreValue::Reference(_) => 5,
            StoreValue::GeoPoint { .. } => 6,
            StoreValue::Array(_) => 7,
            StoreValue::Map(_) => 8,
        }
    }

    /// Total order used to sort query results.
    ///
    /// Kinds rank null, boolean, number, timestamp, string, reference,
    /// geopoint, array, map. NaN sorts before every other number; arrays and
    /// maps compare element by element, then by length.
    pub fn total_cmp(&self, other: &StoreValue) -> Ordering {
        match (self, other) {
            (StoreValue::GeoPoint { latitude: a1, longitude: o1 }, StoreValue::GeoPoint { latitude: a2, longitude: o2 }) => {
                number_cmp(*a1, *a2).then_with(|| number_cmp(*o1, *o2))
            }
            (StoreValue::Array(a), StoreValue::Array(b)) => a
                .iter()
                .zip(b)
                .map(|(x, y)| x.total_cmp(y))
                .find(|ord| ord.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (StoreValue::Map(a), StoreValue::Map(b)) => a
                .iter()
                .zip(b)
                .map(|((k1, v1), (k2, v2))| k1.cmp(k2).then_with(|| v1.total_cmp(v2)))
                .find(|ord| ord.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => number_cmp(x, y),
                _ => a
                    .kind_rank()
                    .cmp(&b.kind_rank())
                    .then_with(|| a.compare(b).unwrap_or(Ordering::Equal)),
            },
        }
    }

    /// Equality used by query filters: numeric kinds compare by value.
    pub fn query_eq(&self, other: &StoreValue) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(x), Some(y)) => x == y,
            _ => self == other,
        }
    }
}

fn number_cmp(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

/// Looks up a dotted field path (`address.city`) in a document.
pub fn field_at<'a>(document: &'a StoreDocument, path: &str) -> Option<&'a StoreValue> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        match current {
            StoreValue::Map(map) => current = map.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_kinds_compare_across_representation() {
        assert_eq!(
            StoreValue::Integer(2).compare(&StoreValue::Double(2.5)),
            Some(Ordering::Less)
        );
        assert!(StoreValue::Integer(3).query_eq(&StoreValue::Double(3.0)));
    }

    #[test]
    fn mixed_kinds_are_unordered() {
        assert_eq!(
            StoreValue::String("a".into()).compare(&StoreValue::Integer(1)),
            None
        );
    }

    #[test]
    fn sort_order_ranks_kinds_and_puts_nan_first() {
        let mut values = vec![
            StoreValue::String("b".into()),
            StoreValue::Integer(3),
            StoreValue::Double(f64::NAN),
            StoreValue::Null,
            StoreValue::Double(-1.5),
            StoreValue::Timestamp { seconds: 1, nanos: 0 },
            StoreValue::Boolean(true),
            StoreValue::Array(vec![StoreValue::Integer(1)]),
            StoreValue::Integer(3),
        ];
        values.sort_by(StoreValue::total_cmp);

        let kinds: Vec<_> = values.iter().map(StoreValue::kind_name).collect();
        assert_eq!(
            kinds,
            vec!["null", "boolean", "double", "double", "integer", "integer", "timestamp", "string", "array"]
        );
        assert!(matches!(values[2], StoreValue::Double(d) if d.is_nan()));
        assert_eq!(values[3], StoreValue::Double(-1.5));
    }

    #[test]
    fn arrays_sort_by_elements_then_length() {
        let short = StoreValue::Array(vec![StoreValue::Integer(1)]);
        let long = StoreValue::Array(vec![StoreValue::Integer(1), StoreValue::Integer(0)]);
        let bigger = StoreValue::Array(vec![StoreValue::Integer(2)]);
        assert_eq!(short.total_cmp(&long), Ordering::Less);
        assert_eq!(long.total_cmp(&bigger), Ordering::Less);
    }

    #[test]
    fn timestamps_order_by_seconds_then_nanos() {
        let a = StoreValue::Timestamp { seconds: 10, nanos: 5 };
        let b = StoreValue::Timestamp { seconds: 10, nanos: 7 };
        assert_eq!(a.compare(&b), Some(Ordering::Less));
    }

    #[test]
    fn dotted_field_lookup() {
        let mut address = IndexMap::new();
        address.insert("city".to_string(), StoreValue::String("Girona".into()));
        let mut doc = StoreDocument::new();
        doc.insert("address".to_string(), StoreValue::Map(address));

        assert_eq!(
            field_at(&doc, "address.city"),
            Some(&StoreValue::String("Girona".into()))
        );
        assert_eq!(field_at(&doc, "address.zip"), None);
    }
}
