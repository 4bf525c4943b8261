use std::cmp::Ordering;
use std::future::Future;

use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::store_value::{StoreDocument, StoreValue, field_at};

/// Live feed of one document. `None` means the document does not exist.
pub type DocumentWatch = mpsc::UnboundedReceiver<Option<StoreDocument>>;

/// Live feed of a collection query, one full result set per change.
pub type CollectionWatch = mpsc::UnboundedReceiver<Vec<StoredDocument>>;

/// A document together with its id inside a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: StoreDocument,
}

/// A remote document store addressed by collection path and document id.
///
/// Stores work purely on native documents: they know nothing of schemas or
/// typed values. Watches deliver the current state first and then one
/// message per change, in order. Dropping the receiver releases the watch.
pub trait DocumentStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<StoreDocument>, Self::Error>> + Send;

    fn query_documents(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> impl Future<Output = Result<Vec<StoredDocument>, Self::Error>> + Send;

    /// Writes a document. With `merge`, fields absent from `document` are
    /// kept and nested maps are merged key by key.
    fn set_document(
        &self,
        collection: &str,
        id: &str,
        document: StoreDocument,
        merge: bool,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Writes a new document under a store-assigned id and returns the id.
    fn add_document(
        &self,
        collection: &str,
        document: StoreDocument,
    ) -> impl Future<Output = Result<String, Self::Error>> + Send;

    fn delete_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn watch_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<DocumentWatch, Self::Error>> + Send;

    fn watch_collection(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> impl Future<Output = Result<CollectionWatch, Self::Error>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    ArrayContains,
    In,
}

impl FilterOp {
    fn matches(self, field: &StoreValue, operand: &StoreValue) -> bool {
        match self {
            FilterOp::Eq => field.query_eq(operand),
            FilterOp::NotEq => !field.query_eq(operand),
            FilterOp::Lt => field.compare(operand) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                field.compare(operand),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => field.compare(operand) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                field.compare(operand),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::ArrayContains => match field {
                StoreValue::Array(items) => items.iter().any(|item| item.query_eq(operand)),
                _ => false,
            },
            FilterOp::In => match operand {
                StoreValue::Array(candidates) => {
                    candidates.iter().any(|candidate| field.query_eq(candidate))
                }
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreFilter {
    /// Stored field name; dotted paths address nested map fields.
    pub field: String,
    pub op: FilterOp,
    pub value: StoreValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// A collection query in store terms.
///
/// Documents lacking a filtered field never match. Documents lacking the
/// ordering field are excluded from ordered results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreQuery {
    pub filters: Vec<StoreFilter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl StoreQuery {
    pub fn matches(&self, document: &StoreDocument) -> bool {
        let filtered = self.filters.iter().all(|filter| {
            field_at(document, &filter.field)
                .is_some_and(|value| filter.op.matches(value, &filter.value))
        });
        let ordered = self
            .order_by
            .as_ref()
            .is_none_or(|order| field_at(document, &order.field).is_some());
        filtered && ordered
    }

    /// Filters, sorts and truncates a full collection listing.
    pub fn apply(&self, documents: impl IntoIterator<Item = StoredDocument>) -> Vec<StoredDocument> {
        let mut matching: Vec<StoredDocument> = documents
            .into_iter()
            .filter(|doc| self.matches(&doc.data))
            .collect();

        if let Some(order) = &self.order_by {
            matching.sort_by(|a, b| {
                let ordering = match (field_at(&a.data, &order.field), field_at(&b.data, &order.field)) {
                    (Some(x), Some(y)) => x.total_cmp(y),
                    _ => Ordering::Equal,
                };
                match order.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        }

        if let Some(limit) = self.limit {
            matching.truncate(limit);
        }
        matching
    }
}

/// Merges `incoming` into `target`: nested maps merge recursively, every
/// other value replaces what was there.
pub fn merge_document(target: &mut StoreDocument, incoming: StoreDocument) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(StoreValue::Map(existing)), StoreValue::Map(nested)) => {
                merge_document(existing, nested)
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Generates a random alphanumeric document id.
pub fn auto_id(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn stored(id: &str, entries: &[(&str, StoreValue)]) -> StoredDocument {
        StoredDocument {
            id: id.to_string(),
            data: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    fn products() -> Vec<StoredDocument> {
        vec![
            stored("a", &[("price", StoreValue::Integer(30)), ("tags", StoreValue::Array(vec![StoreValue::String("sale".into())]))]),
            stored("b", &[("price", StoreValue::Double(12.5))]),
            stored("c", &[("name", StoreValue::String("no price".into()))]),
            stored("d", &[("price", StoreValue::Integer(20)), ("tags", StoreValue::Array(vec![]))]),
        ]
    }

    fn ids(docs: &[StoredDocument]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn range_filter_and_descending_order() {
        let query = StoreQuery {
            filters: vec![StoreFilter {
                field: "price".into(),
                op: FilterOp::Gte,
                value: StoreValue::Integer(15),
            }],
            order_by: Some(OrderBy {
                field: "price".into(),
                direction: SortDirection::Desc,
            }),
            limit: None,
        };
        assert_eq!(ids(&query.apply(products())), vec!["a", "d"]);
    }

    #[test]
    fn ordering_excludes_documents_without_the_field() {
        let query = StoreQuery {
            order_by: Some(OrderBy {
                field: "price".into(),
                direction: SortDirection::Asc,
            }),
            limit: Some(2),
            ..Default::default()
        };
        assert_eq!(ids(&query.apply(products())), vec!["b", "d"]);
    }

    #[test]
    fn ordering_is_total_over_nan_and_mixed_kinds() {
        let mut documents = Vec::new();
        for i in 0..200 {
            let price = match i % 4 {
                0 => StoreValue::Double(f64::NAN),
                1 => StoreValue::Integer(200 - i),
                2 => StoreValue::Double((200 - i) as f64 + 0.5),
                _ => StoreValue::String(format!("{:03}", 200 - i)),
            };
            documents.push(stored(&format!("d{i:03}"), &[("price", price)]));
        }
        let query = StoreQuery {
            order_by: Some(OrderBy {
                field: "price".into(),
                direction: SortDirection::Asc,
            }),
            ..Default::default()
        };

        let sorted = query.apply(documents);
        assert_eq!(sorted.len(), 200);
        for pair in sorted.windows(2) {
            let (a, b) = (&pair[0].data["price"], &pair[1].data["price"]);
            assert_ne!(a.total_cmp(b), Ordering::Greater, "{a:?} sorted before {b:?}");
        }
        assert!(matches!(sorted[0].data["price"], StoreValue::Double(d) if d.is_nan()));
        assert!(matches!(sorted[49].data["price"], StoreValue::Double(d) if d.is_nan()));
        assert!(matches!(sorted[50].data["price"], StoreValue::Integer(_) | StoreValue::Double(_)));
        assert!(matches!(sorted[150].data["price"], StoreValue::String(_)));
        assert_eq!(sorted[199].data["price"], StoreValue::String("197".into()));
    }

    #[test]
    fn array_contains_and_in() {
        let contains = StoreQuery {
            filters: vec![StoreFilter {
                field: "tags".into(),
                op: FilterOp::ArrayContains,
                value: StoreValue::String("sale".into()),
            }],
            ..Default::default()
        };
        assert_eq!(ids(&contains.apply(products())), vec!["a"]);

        let within = StoreQuery {
            filters: vec![StoreFilter {
                field: "price".into(),
                op: FilterOp::In,
                value: StoreValue::Array(vec![StoreValue::Integer(20), StoreValue::Double(12.5)]),
            }],
            ..Default::default()
        };
        assert_eq!(ids(&within.apply(products())), vec!["b", "d"]);
    }

    #[test]
    fn merge_keeps_untouched_nested_fields() {
        let mut address = IndexMap::new();
        address.insert("city".to_string(), StoreValue::String("Girona".into()));
        address.insert("zip".to_string(), StoreValue::Integer(17001));
        let mut target = StoreDocument::new();
        target.insert("address".into(), StoreValue::Map(address));
        target.insert("name".into(), StoreValue::String("old".into()));

        let mut patch_address = IndexMap::new();
        patch_address.insert("zip".to_string(), StoreValue::Integer(17002));
        let mut incoming = StoreDocument::new();
        incoming.insert("address".into(), StoreValue::Map(patch_address));

        merge_document(&mut target, incoming);
        let StoreValue::Map(address) = &target["address"] else {
            panic!("address should stay a map");
        };
        assert_eq!(address["city"], StoreValue::String("Girona".into()));
        assert_eq!(address["zip"], StoreValue::Integer(17002));
        assert_eq!(target["name"], StoreValue::String("old".into()));
    }

    #[test]
    fn auto_ids_are_alphanumeric() {
        let id = auto_id(20);
        assert_eq!(id.len(), 20);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, auto_id(20));
    }
}
