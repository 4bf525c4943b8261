//! Typed CRUD and live subscriptions over a [`DocumentStore`].

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::codec::{ConversionError, EncodeError, decode_entity, encode_entity, encode_value, to_store_value};
use crate::property::{ArrayProperty, Property, PropertyKind, resolve_property};
use crate::schema::EntitySchema;
use crate::store::{
    DocumentStore, FilterOp, OrderBy, SortDirection, StoreFilter, StoreQuery, StoredDocument,
};
use crate::store_value::{StoreDocument, StoreValue};
use crate::subscription::{Listener, Subscription};
use crate::value::{EntityReference, EntityValues, Value};

#[derive(Debug, thiserror::Error)]
pub enum DataSourceError<E: std::error::Error + 'static> {
    #[error("store error: {0}")]
    Store(#[source] E),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceOptions {
    /// Saving an existing entity merges into the stored document instead of
    /// replacing it, keeping fields the schema does not model.
    pub merge_on_save: bool,
    /// Limit applied to collection reads whose query sets none.
    pub default_limit: Option<usize>,
    /// Log every per-field conversion error at warn level.
    pub report_conversion_errors: bool,
}

impl Default for DataSourceOptions {
    fn default() -> Self {
        DataSourceOptions {
            merge_on_save: true,
            default_limit: None,
            report_conversion_errors: true,
        }
    }
}

/// An addressable document instance.
///
/// `values` is `None` exactly when the document does not exist, which is
/// distinct from a document whose fields are all empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    pub path: String,
    pub values: Option<EntityValues>,
    /// Fields left out of `values` because they did not match the schema.
    pub conversion_errors: Vec<ConversionError>,
}

impl Entity {
    pub fn reference(&self) -> EntityReference {
        EntityReference::new(self.path.clone(), self.id.clone())
    }

    pub fn is_missing(&self) -> bool {
        self.values.is_none()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.as_ref()?.get(key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Schema key; dotted paths address children of map properties.
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

/// A collection query in schema terms.
///
/// Field names and filter values are mapped through the schema before they
/// reach the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, SortDirection)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Translates the query into store terms.
    pub fn to_store_query(
        &self,
        schema: &EntitySchema,
        collection_path: &str,
    ) -> Result<StoreQuery, EncodeError> {
        let mut filters = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let (field, property) = store_field(schema, collection_path, &filter.field);
            let value = match (filter.op, property.as_ref()) {
                (FilterOp::In, property) => match &filter.value {
                    Value::Array(items) => StoreValue::Array(
                        items
                            .iter()
                            .map(|item| encode_operand(item, property, &filter.field))
                            .collect::<Result<_, _>>()?,
                    ),
                    other => encode_operand(other, property, &filter.field)?,
                },
                (FilterOp::ArrayContains, Some(property)) => match &property.kind {
                    PropertyKind::Array(ArrayProperty::Of(of)) => {
                        encode_value(&filter.value, of, &filter.field)?
                    }
                    _ => to_store_value(&filter.value),
                },
                (_, property) => encode_operand(&filter.value, property, &filter.field)?,
            };
            filters.push(StoreFilter {
                field,
                op: filter.op,
                value,
            });
        }

        let order_by = self.order_by.as_ref().map(|(field, direction)| OrderBy {
            field: store_field(schema, collection_path, field).0,
            direction: *direction,
        });

        Ok(StoreQuery {
            filters,
            order_by,
            limit: self.limit,
        })
    }
}

fn encode_operand(value: &Value, property: Option<&Property>, path: &str) -> Result<StoreValue, EncodeError> {
    match property {
        Some(property) => encode_value(value, property, path),
        None => Ok(to_store_value(value)),
    }
}

/// Maps a dotted schema path to its stored field path and property.
fn store_field(schema: &EntitySchema, collection_path: &str, field: &str) -> (String, Option<Property>) {
    let empty = EntityValues::new();
    let mut segments = field.split('.');
    let Some(first) = segments.next() else {
        return (field.to_string(), None);
    };
    let Some(slot) = schema.get(first) else {
        return (field.to_string(), None);
    };

    let mut property = resolve_property(slot, &empty, collection_path, None).into_owned();
    let mut stored = vec![property.store_key(first).to_string()];
    for segment in segments {
        let child = match &property.kind {
            PropertyKind::Map(map) => map.properties.get(segment).cloned(),
            _ => None,
        };
        match child {
            Some(child) => {
                stored.push(child.store_key(segment).to_string());
                property = child;
            }
            None => {
                stored.push(segment.to_string());
                stored.extend(field.split('.').skip(stored.len()).map(str::to_string));
                return (stored.join("."), None);
            }
        }
    }
    (stored.join("."), Some(property))
}

fn snapshot(
    path: &str,
    id: &str,
    document: Option<&StoreDocument>,
    schema: &EntitySchema,
    report: bool,
) -> Entity {
    let Some(document) = document else {
        return Entity {
            id: id.to_string(),
            path: path.to_string(),
            values: None,
            conversion_errors: Vec::new(),
        };
    };
    let decoded = decode_entity(document, schema, path, Some(id));
    if report {
        for error in &decoded.errors {
            warn!("{path}/{id}: {error}");
        }
    }
    Entity {
        id: id.to_string(),
        path: path.to_string(),
        values: Some(decoded.values),
        conversion_errors: decoded.errors,
    }
}

/// Lazily decoded result of a collection read.
pub struct EntityIter<'a> {
    documents: std::vec::IntoIter<StoredDocument>,
    path: &'a str,
    schema: &'a EntitySchema,
    report: bool,
}

impl Iterator for EntityIter<'_> {
    type Item = Entity;

    fn next(&mut self) -> Option<Entity> {
        let document = self.documents.next()?;
        Some(snapshot(
            self.path,
            &document.id,
            Some(&document.data),
            self.schema,
            self.report,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.documents.size_hint()
    }
}

impl ExactSizeIterator for EntityIter<'_> {}

impl fmt::Debug for EntityIter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityIter")
            .field("path", &self.path)
            .field("remaining", &self.documents.len())
            .finish()
    }
}

/// Typed access to a document store.
///
/// Holds no cache: every fetch is a fresh round trip, and only `listen_*`
/// keeps a store-side resource alive until its [`Subscription`] is
/// cancelled or dropped.
pub struct DataSource<S> {
    store: Arc<S>,
    options: DataSourceOptions,
}

impl<S> Clone for DataSource<S> {
    fn clone(&self) -> Self {
        DataSource {
            store: self.store.clone(),
            options: self.options.clone(),
        }
    }
}

impl<S> fmt::Debug for DataSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSource")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<S: DocumentStore + 'static> DataSource<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_options(store, DataSourceOptions::default())
    }

    pub fn with_options(store: Arc<S>, options: DataSourceOptions) -> Self {
        DataSource { store, options }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn options(&self) -> &DataSourceOptions {
        &self.options
    }

    fn store_query(&self, query: &Query, schema: &EntitySchema, path: &str) -> Result<StoreQuery, EncodeError> {
        let mut store_query = query.to_store_query(schema, path)?;
        if store_query.limit.is_none() {
            store_query.limit = self.options.default_limit;
        }
        Ok(store_query)
    }

    pub async fn fetch_entity(
        &self,
        path: &str,
        id: &str,
        schema: &EntitySchema,
    ) -> Result<Entity, DataSourceError<S::Error>> {
        let document = self
            .store
            .get_document(path, id)
            .await
            .map_err(DataSourceError::Store)?;
        debug!("fetched {path}/{id} (exists: {})", document.is_some());
        Ok(snapshot(path, id, document.as_ref(), schema, self.options.report_conversion_errors))
    }

    /// Reads a collection once. Entities are decoded as the iterator is
    /// consumed.
    pub async fn fetch_collection<'a>(
        &self,
        path: &'a str,
        schema: &'a EntitySchema,
        query: &Query,
    ) -> Result<EntityIter<'a>, DataSourceError<S::Error>> {
        let store_query = self.store_query(query, schema, path)?;
        let documents = self
            .store
            .query_documents(path, &store_query)
            .await
            .map_err(DataSourceError::Store)?;
        debug!("fetched {} documents from {path}", documents.len());
        Ok(EntityIter {
            documents: documents.into_iter(),
            path,
            schema,
            report: self.options.report_conversion_errors,
        })
    }

    /// Subscribes to one entity.
    ///
    /// `on_update` receives a freshly decoded snapshot for the current state
    /// and for every change after it, always from a spawned task and never
    /// from within this call. Must be called within a tokio runtime.
    pub async fn listen_entity(
        &self,
        path: &str,
        id: &str,
        schema: Arc<EntitySchema>,
        on_update: impl FnMut(Entity) + Send + 'static,
    ) -> Result<Subscription, DataSourceError<S::Error>> {
        let mut watch = self
            .store
            .watch_document(path, id)
            .await
            .map_err(DataSourceError::Store)?;

        let listener = Listener::new(on_update);
        let delivering = listener.clone();
        let report = self.options.report_conversion_errors;
        let (path, id) = (path.to_string(), id.to_string());
        let label = format!("{path}/{id}");
        debug!("listening to {label}");

        let task = tokio::spawn(async move {
            while let Some(document) = watch.recv().await {
                let entity = snapshot(&path, &id, document.as_ref(), &schema, report);
                if !delivering.deliver(entity) {
                    break;
                }
            }
        });
        Ok(Subscription::new(listener, task.abort_handle(), label))
    }

    /// Subscribes to a collection query, delivering the full result set on
    /// every change.
    pub async fn listen_collection(
        &self,
        path: &str,
        schema: Arc<EntitySchema>,
        query: &Query,
        on_update: impl FnMut(Vec<Entity>) + Send + 'static,
    ) -> Result<Subscription, DataSourceError<S::Error>> {
        let store_query = self.store_query(query, &schema, path)?;
        let mut watch = self
            .store
            .watch_collection(path, &store_query)
            .await
            .map_err(DataSourceError::Store)?;

        let listener = Listener::new(on_update);
        let delivering = listener.clone();
        let report = self.options.report_conversion_errors;
        let path = path.to_string();
        let label = path.clone();
        debug!("listening to collection {label}");

        let task = tokio::spawn(async move {
            while let Some(documents) = watch.recv().await {
                let entities = documents
                    .iter()
                    .map(|doc| snapshot(&path, &doc.id, Some(&doc.data), &schema, report))
                    .collect();
                if !delivering.deliver(entities) {
                    break;
                }
            }
        });
        Ok(Subscription::new(listener, task.abort_handle(), label))
    }

    /// Encodes and writes an entity. Without an id the store assigns one.
    pub async fn save_entity(
        &self,
        path: &str,
        id: Option<&str>,
        values: &EntityValues,
        schema: &EntitySchema,
    ) -> Result<Entity, DataSourceError<S::Error>> {
        let document = encode_entity(values, schema, path, id)?;
        let id = match id {
            Some(id) => {
                self.store
                    .set_document(path, id, document, self.options.merge_on_save)
                    .await
                    .map_err(DataSourceError::Store)?;
                id.to_string()
            }
            None => self
                .store
                .add_document(path, document)
                .await
                .map_err(DataSourceError::Store)?,
        };
        debug!("saved {path}/{id}");
        Ok(Entity {
            id,
            path: path.to_string(),
            values: Some(values.clone()),
            conversion_errors: Vec::new(),
        })
    }

    pub async fn delete_entity(&self, path: &str, id: &str) -> Result<(), DataSourceError<S::Error>> {
        self.store
            .delete_document(path, id)
            .await
            .map_err(DataSourceError::Store)?;
        debug!("deleted {path}/{id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order_schema() -> EntitySchema {
        EntitySchema::new("Order")
            .property("createdAt", Property::timestamp().with_storage_key("created_at"))
            .property("tags", Property::array_of(Property::string()))
            .property(
                "shipping",
                Property::map([("zipCode", Property::string().with_storage_key("zip_code"))]),
            )
            .property("customer", Property::reference("users"))
    }

    #[test]
    fn query_fields_use_storage_keys() {
        let query = Query::new()
            .filter("shipping.zipCode", FilterOp::Eq, "17001")
            .order_by("createdAt", SortDirection::Desc)
            .limit(5);
        let store_query = query.to_store_query(&order_schema(), "orders").unwrap();

        assert_eq!(store_query.filters[0].field, "shipping.zip_code");
        assert_eq!(store_query.order_by.unwrap().field, "created_at");
        assert_eq!(store_query.limit, Some(5));
    }

    #[test]
    fn filter_values_are_encoded_through_the_schema() {
        let query = Query::new()
            .filter("customer", FilterOp::Eq, "users/u1")
            .filter("tags", FilterOp::ArrayContains, "sale")
            .filter("unknown.deep", FilterOp::In, Value::array([Value::from(1.0)]));
        let store_query = query.to_store_query(&order_schema(), "orders").unwrap();

        assert_eq!(store_query.filters[0].value, StoreValue::Reference("users/u1".into()));
        assert_eq!(store_query.filters[1].value, StoreValue::String("sale".into()));
        assert_eq!(store_query.filters[2].field, "unknown.deep");
        assert_eq!(
            store_query.filters[2].value,
            StoreValue::Array(vec![StoreValue::Integer(1)])
        );
    }

    #[test]
    fn unknown_nested_segment_keeps_remaining_path() {
        let (field, property) = store_field(&order_schema(), "orders", "shipping.extra.deep");
        assert_eq!(field, "shipping.extra.deep");
        assert!(property.is_none());
    }

    #[test]
    fn missing_document_is_a_missing_entity() {
        let entity = snapshot("orders", "o1", None, &order_schema(), true);
        assert!(entity.is_missing());
        assert!(entity.conversion_errors.is_empty());
        assert_eq!(entity.reference().full_path(), "orders/o1");
    }
}
