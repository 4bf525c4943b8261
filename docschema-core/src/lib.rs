//! Docschema is a schema-driven binding layer over document stores.
//!
//! Core concepts:
//! - **Property**: Typed description of one field (string, number, boolean, timestamp,
//!   geopoint, reference, array, map), or a builder computing one from the entity's values
//! - **EntitySchema**: An ordered set of properties plus default values
//! - **Value**: The typed runtime value of a field
//! - **StoreValue**: The store's native representation of a field
//! - **DataSource**: Typed CRUD and cancellable live subscriptions over a `DocumentStore`
//!
//! # Example
//!
//! ```
//! use docschema_core::{
//!     EntitySchema, Property, Value, from_store_format, init_entity_values, to_store_format,
//! };
//!
//! let schema = EntitySchema::new("Product")
//!     .property("name", Property::string().required())
//!     .property("tags", Property::array_of(Property::string()))
//!     .default_value("tags", Value::array([Value::from("new")]));
//!
//! let mut values = init_entity_values(&schema, "products");
//! assert_eq!(values["name"], Value::Null);
//!
//! values.insert("name".into(), Value::from("Lamp"));
//! let document = to_store_format(&values, &schema, "products").unwrap();
//! let decoded = from_store_format(&document, &schema, "products");
//! assert_eq!(decoded.values, values);
//! assert!(decoded.errors.is_empty());
//! ```
//!
//! # Conversion errors
//!
//! Reading never fails as a whole. A stored field that does not match its
//! property is left out of the decoded values and reported as a
//! [`ConversionError`] carrying the field path.

mod codec;
mod datasource;
mod export;
mod init;
mod memory;
mod property;
mod reference;
mod registry;
mod schema;
mod store;
mod store_value;
mod subscription;
mod validation;
mod value;
pub mod watch;

pub use codec::{ConversionError, Decoded, EncodeError, from_store_format, to_store_format, to_store_value};
pub use datasource::{DataSource, DataSourceError, DataSourceOptions, Entity, EntityIter, Filter, Query};
pub use export::{ExportColumn, ExportRow, RESERVED_COLUMNS, export_entities, to_export_json};
pub use init::{init_entity_values, init_property_value};
pub use memory::{MemoryStore, MemoryStoreConfig};
pub use property::{
    ArrayProperty, DataKind, MapProperty, OneOf, Property, PropertyBuilder, PropertyConfig,
    PropertyContext, PropertyKind, PropertyOrBuilder, ReferenceProperty, StorageMeta, Validation,
    resolve_property,
};
pub use reference::{ReferenceState, reference_address};
pub use registry::SchemaRegistry;
pub use schema::{EntitySchema, SchemaDefinition, SchemaError};
pub use store::{
    CollectionWatch, DocumentStore, DocumentWatch, FilterOp, OrderBy, SortDirection, StoreFilter,
    StoreQuery, StoredDocument, auto_id, merge_document,
};
pub use store_value::{StoreDocument, StoreValue, field_at};
pub use subscription::Subscription;
pub use validation::{ValidationError, validate_entity};
pub use value::{EntityReference, EntityValues, GeoPoint, InvalidAddress, Value};
