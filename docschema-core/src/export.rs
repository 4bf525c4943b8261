//! Bulk export of entities into flat JSON rows.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::SecondsFormat;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Number};

use crate::datasource::Entity;
use crate::schema::EntitySchema;
use crate::value::Value;

/// One exported row, keys in column order.
pub type ExportRow = Map<String, serde_json::Value>;

type BuildColumn = dyn Fn(&Entity) -> BoxFuture<'static, Value> + Send + Sync;

/// A derived column computed per entity during export.
#[derive(Clone)]
pub struct ExportColumn {
    pub key: String,
    build: Arc<BuildColumn>,
}

impl ExportColumn {
    pub fn new<F, Fut>(key: impl Into<String>, build: F) -> Self
    where
        F: Fn(&Entity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        ExportColumn {
            key: key.into(),
            build: Arc::new(move |entity| build(entity).boxed()),
        }
    }

    pub fn build(&self, entity: &Entity) -> BoxFuture<'static, Value> {
        (self.build)(entity)
    }
}

impl fmt::Debug for ExportColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportColumn").field("key", &self.key).finish_non_exhaustive()
    }
}

/// Columns holding the entity's address. Schema keys, stored keys and derived
/// columns with these names are left out of the row.
pub const RESERVED_COLUMNS: [&str; 2] = ["id", "path"];

/// Flattens entities into rows: `id`, `path`, every schema key, any extra
/// stored key, then the derived columns.
///
/// Schema keys an entity lacks are exported as `null`. Each column builder is
/// awaited in turn and its result used as-is.
pub async fn export_entities(
    entities: impl IntoIterator<Item = Entity>,
    schema: &EntitySchema,
    columns: &[ExportColumn],
) -> Vec<ExportRow> {
    let mut rows = Vec::new();
    for entity in entities {
        let mut row = ExportRow::new();
        row.insert("id".into(), entity.id.clone().into());
        row.insert("path".into(), entity.path.clone().into());

        for key in schema.keys().filter(|key| !is_reserved(key)) {
            let value = entity.get(key).map(to_export_json).unwrap_or_default();
            row.insert(key.to_string(), value);
        }
        if let Some(values) = &entity.values {
            for (key, value) in values {
                if schema.get(key).is_none() && !is_reserved(key) {
                    row.insert(key.clone(), to_export_json(value));
                }
            }
        }

        for column in columns.iter().filter(|column| !is_reserved(&column.key)) {
            let value = column.build(&entity).await;
            row.insert(column.key.clone(), to_export_json(&value));
        }
        rows.push(row);
    }
    rows
}

fn is_reserved(key: &str) -> bool {
    RESERVED_COLUMNS.contains(&key)
}

/// Readable JSON for spreadsheets and scripts: timestamps as RFC 3339,
/// references as their full path, geopoints as `{lat, lng}` and non-finite
/// numbers as strings.
pub fn to_export_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::String(s) => s.clone().into(),
        Value::Number(n) => match Number::from_f64(*n) {
            Some(_) if n.fract() == 0.0 && n.abs() < 1e15 => (*n as i64).into(),
            Some(number) => serde_json::Value::Number(number),
            None if n.is_nan() => "NaN".into(),
            None if *n > 0.0 => "Infinity".into(),
            None => "-Infinity".into(),
        },
        Value::Boolean(b) => (*b).into(),
        Value::Timestamp(t) => t.to_rfc3339_opts(SecondsFormat::AutoSi, true).into(),
        Value::GeoPoint(p) => serde_json::json!({ "lat": p.lat, "lng": p.lng }),
        Value::Reference(r) => r.full_path().into(),
        Value::Array(items) => items.iter().map(to_export_json).collect(),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), to_export_json(v)))
                .collect(),
        ),
    }
}
