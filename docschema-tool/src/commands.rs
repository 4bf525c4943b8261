//! Subcommand implementations. Each returns the text to print.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use docschema_core::{
    DataSource, EntitySchema, ExportColumn, PropertyKind, PropertyOrBuilder, Query,
    ReferenceState, SchemaRegistry, Value, export_entities, init_entity_values,
    reference_address, validate_entity,
};
use log::{debug, warn};
use serde_json::json;

use crate::error::ToolError;
use crate::fixture::{load_fixture, seed};
use crate::store::AnyStore;

/// A data source plus the schemas of the collections it serves.
pub struct AppContext {
    pub source: DataSource<AnyStore>,
    pub registry: SchemaRegistry,
}

impl AppContext {
    pub fn new(source: DataSource<AnyStore>, registry: SchemaRegistry) -> Self {
        Self { source, registry }
    }

    fn schema(&self, collection: &str) -> Result<Arc<EntitySchema>, ToolError> {
        self.registry
            .get(collection)
            .ok_or_else(|| ToolError::UnknownCollection(collection.to_string()))
    }
}

/// Values a new entity of `collection` starts with.
pub fn init(ctx: &AppContext, collection: &str) -> Result<String, ToolError> {
    let schema = ctx.schema(collection)?;
    let values = init_entity_values(&schema, collection);
    Ok(serde_json::to_string_pretty(&values)?)
}

pub async fn get(ctx: &AppContext, collection: &str, id: &str) -> Result<String, ToolError> {
    let schema = ctx.schema(collection)?;
    let entity = ctx.source.fetch_entity(collection, id, &schema).await?;

    let output = match &entity.values {
        Some(values) => json!({
            "id": entity.id,
            "path": entity.path,
            "values": values,
            "conversionErrors": entity
                .conversion_errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>(),
        }),
        None => json!({
            "id": entity.id,
            "path": entity.path,
            "missing": true,
        }),
    };
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Export output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExportFormat {
    /// One pretty-printed array.
    #[default]
    Json,
    /// One compact row per line.
    Jsonl,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "jsonl" | "ndjson" => Ok(ExportFormat::Jsonl),
            _ => Err(format!("unknown format: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub limit: Option<usize>,
    /// Add a `<key>Preview` column for every reference property, holding the
    /// preview keys of the referenced entity.
    pub expand_references: bool,
}

pub async fn export(ctx: &AppContext, collection: &str, options: &ExportOptions) -> Result<String, ToolError> {
    let schema = ctx.schema(collection)?;
    let mut query = Query::new();
    if let Some(limit) = options.limit {
        query = query.limit(limit);
    }

    let columns = if options.expand_references {
        reference_columns(ctx, &schema)
    } else {
        Vec::new()
    };

    let entities = ctx.source.fetch_collection(collection, &schema, &query).await?;
    let rows = export_entities(entities, &schema, &columns).await;
    debug!("exported {} rows from {collection}", rows.len());

    match options.format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(&rows)?),
        ExportFormat::Jsonl => {
            let mut out = String::new();
            for row in &rows {
                out.push_str(&serde_json::to_string(row)?);
                out.push('\n');
            }
            Ok(out)
        }
    }
}

fn reference_columns(ctx: &AppContext, schema: &EntitySchema) -> Vec<ExportColumn> {
    let mut columns = Vec::new();
    for (key, slot) in &schema.properties {
        let PropertyOrBuilder::Property(property) = slot else {
            continue;
        };
        let PropertyKind::Reference(reference) = &property.kind else {
            continue;
        };
        let Some(target) = ctx.registry.get(&reference.collection_path) else {
            continue;
        };

        let preview_keys = ctx.registry.preview_keys(reference);
        let source = ctx.source.clone();
        let key = key.clone();
        columns.push(ExportColumn::new(format!("{key}Preview"), move |entity| {
            let address = entity.get(&key).and_then(reference_address);
            let (source, target, preview_keys) = (source.clone(), target.clone(), preview_keys.clone());
            async move {
                let Some(address) = address else {
                    return Value::Null;
                };
                match source.fetch_entity(&address.path, &address.id, &target).await {
                    Ok(entity) => ReferenceState::from(entity)
                        .preview(&preview_keys)
                        .map(Value::Map)
                        .unwrap_or(Value::Null),
                    Err(e) => {
                        warn!("could not resolve {address}: {e}");
                        Value::Null
                    }
                }
            }
        }));
    }
    columns
}

pub async fn import(ctx: &AppContext, path: &Path) -> Result<String, ToolError> {
    let fixture = load_fixture(path)?;
    let written = seed(&ctx.source, &ctx.registry, &fixture).await?;
    Ok(format!("imported {written} documents"))
}

/// Result of checking stored entities against their schemas.
#[derive(Debug, Default)]
pub struct CheckReport {
    pub entities: usize,
    /// One line per problem, prefixed with the entity's full path.
    pub problems: Vec<String>,
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for problem in &self.problems {
            writeln!(f, "{problem}")?;
        }
        write!(
            f,
            "checked {} entities, {} problems",
            self.entities,
            self.problems.len()
        )
    }
}

/// Reads every registered collection and reports stored fields that do not
/// decode and values that break validation rules.
pub async fn check(ctx: &AppContext) -> Result<CheckReport, ToolError> {
    let mut report = CheckReport::default();
    let collections: Vec<String> = ctx.registry.collections().map(str::to_string).collect();

    for collection in &collections {
        let schema = ctx.schema(collection)?;
        let entities = ctx
            .source
            .fetch_collection(collection, &schema, &Query::new())
            .await?;

        for entity in entities {
            report.entities += 1;
            let address = entity.reference();
            for error in &entity.conversion_errors {
                report.problems.push(format!("{address}: {error}"));
            }
            if let Some(values) = &entity.values {
                for error in validate_entity(values, &schema, collection, Some(entity.id.as_str())) {
                    report.problems.push(format!("{address}: {error}"));
                }
            }
        }
    }
    Ok(report)
}
