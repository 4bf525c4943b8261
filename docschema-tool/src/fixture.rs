//! Schema files and document fixtures.
//!
//! A schema file maps collection paths to schema definitions, as TOML
//! (`.toml`) or JSON. A fixture is a JSON map of collection path to
//! document id to document, using the tagged value forms for typed fields:
//! `{"$timestamp": "2024-05-01T12:00:00Z"}`, `{"$geopoint": [lat, lng]}`,
//! `{"$ref": "brands/b1"}`.

use std::path::Path;

use docschema_core::{DataSource, EntitySchema, EntityValues, SchemaDefinition, SchemaRegistry};
use indexmap::IndexMap;
use log::debug;

use crate::error::ToolError;
use crate::store::AnyStore;

pub type Fixture = IndexMap<String, IndexMap<String, EntityValues>>;

fn read(path: &Path) -> Result<String, ToolError> {
    std::fs::read_to_string(path).map_err(|source| ToolError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads and checks a schema file.
pub fn load_schemas(path: &Path) -> Result<SchemaRegistry, ToolError> {
    let content = read(path)?;
    let definitions: IndexMap<String, SchemaDefinition> =
        if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content).map_err(|source| ToolError::Toml {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            serde_json::from_str(&content).map_err(|source| ToolError::Json {
                path: path.to_path_buf(),
                source,
            })?
        };

    let registry = SchemaRegistry::from_definitions(definitions);
    registry.check()?;
    Ok(registry)
}

pub fn load_fixture(path: &Path) -> Result<Fixture, ToolError> {
    let content = read(path)?;
    serde_json::from_str(&content).map_err(|source| ToolError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes every fixture document through its collection's schema. Fields of
/// collections without a schema are stored untyped. Returns the number of
/// documents written.
pub async fn seed(
    source: &DataSource<AnyStore>,
    registry: &SchemaRegistry,
    fixture: &Fixture,
) -> Result<usize, ToolError> {
    let mut written = 0;
    for (collection, documents) in fixture {
        let schema = registry
            .get(collection)
            .unwrap_or_else(|| EntitySchema::new(collection.as_str()).into());
        for (id, values) in documents {
            source
                .save_entity(collection, Some(id.as_str()), values, &schema)
                .await?;
            written += 1;
        }
        debug!("seeded {} documents into {collection}", documents.len());
    }
    Ok(written)
}
