use std::sync::Arc;

use indexmap::IndexMap;

use crate::property::{ArrayProperty, Property, PropertyKind, PropertyOrBuilder, ReferenceProperty};
use crate::schema::{EntitySchema, SchemaDefinition, SchemaError};

/// Number of keys shown when a reference declares no usable preview keys.
const DEFAULT_PREVIEW_KEYS: usize = 3;

/// Schemas by collection path.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: IndexMap<String, Arc<EntitySchema>>,
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definitions(definitions: impl IntoIterator<Item = (String, SchemaDefinition)>) -> Self {
        let mut registry = SchemaRegistry::new();
        for (path, definition) in definitions {
            registry.register(&path, definition.into());
        }
        registry
    }

    pub fn register(&mut self, collection_path: &str, schema: EntitySchema) -> Arc<EntitySchema> {
        let schema = Arc::new(schema);
        self.schemas
            .insert(normalize(collection_path).to_string(), schema.clone());
        schema
    }

    pub fn get(&self, collection_path: &str) -> Option<Arc<EntitySchema>> {
        self.schemas.get(normalize(collection_path)).cloned()
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    /// Checks every schema, plus every reference against the schema of the
    /// collection it points at.
    pub fn check(&self) -> Result<(), SchemaError> {
        for schema in self.schemas.values() {
            schema.check()?;

            let mut references = Vec::new();
            for (key, slot) in &schema.properties {
                if let PropertyOrBuilder::Property(property) = slot {
                    collect_references(key, property, &mut references);
                }
            }

            for (key, reference) in references {
                let target = self.get(&reference.collection_path).ok_or_else(|| {
                    SchemaError::UnknownCollection {
                        schema: schema.name.clone(),
                        key: key.clone(),
                        collection: reference.collection_path.clone(),
                    }
                })?;
                if let Some(undeclared) = reference
                    .preview_properties
                    .iter()
                    .find(|preview| target.get(preview).is_none())
                {
                    return Err(SchemaError::UndeclaredKey {
                        schema: target.name.clone(),
                        key: undeclared.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Keys of the target schema to show when previewing `reference`.
    ///
    /// Declared preview keys that exist in the target, or else the target's
    /// first keys.
    pub fn preview_keys(&self, reference: &ReferenceProperty) -> Vec<String> {
        let Some(target) = self.get(&reference.collection_path) else {
            return Vec::new();
        };
        let declared: Vec<String> = reference
            .preview_properties
            .iter()
            .filter(|key| target.get(key).is_some())
            .cloned()
            .collect();
        if !declared.is_empty() {
            return declared;
        }
        target
            .keys()
            .take(DEFAULT_PREVIEW_KEYS)
            .map(str::to_string)
            .collect()
    }
}

fn collect_references<'a>(path: &str, property: &'a Property, out: &mut Vec<(String, &'a ReferenceProperty)>) {
    match &property.kind {
        PropertyKind::Reference(reference) => out.push((path.to_string(), reference)),
        PropertyKind::Array(ArrayProperty::Of(of)) => collect_references(&format!("{path}[]"), of, out),
        PropertyKind::Array(ArrayProperty::OneOf(one_of)) => {
            for (tag, variant) in &one_of.properties {
                collect_references(&format!("{path}[{tag}]"), variant, out);
            }
        }
        PropertyKind::Map(map) => {
            for (key, child) in &map.properties {
                collect_references(&format!("{path}.{key}"), child, out);
            }
        }
        _ => {}
    }
}
