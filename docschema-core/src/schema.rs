use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::property::{
    ArrayProperty, DataKind, Property, PropertyBuilder, PropertyContext, PropertyKind,
    PropertyOrBuilder,
};
use crate::value::{EntityValues, Value};

/// Schema authoring defects.
///
/// These are programming errors in a schema declaration, reported loudly
/// rather than recovered.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema {schema:?}: key {key:?} is not declared")]
    UndeclaredKey { schema: String, key: String },
    #[error("schema {schema:?}: default for {key:?} does not fit a {expected} property")]
    InvalidDefault {
        schema: String,
        key: String,
        expected: DataKind,
    },
    #[error("schema {schema:?}: {first:?} and {second:?} share storage key {storage_key:?}")]
    DuplicateStorageKey {
        schema: String,
        first: String,
        second: String,
        storage_key: String,
    },
    #[error("schema {schema:?}: reference {key:?} points at unknown collection {collection:?}")]
    UnknownCollection {
        schema: String,
        key: String,
        collection: String,
    },
}

/// Declarative description of an entity's fields.
///
/// Schemas are immutable input: resolving builders never writes back.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub name: String,
    pub properties: IndexMap<String, PropertyOrBuilder>,
    /// Top-level initial values that win over the kind-based defaults.
    pub default_values: EntityValues,
}

impl EntitySchema {
    pub fn new(name: impl Into<String>) -> Self {
        EntitySchema {
            name: name.into(),
            properties: IndexMap::new(),
            default_values: EntityValues::new(),
        }
    }

    /// Declares a fixed property.
    pub fn property(mut self, key: impl Into<String>, property: Property) -> Self {
        self.properties.insert(key.into(), property.into());
        self
    }

    /// Declares a property computed from the entity's current values.
    pub fn builder(
        mut self,
        key: impl Into<String>,
        build: impl Fn(&PropertyContext<'_>) -> Property + Send + Sync + 'static,
    ) -> Self {
        self.properties
            .insert(key.into(), PropertyBuilder::new(build).into());
        self
    }

    pub fn default_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&PropertyOrBuilder> {
        self.properties.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    /// Verifies that every key the schema refers to is declared.
    ///
    /// Covers schema default values (recursing into map defaults), per-property
    /// defaults of nested children, and storage key collisions. Builder slots
    /// can only be checked by key.
    pub fn check(&self) -> Result<(), SchemaError> {
        for (key, value) in &self.default_values {
            let slot = self.properties.get(key).ok_or_else(|| SchemaError::UndeclaredKey {
                schema: self.name.clone(),
                key: key.clone(),
            })?;
            if let PropertyOrBuilder::Property(property) = slot {
                self.check_default(key, property, value)?;
            }
        }

        let mut seen: IndexMap<String, String> = IndexMap::new();
        for (key, slot) in &self.properties {
            let PropertyOrBuilder::Property(property) = slot else {
                continue;
            };
            let storage_key = property.store_key(key).to_string();
            if let Some(first) = seen.insert(storage_key.clone(), key.clone()) {
                return Err(SchemaError::DuplicateStorageKey {
                    schema: self.name.clone(),
                    first,
                    second: key.clone(),
                    storage_key,
                });
            }
            self.check_property(key, property)?;
        }
        Ok(())
    }

    fn check_property(&self, path: &str, property: &Property) -> Result<(), SchemaError> {
        if let Some(value) = &property.default_value {
            self.check_default(path, property, value)?;
        }
        match &property.kind {
            PropertyKind::Map(map) => {
                let mut storage_keys = HashSet::new();
                for (child_key, child) in &map.properties {
                    let child_path = format!("{path}.{child_key}");
                    if !storage_keys.insert(child.store_key(child_key)) {
                        return Err(SchemaError::DuplicateStorageKey {
                            schema: self.name.clone(),
                            first: path.to_string(),
                            second: child_path,
                            storage_key: child.store_key(child_key).to_string(),
                        });
                    }
                    self.check_property(&child_path, child)?;
                }
            }
            PropertyKind::Array(ArrayProperty::Of(of)) => {
                self.check_property(&format!("{path}[]"), of)?;
            }
            PropertyKind::Array(ArrayProperty::OneOf(one_of)) => {
                for (tag, variant) in &one_of.properties {
                    self.check_property(&format!("{path}[{tag}]"), variant)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_default(&self, path: &str, property: &Property, value: &Value) -> Result<(), SchemaError> {
        if let (PropertyKind::Map(map), Value::Map(entries)) = (&property.kind, value) {
            for (child_key, child_value) in entries {
                let child = map.properties.get(child_key).ok_or_else(|| SchemaError::UndeclaredKey {
                    schema: self.name.clone(),
                    key: format!("{path}.{child_key}"),
                })?;
                self.check_default(&format!("{path}.{child_key}"), child, child_value)?;
            }
            return Ok(());
        }
        if property.accepts(value) {
            Ok(())
        } else {
            Err(SchemaError::InvalidDefault {
                schema: self.name.clone(),
                key: path.to_string(),
                expected: property.data_kind(),
            })
        }
    }
}

/// The serializable form of a schema, as read from schema files.
///
/// Builders cannot be expressed here; attach them after conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    pub name: String,
    pub properties: IndexMap<String, Property>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub default_values: EntityValues,
}

impl From<SchemaDefinition> for EntitySchema {
    fn from(definition: SchemaDefinition) -> Self {
        EntitySchema {
            name: definition.name,
            properties: definition
                .properties
                .into_iter()
                .map(|(k, p)| (k, PropertyOrBuilder::Property(p)))
                .collect(),
            default_values: definition.default_values,
        }
    }
}
