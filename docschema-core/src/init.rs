use crate::property::{Property, PropertyKind, resolve_property};
use crate::schema::EntitySchema;
use crate::value::{EntityValues, Value};

/// Builds the initial values of a new entity.
///
/// Every declared key receives a concrete value. A schema-level default wins
/// verbatim; otherwise the property's own default applies, and otherwise the
/// kind decides: `[]` for arrays, a recursively initialized object for maps
/// (`{}` when the map only holds picked keys), `Null` for everything else.
///
/// Keys are processed in declaration order and builders see the values
/// produced so far, so a builder may depend on an earlier key's default.
///
/// The schema must pass [`EntitySchema::check`]: a default value for an
/// undeclared key is never produced. Debug builds panic on such a schema.
pub fn init_entity_values(schema: &EntitySchema, collection_path: &str) -> EntityValues {
    #[cfg(debug_assertions)]
    if let Err(error) = schema.check() {
        panic!("initializing values from an unchecked schema: {error}");
    }
    let mut values = EntityValues::with_capacity(schema.properties.len());
    for (key, slot) in &schema.properties {
        let value = match schema.default_values.get(key) {
            Some(value) => value.clone(),
            None => {
                let property = resolve_property(slot, &values, collection_path, None);
                init_property_value(&property)
            }
        };
        values.insert(key.clone(), value);
    }
    values
}

/// Initial value for a single property, ignoring schema-level overrides.
pub fn init_property_value(property: &Property) -> Value {
    if let Some(value) = &property.default_value {
        return value.clone();
    }
    match &property.kind {
        PropertyKind::Map(map) if map.pick_only_some_keys => Value::Map(Default::default()),
        PropertyKind::Map(map) => Value::Map(
            map.properties
                .iter()
                .map(|(key, child)| (key.clone(), init_property_value(child)))
                .collect(),
        ),
        PropertyKind::Array(_) => Value::Array(Vec::new()),
        PropertyKind::String
        | PropertyKind::Number
        | PropertyKind::Boolean
        | PropertyKind::Timestamp
        | PropertyKind::GeoPoint
        | PropertyKind::Reference(_) => Value::Null,
    }
}
