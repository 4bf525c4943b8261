use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::{EntityValues, Value};

/// The kinds of data a property can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    String,
    Number,
    Boolean,
    Timestamp,
    GeoPoint,
    Reference,
    Array,
    Map,
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataKind::String => "string",
            DataKind::Number => "number",
            DataKind::Boolean => "boolean",
            DataKind::Timestamp => "timestamp",
            DataKind::GeoPoint => "geopoint",
            DataKind::Reference => "reference",
            DataKind::Array => "array",
            DataKind::Map => "map",
        };
        f.write_str(name)
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Validation rules attached to a property.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Validation {
    #[serde(skip_serializing_if = "is_false")]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_message: Option<String>,
    /// Lower bound: numeric value, string length, or array length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound: numeric value, string length, or array length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Where uploaded files for a string property are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub storage_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accepted_files: Vec<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, String>,
}

/// Kind-specific presentation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PropertyConfig {
    /// Allowed values mapped to their labels, in display order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<IndexMap<String, String>>,
    #[serde(skip_serializing_if = "is_false")]
    pub markdown: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub url: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub multiline: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub preview_as_tag: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageMeta>,
}

/// A reference to an entity of another collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceProperty {
    pub collection_path: String,
    /// Keys of the target schema shown when previewing the reference.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preview_properties: Vec<String>,
}

fn default_type_field() -> String {
    "type".to_string()
}

fn default_value_field() -> String {
    "value".to_string()
}

/// Heterogeneous array elements, discriminated by a tag stored on each element.
///
/// Each element is a map `{<type_field>: tag, <value_field>: payload}` where
/// `tag` names one of `properties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneOf {
    #[serde(default = "default_type_field")]
    pub type_field: String,
    #[serde(default = "default_value_field")]
    pub value_field: String,
    pub properties: IndexMap<String, Property>,
}

impl OneOf {
    pub fn new(variants: impl IntoIterator<Item = (&'static str, Property)>) -> Self {
        OneOf {
            type_field: default_type_field(),
            value_field: default_value_field(),
            properties: variants
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    /// Returns an element value tagged with `tag`.
    pub fn element(&self, tag: &str, value: Value) -> Value {
        Value::map([
            (self.type_field.clone(), Value::String(tag.to_string())),
            (self.value_field.clone(), value),
        ])
    }
}

/// Element description of an array property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawArray", into = "RawArray")]
pub enum ArrayProperty {
    /// Every element has this shape.
    Of(Box<Property>),
    /// Elements are tagged variants.
    OneOf(OneOf),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArray {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    of: Option<Box<Property>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    one_of: Option<OneOf>,
}

impl TryFrom<RawArray> for ArrayProperty {
    type Error = String;

    fn try_from(raw: RawArray) -> Result<Self, Self::Error> {
        match (raw.of, raw.one_of) {
            (Some(of), None) => Ok(ArrayProperty::Of(of)),
            (None, Some(one_of)) => Ok(ArrayProperty::OneOf(one_of)),
            (Some(_), Some(_)) => Err("array property takes either `of` or `oneOf`, not both".into()),
            (None, None) => Err("array property requires `of` or `oneOf`".into()),
        }
    }
}

impl From<ArrayProperty> for RawArray {
    fn from(array: ArrayProperty) -> Self {
        match array {
            ArrayProperty::Of(of) => RawArray {
                of: Some(of),
                one_of: None,
            },
            ArrayProperty::OneOf(one_of) => RawArray {
                of: None,
                one_of: Some(one_of),
            },
        }
    }
}

/// A nested object with declared children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapProperty {
    pub properties: IndexMap<String, Property>,
    /// When set, a value holds only the subset of `properties` the user picked.
    #[serde(default, skip_serializing_if = "is_false")]
    pub pick_only_some_keys: bool,
}

/// Kind-specific part of a property, tagged by `dataType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dataType", rename_all = "lowercase")]
pub enum PropertyKind {
    String,
    Number,
    Boolean,
    Timestamp,
    GeoPoint,
    Reference(ReferenceProperty),
    Array(ArrayProperty),
    Map(MapProperty),
}

/// Typed description of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<Validation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PropertyConfig>,
    /// Field name in the stored document when it differs from the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    /// Initial value for new entities, overriding the kind-based default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(flatten)]
    pub kind: PropertyKind,
}

impl Property {
    pub fn new(kind: PropertyKind) -> Self {
        Property {
            title: None,
            description: None,
            validation: None,
            config: None,
            storage_key: None,
            default_value: None,
            kind,
        }
    }

    pub fn string() -> Self {
        Property::new(PropertyKind::String)
    }

    pub fn number() -> Self {
        Property::new(PropertyKind::Number)
    }

    pub fn boolean() -> Self {
        Property::new(PropertyKind::Boolean)
    }

    pub fn timestamp() -> Self {
        Property::new(PropertyKind::Timestamp)
    }

    pub fn geopoint() -> Self {
        Property::new(PropertyKind::GeoPoint)
    }

    pub fn reference(collection_path: impl Into<String>) -> Self {
        Property::new(PropertyKind::Reference(ReferenceProperty {
            collection_path: collection_path.into(),
            preview_properties: Vec::new(),
        }))
    }

    pub fn array_of(of: Property) -> Self {
        Property::new(PropertyKind::Array(ArrayProperty::Of(Box::new(of))))
    }

    pub fn one_of(one_of: OneOf) -> Self {
        Property::new(PropertyKind::Array(ArrayProperty::OneOf(one_of)))
    }

    pub fn map(properties: impl IntoIterator<Item = (&'static str, Property)>) -> Self {
        Property::new(PropertyKind::Map(MapProperty {
            properties: properties
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
            pick_only_some_keys: false,
        }))
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Marks the property as required.
    pub fn required(mut self) -> Self {
        self.validation.get_or_insert_with(Validation::default).required = true;
        self
    }

    pub fn with_config(mut self, config: PropertyConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_storage_key(mut self, storage_key: impl Into<String>) -> Self {
        self.storage_key = Some(storage_key.into());
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Sets the preview keys of a reference property. No-op for other kinds.
    pub fn with_preview_properties(mut self, keys: impl IntoIterator<Item = &'static str>) -> Self {
        if let PropertyKind::Reference(reference) = &mut self.kind {
            reference.preview_properties = keys.into_iter().map(str::to_string).collect();
        }
        self
    }

    /// Restricts a map property to picked keys. No-op for other kinds.
    pub fn pick_only_some_keys(mut self) -> Self {
        if let PropertyKind::Map(map) = &mut self.kind {
            map.pick_only_some_keys = true;
        }
        self
    }

    pub fn data_kind(&self) -> DataKind {
        match &self.kind {
            PropertyKind::String => DataKind::String,
            PropertyKind::Number => DataKind::Number,
            PropertyKind::Boolean => DataKind::Boolean,
            PropertyKind::Timestamp => DataKind::Timestamp,
            PropertyKind::GeoPoint => DataKind::GeoPoint,
            PropertyKind::Reference(_) => DataKind::Reference,
            PropertyKind::Array(_) => DataKind::Array,
            PropertyKind::Map(_) => DataKind::Map,
        }
    }

    /// The stored field name for this property under `key`.
    pub fn store_key<'a>(&'a self, key: &'a str) -> &'a str {
        self.storage_key.as_deref().unwrap_or(key)
    }

    pub fn is_required(&self) -> bool {
        self.validation.as_ref().is_some_and(|v| v.required)
    }

    /// Whether `value` has the shape this property declares.
    ///
    /// `Null` is accepted everywhere. Undeclared map keys are accepted here;
    /// schema checks report them separately.
    pub fn accepts(&self, value: &Value) -> bool {
        match (&self.kind, value) {
            (_, Value::Null) => true,
            (PropertyKind::String, Value::String(_))
            | (PropertyKind::Number, Value::Number(_))
            | (PropertyKind::Boolean, Value::Boolean(_))
            | (PropertyKind::Timestamp, Value::Timestamp(_))
            | (PropertyKind::GeoPoint, Value::GeoPoint(_))
            | (PropertyKind::Reference(_), Value::Reference(_)) => true,
            (PropertyKind::Array(ArrayProperty::Of(of)), Value::Array(items)) => {
                items.iter().all(|item| of.accepts(item))
            }
            (PropertyKind::Array(ArrayProperty::OneOf(one_of)), Value::Array(items)) => {
                items.iter().all(|item| {
                    let Value::Map(entry) = item else {
                        return false;
                    };
                    let Some(Value::String(tag)) = entry.get(&one_of.type_field) else {
                        return false;
                    };
                    match (one_of.properties.get(tag), entry.get(&one_of.value_field)) {
                        (Some(variant), Some(payload)) => variant.accepts(payload),
                        (Some(_), None) => true,
                        (None, _) => false,
                    }
                })
            }
            (PropertyKind::Map(map), Value::Map(entries)) => entries.iter().all(|(k, v)| {
                map.properties.get(k).is_none_or(|child| child.accepts(v))
            }),
            _ => false,
        }
    }
}

/// Context handed to a property builder.
#[derive(Debug, Clone, Copy)]
pub struct PropertyContext<'a> {
    /// The entity's values as far as they are known.
    pub values: &'a EntityValues,
    /// `None` while the entity has not been saved yet.
    pub entity_id: Option<&'a str>,
    pub collection_path: &'a str,
}

type BuildFn = dyn Fn(&PropertyContext<'_>) -> Property + Send + Sync;

/// Computes a property from the entity's current values.
///
/// Must be pure: the same context yields the same property. A panicking
/// builder is a schema defect and is not caught.
#[derive(Clone)]
pub struct PropertyBuilder(Arc<BuildFn>);

impl PropertyBuilder {
    pub fn new(build: impl Fn(&PropertyContext<'_>) -> Property + Send + Sync + 'static) -> Self {
        PropertyBuilder(Arc::new(build))
    }

    pub fn build(&self, context: &PropertyContext<'_>) -> Property {
        (self.0)(context)
    }
}

impl fmt::Debug for PropertyBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PropertyBuilder(..)")
    }
}

/// A schema slot: either a fixed property or a builder resolved per use.
#[derive(Debug, Clone)]
pub enum PropertyOrBuilder {
    Property(Property),
    Builder(PropertyBuilder),
}

impl PropertyOrBuilder {
    /// Returns the fixed property, or `None` for a builder.
    pub fn as_property(&self) -> Option<&Property> {
        match self {
            PropertyOrBuilder::Property(p) => Some(p),
            PropertyOrBuilder::Builder(_) => None,
        }
    }
}

impl From<Property> for PropertyOrBuilder {
    fn from(property: Property) -> Self {
        PropertyOrBuilder::Property(property)
    }
}

impl From<PropertyBuilder> for PropertyOrBuilder {
    fn from(builder: PropertyBuilder) -> Self {
        PropertyOrBuilder::Builder(builder)
    }
}

/// Resolves a schema slot against the current partial values.
///
/// Fixed properties are borrowed unchanged; builders are invoked with the
/// supplied context. The result is never written back into the schema.
pub fn resolve_property<'a>(
    property: &'a PropertyOrBuilder,
    values: &EntityValues,
    collection_path: &str,
    entity_id: Option<&str>,
) -> Cow<'a, Property> {
    match property {
        PropertyOrBuilder::Property(p) => Cow::Borrowed(p),
        PropertyOrBuilder::Builder(builder) => Cow::Owned(builder.build(&PropertyContext {
            values,
            entity_id,
            collection_path,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_property_resolves_to_itself() {
        let slot = PropertyOrBuilder::from(Property::string().with_title("Name"));
        let resolved = resolve_property(&slot, &EntityValues::new(), "products", None);
        assert!(matches!(resolved, Cow::Borrowed(_)));
        assert_eq!(resolved.title.as_deref(), Some("Name"));
    }

    #[test]
    fn builder_sees_partial_values_and_context() {
        let slot = PropertyOrBuilder::from(PropertyBuilder::new(|ctx| {
            let on_sale = matches!(ctx.values.get("on_sale"), Some(Value::Boolean(true)));
            let title = format!("{}:{}", ctx.collection_path, ctx.entity_id.unwrap_or("new"));
            if on_sale {
                Property::number().with_title(title).required()
            } else {
                Property::number().with_title(title)
            }
        }));

        let mut values = EntityValues::new();
        values.insert("on_sale".into(), Value::Boolean(true));

        let resolved = resolve_property(&slot, &values, "products", Some("p1"));
        assert!(resolved.is_required());
        assert_eq!(resolved.title.as_deref(), Some("products:p1"));

        let resolved = resolve_property(&slot, &EntityValues::new(), "products", None);
        assert!(!resolved.is_required());
        assert_eq!(resolved.title.as_deref(), Some("products:new"));
    }

    #[test]
    fn property_deserializes_from_tagged_form() {
        let json = r#"{
            "title": "Content",
            "validation": { "required": true },
            "dataType": "array",
            "oneOf": {
                "properties": {
                    "text": { "dataType": "string", "config": { "markdown": true } },
                    "products": {
                        "dataType": "array",
                        "of": { "dataType": "reference", "collectionPath": "products", "previewProperties": ["name"] }
                    }
                }
            }
        }"#;
        let property: Property = serde_json::from_str(json).unwrap();
        assert!(property.is_required());
        let PropertyKind::Array(ArrayProperty::OneOf(one_of)) = &property.kind else {
            panic!("expected oneOf array, got {:?}", property.kind);
        };
        assert_eq!(one_of.type_field, "type");
        assert_eq!(one_of.value_field, "value");
        assert_eq!(
            one_of.properties.keys().collect::<Vec<_>>(),
            vec!["text", "products"]
        );
        assert!(one_of.properties["text"].config.as_ref().unwrap().markdown);
    }

    #[test]
    fn array_requires_exactly_one_element_description() {
        let both = r#"{"dataType":"array","of":{"dataType":"string"},"oneOf":{"properties":{}}}"#;
        assert!(serde_json::from_str::<Property>(both).is_err());
        let neither = r#"{"dataType":"array"}"#;
        assert!(serde_json::from_str::<Property>(neither).is_err());
    }

    #[test]
    fn property_serializes_back_to_same_shape() {
        let property = Property::map([
            ("city", Property::string().with_storage_key("ciudad")),
            ("location", Property::geopoint()),
        ])
        .pick_only_some_keys()
        .with_title("Address");

        let json = serde_json::to_value(&property).unwrap();
        assert_eq!(json["dataType"], "map");
        assert_eq!(json["pickOnlySomeKeys"], true);
        assert_eq!(json["properties"]["city"]["storageKey"], "ciudad");

        let recovered: Property = serde_json::from_value(json).unwrap();
        assert_eq!(recovered, property);
    }

    #[test]
    fn accepts_checks_nested_shapes() {
        let tags = Property::array_of(Property::string());
        assert!(tags.accepts(&Value::array([Value::from("a"), Value::from("b")])));
        assert!(!tags.accepts(&Value::array([Value::from(1.0)])));
        assert!(tags.accepts(&Value::Null));

        let one_of = OneOf::new([("text", Property::string())]);
        let content = Property::one_of(one_of.clone());
        assert!(content.accepts(&Value::array([one_of.element("text", Value::from("hi"))])));
        assert!(!content.accepts(&Value::array([one_of.element("video", Value::from("x"))])));
    }
}
