use std::sync::Arc;

use crate::datasource::{DataSource, DataSourceError, Entity};
use crate::schema::EntitySchema;
use crate::store::DocumentStore;
use crate::subscription::Subscription;
use crate::value::{EntityReference, EntityValues, Value};

/// What a reference currently points at.
#[derive(Debug, Clone, PartialEq)]
pub enum ReferenceState {
    Resolved(Entity),
    /// The address is valid but no document lives there.
    Missing(EntityReference),
}

impl ReferenceState {
    pub fn entity(&self) -> Option<&Entity> {
        match self {
            ReferenceState::Resolved(entity) => Some(entity),
            ReferenceState::Missing(_) => None,
        }
    }

    /// Projects the resolved values onto `keys`, skipping keys the entity
    /// lacks.
    pub fn preview(&self, keys: &[String]) -> Option<EntityValues> {
        let values = self.entity()?.values.as_ref()?;
        Some(
            keys.iter()
                .filter_map(|key| Some((key.clone(), values.get(key)?.clone())))
                .collect(),
        )
    }
}

impl From<Entity> for ReferenceState {
    fn from(entity: Entity) -> Self {
        if entity.is_missing() {
            ReferenceState::Missing(entity.reference())
        } else {
            ReferenceState::Resolved(entity)
        }
    }
}

/// Reads the address out of a reference value. Path strings are accepted
/// as well as reference handles.
pub fn reference_address(value: &Value) -> Option<EntityReference> {
    match value {
        Value::Reference(reference) => Some(reference.clone()),
        Value::String(path) => EntityReference::parse(path).ok(),
        _ => None,
    }
}

impl<S: DocumentStore + 'static> DataSource<S> {
    /// Follows a reference value live.
    ///
    /// Without an address or a target schema nothing is subscribed and a
    /// no-op handle is returned. A target that does not exist is reported
    /// as [`ReferenceState::Missing`], not as an error.
    pub async fn resolve_reference(
        &self,
        value: Option<&Value>,
        schema: Option<Arc<EntitySchema>>,
        mut on_update: impl FnMut(ReferenceState) + Send + 'static,
    ) -> Result<Subscription, DataSourceError<S::Error>> {
        let (Some(reference), Some(schema)) = (value.and_then(reference_address), schema) else {
            return Ok(Subscription::noop());
        };
        self.listen_entity(&reference.path, &reference.id, schema, move |entity| {
            on_update(ReferenceState::from(entity))
        })
        .await
    }
}
