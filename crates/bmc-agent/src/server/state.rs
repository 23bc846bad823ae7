//! Server Application State
//!
//! Shared state accessible by all HTTP handlers.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value as JsonValue;

use entity_runtime::{Entity, EntityKind, EntityManager, EntityResult, is_meta_field};

/// Rendered body of one entity at one generation
#[derive(Clone)]
struct Rendered {
    generation: u64,
    body: Arc<JsonValue>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Entity registry
    manager: Arc<EntityManager>,

    /// Last rendering per entity, reused while the snapshot is unchanged
    rendered: DashMap<String, Rendered>,
}

impl AppState {
    pub fn new(manager: Arc<EntityManager>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                manager,
                rendered: DashMap::new(),
            }),
        }
    }

    pub fn manager(&self) -> &Arc<EntityManager> {
        &self.inner.manager
    }

    /// Number of entities holding data
    pub fn populated(&self) -> usize {
        self.inner.manager.entities().filter(|e| e.has_data()).count()
    }

    /// Look a resource up, populate it, and render it as JSON. Blocks while
    /// the entity fetches.
    pub fn render_entity(&self, name: &str) -> EntityResult<Arc<JsonValue>> {
        let manager = &self.inner.manager;
        match manager.find(name) {
            Some(entity) if !entity.is_provider() => {}
            _ => return Err(entity_runtime::EntityError::NotFound(name.to_string())),
        }

        let entity = manager.get_entity(name)?;
        let generation = entity.generation();

        if let Some(cached) = self.inner.rendered.get(name) {
            if cached.generation == generation {
                return Ok(Arc::clone(&cached.body));
            }
        }

        let body = Arc::new(render(entity)?);
        self.inner.rendered.insert(
            name.to_string(),
            Rendered {
                generation,
                body: Arc::clone(&body),
            },
        );
        Ok(body)
    }
}

/// Scalars render as one object carrying every declared field; collections
/// as an array of instances.
fn render(entity: &Entity) -> EntityResult<JsonValue> {
    match entity.kind() {
        EntityKind::Scalar => {
            let mut object = serde_json::Map::new();
            for field in entity.schema().fields().filter(|f| !is_meta_field(&f.name)) {
                let value = entity.get_field(&field.name)?;
                object.insert(field.name.clone(), JsonValue::from(&value));
            }
            Ok(JsonValue::Object(object))
        }
        EntityKind::Collection => Ok(JsonValue::Array(
            entity.instances().iter().map(|instance| instance.to_json()).collect(),
        )),
    }
}
