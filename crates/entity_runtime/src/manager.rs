//! Entity Manager
//!
//! The registry the protocol layer reads from. It owns every entity for the
//! lifetime of the process; queries, links and broker bindings only hold weak
//! references, and callers borrow entities from the manager.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use entity_types::{EntityError, EntityResult};

use crate::{ConnectionPool, Entity, EntityBuilder};

/// A statically typed entity declaration
///
/// `declare` receives the manager so it can resolve the providers it proxies
/// or links. Providers must therefore be built before their consumers.
pub trait EntityDefinition: 'static {
    const NAME: &'static str;

    fn declare(manager: &EntityManager) -> EntityResult<EntityBuilder>;
}

struct Registered {
    entity: Arc<Entity>,
    type_id: Option<TypeId>,
}

/// Registry of all entities, keyed by unique name
pub struct EntityManager {
    entities: Vec<Registered>,
    index: HashMap<String, usize>,
    pool: Arc<ConnectionPool>,
}

impl EntityManager {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            entities: Vec::new(),
            index: HashMap::new(),
            pool,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Entities in registration order
    pub fn entities(&self) -> impl Iterator<Item = &Arc<Entity>> {
        self.entities.iter().map(|r| &r.entity)
    }

    /// Names of entities served to the protocol layer (providers excluded)
    pub fn resource_names(&self) -> Vec<&str> {
        self.entities()
            .filter(|e| !e.is_provider())
            .map(|e| e.name())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    fn register(&mut self, entity: Entity, type_id: Option<TypeId>) -> EntityResult<&Arc<Entity>> {
        let name = entity.name().to_string();
        if self.index.contains_key(&name) {
            tracing::error!(entity = %name, "Duplicate entity registration");
            return Err(EntityError::DuplicateEntity(name));
        }

        let slot = self.entities.len();
        self.entities.push(Registered {
            entity: Arc::new(entity),
            type_id,
        });
        self.index.insert(name.clone(), slot);
        tracing::debug!(entity = %name, "Entity registered");
        Ok(&self.entities[slot].entity)
    }

    /// Register an already built entity
    pub fn add_entity(&mut self, entity: Entity) -> EntityResult<&Arc<Entity>> {
        self.register(entity, None)
    }

    /// Declare, build and register a typed entity
    pub fn build_entity<T: EntityDefinition>(&mut self) -> EntityResult<&Arc<Entity>> {
        let entity = T::declare(self)?.build()?;
        if entity.name() != T::NAME {
            return Err(EntityError::Configuration(format!(
                "{} declared under name {}",
                T::NAME,
                entity.name()
            )));
        }
        self.register(entity, Some(TypeId::of::<T>()))
    }

    /// Initialize every entity once, in registration order
    pub fn configure(&self) -> EntityResult<()> {
        for entity in self.entities() {
            entity.initialize()?;
        }
        tracing::info!(count = self.entities.len(), "Entities configured");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Population
    // ─────────────────────────────────────────────────────────────────────────

    /// Cached entities with data are served from their snapshot without
    /// touching the pool.
    fn populate(&self, entity: &Entity) {
        if !entity.needs_fetch() {
            return;
        }
        let conn = match self.pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(entity = %entity.name(), error = %e, "No bus connection, serving current snapshot");
                return;
            }
        };
        if let Err(e) = entity.populate(&*conn) {
            tracing::warn!(entity = %entity.name(), error = %e, "Population failed, serving current snapshot");
        }
    }

    /// Populate every entity once, so the first request is never empty
    pub fn update(&self) {
        for entity in self.entities() {
            self.populate(entity);
        }
        let filled = self.entities().filter(|e| e.has_data()).count();
        tracing::info!(filled, total = self.entities.len(), "Initial population complete");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    /// Find an entity without populating it
    pub fn find(&self, name: &str) -> Option<&Arc<Entity>> {
        self.index.get(name).map(|&slot| &self.entities[slot].entity)
    }

    /// Look an entity up by name and populate it per its source policy
    pub fn get_entity(&self, name: &str) -> EntityResult<&Entity> {
        let entity = self
            .find(name)
            .ok_or_else(|| EntityError::NotFound(name.to_string()))?;
        self.populate(entity);
        Ok(entity)
    }

    /// Resolve a typed entity without populating it
    pub fn resolve<T: EntityDefinition>(&self) -> EntityResult<&Arc<Entity>> {
        let slot = *self
            .index
            .get(T::NAME)
            .ok_or_else(|| EntityError::NotFound(T::NAME.to_string()))?;
        let registered = &self.entities[slot];
        if registered.type_id != Some(TypeId::of::<T>()) {
            return Err(EntityError::invalid_type(T::NAME, std::any::type_name::<T>()));
        }
        Ok(&registered.entity)
    }

    /// Typed lookup, populating like [`get_entity`](Self::get_entity)
    pub fn get<T: EntityDefinition>(&self) -> EntityResult<&Entity> {
        let entity = self.resolve::<T>()?;
        self.populate(entity);
        Ok(entity)
    }
}
