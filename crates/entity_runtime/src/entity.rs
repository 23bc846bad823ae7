//! Entities
//!
//! An entity is a named, schema-holding container bound to exactly one query.
//! Its instances live in an immutable snapshot that is swapped as a whole, so
//! readers see either the previous set or the next one and never block on
//! bus I/O.
//!
//! # Source Policy
//!
//! - `Cached`: the broker refreshes the entity. `populate` only fills an
//!   entity that has never been filled.
//! - `Lazy`: `populate` re-runs the query in the calling thread every time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use entity_types::{EntityError, EntityResult, FieldDef, Instance, Schema, Value, is_meta_field};

use crate::bus::Bus;
use crate::query::{ProxyQuery, Query};
use crate::{QueryError, QueryResult};

// ─────────────────────────────────────────────────────────────────────────────
// Declaration Types
// ─────────────────────────────────────────────────────────────────────────────

/// Scalar entities hold at most one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityKind {
    Scalar,
    Collection,
}

/// Providers are never served directly; they feed other entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntityRole {
    Resource,
    Provider,
}

/// How a cached entity is refreshed by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refresh {
    /// Zero means run exactly once
    pub interval: Duration,
    /// Re-run when a service feeding the entity changes owner
    pub watch: bool,
}

impl Refresh {
    /// Single-shot refresh
    pub fn once() -> Self {
        Self {
            interval: Duration::ZERO,
            watch: false,
        }
    }

    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            watch: false,
        }
    }

    pub fn watched(mut self) -> Self {
        self.watch = true;
        self
    }
}

/// Freshness policy of an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePolicy {
    Cached(Refresh),
    Lazy,
}

/// Merges one provider instance into one target instance
pub type LinkRule = Arc<dyn Fn(&Instance, &mut Instance) + Send + Sync>;

/// A provider whose instances supplement this entity's instances
struct ProviderLink {
    provider: Weak<Entity>,
    name: String,
    rule: LinkRule,
}

struct Snapshot {
    instances: Arc<Vec<Instance>>,
    generation: u64,
    refreshed_at: Option<Instant>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity
// ─────────────────────────────────────────────────────────────────────────────

pub struct Entity {
    name: String,
    kind: EntityKind,
    role: EntityRole,
    policy: SourcePolicy,
    schema: Schema,
    query: Box<dyn Query>,
    links: Vec<ProviderLink>,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
    refresh_lock: Mutex<()>,
    snapshot: RwLock<Snapshot>,
}

impl std::fmt::Debug for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("role", &self.role)
            .field("policy", &self.policy)
            .field("query", &self.query.describe())
            .finish()
    }
}

impl Entity {
    pub fn builder(name: impl Into<String>) -> EntityBuilder {
        EntityBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn role(&self) -> EntityRole {
        self.role
    }

    pub fn is_provider(&self) -> bool {
        self.role == EntityRole::Provider
    }

    pub fn policy(&self) -> SourcePolicy {
        self.policy
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn query(&self) -> &dyn Query {
        self.query.as_ref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Whether data owned by `service` feeds this entity, directly or
    /// through a linked provider
    pub fn concerns_service(&self, service: &str) -> bool {
        self.query.concerns_service(service)
            || self
                .links
                .iter()
                .filter_map(|link| link.provider.upgrade())
                .any(|provider| provider.concerns_service(service))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// One-time query binding and validation. Idempotent.
    pub fn initialize(&self) -> EntityResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let _guard = self.init_lock.lock();
        if self.is_initialized() {
            return Ok(());
        }

        self.query.initialize().map_err(|e| match e {
            QueryError::Entity(e) => e,
            other => EntityError::Configuration(format!("{}: {}", self.name, other)),
        })?;

        let fields = self.query.fields();
        self.schema
            .require(&self.name, fields.iter().map(String::as_str))?;

        for link in &self.links {
            match link.provider.upgrade() {
                Some(provider) => provider.initialize()?,
                None => return Err(EntityError::NotFound(link.name.clone())),
            }
        }

        self.initialized.store(true, Ordering::Release);
        tracing::debug!(entity = %self.name, query = %self.query.describe(), "Entity initialized");
        Ok(())
    }

    /// Whether `populate` would touch the bus. False for a cached entity
    /// that already holds a snapshot.
    pub fn needs_fetch(&self) -> bool {
        match self.policy {
            SourcePolicy::Cached(_) => !self.has_data(),
            SourcePolicy::Lazy => true,
        }
    }

    /// Acquire data according to the source policy
    pub fn populate(&self, bus: &dyn Bus) -> QueryResult<()> {
        match self.policy {
            SourcePolicy::Cached(_) => {
                if !self.needs_fetch() {
                    return Ok(());
                }
                let _guard = self.refresh_lock.lock();
                if !self.needs_fetch() {
                    return Ok(());
                }
                self.refresh_locked(bus).map(|_| ())
            }
            SourcePolicy::Lazy => {
                let _guard = self.refresh_lock.lock();
                self.refresh_locked(bus).map(|_| ())
            }
        }
    }

    /// Run the query unconditionally and install the result. Returns the
    /// number of installed instances.
    pub fn refresh(&self, bus: &dyn Bus) -> QueryResult<usize> {
        let _guard = self.refresh_lock.lock();
        self.refresh_locked(bus)
    }

    fn refresh_locked(&self, bus: &dyn Bus) -> QueryResult<usize> {
        self.initialize()?;

        let mut instances = self.query.process(bus)?;
        self.apply_links(bus, &mut instances);

        for instance in &mut instances {
            let completion = self.schema.complete(instance);
            if !completion.rejected.is_empty() {
                tracing::warn!(entity = %self.name, fields = ?completion.rejected, "Dropped undeclared fields");
            }
            if !completion.mistyped.is_empty() {
                tracing::debug!(entity = %self.name, fields = ?completion.mistyped, "Fields carry unexpected types");
            }
        }

        if self.kind == EntityKind::Scalar && instances.len() > 1 {
            tracing::warn!(entity = %self.name, count = instances.len(), "Scalar entity matched several objects, keeping the first");
            instances.truncate(1);
        }

        Ok(self.install(instances))
    }

    fn apply_links(&self, bus: &dyn Bus, instances: &mut [Instance]) {
        for link in &self.links {
            let Some(provider) = link.provider.upgrade() else {
                tracing::warn!(entity = %self.name, provider = %link.name, "Linked provider is gone");
                continue;
            };
            if let Err(e) = provider.populate(bus) {
                tracing::warn!(entity = %self.name, provider = %link.name, error = %e, "Provider population failed");
                continue;
            }
            let supplements = provider.instances();
            for target in instances.iter_mut() {
                for supplement in supplements.iter() {
                    (link.rule)(supplement, target);
                }
            }
        }
    }

    /// Atomically replace the instance set
    fn install(&self, instances: Vec<Instance>) -> usize {
        let count = instances.len();
        let mut snapshot = self.snapshot.write();
        snapshot.instances = Arc::new(instances);
        snapshot.generation += 1;
        snapshot.refreshed_at = Some(Instant::now());
        count
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    /// Current instance snapshot
    pub fn instances(&self) -> Arc<Vec<Instance>> {
        Arc::clone(&self.snapshot.read().instances)
    }

    /// Whether any refresh has completed
    pub fn has_data(&self) -> bool {
        self.generation() > 0
    }

    /// Number of completed refreshes
    pub fn generation(&self) -> u64 {
        self.snapshot.read().generation
    }

    pub fn refreshed_at(&self) -> Option<Instant> {
        self.snapshot.read().refreshed_at
    }

    /// Scalar field access: the first instance's value, or the declared
    /// default when there is no instance.
    pub fn get_field(&self, name: &str) -> EntityResult<Value> {
        let field = self
            .schema
            .get(name)
            .ok_or_else(|| EntityError::unknown_field(&self.name, name))?;
        let snapshot = self.instances();
        Ok(snapshot
            .first()
            .and_then(|instance| instance.value(name))
            .cloned()
            .unwrap_or_else(|| field.default.clone()))
    }

    pub fn get_string(&self, name: &str) -> EntityResult<Option<String>> {
        self.typed(name, "string", |v| v.as_str().map(str::to_string))
    }

    pub fn get_bool(&self, name: &str) -> EntityResult<Option<bool>> {
        self.typed(name, "bool", Value::as_bool)
    }

    pub fn get_i64(&self, name: &str) -> EntityResult<Option<i64>> {
        self.typed(name, "int", Value::as_i64)
    }

    pub fn get_f64(&self, name: &str) -> EntityResult<Option<f64>> {
        self.typed(name, "float", Value::as_f64)
    }

    fn typed<T>(&self, name: &str, expected: &str, extract: impl FnOnce(&Value) -> Option<T>) -> EntityResult<Option<T>> {
        let value = self.get_field(name)?;
        if !value.is_available() {
            return Ok(None);
        }
        extract(&value)
            .map(Some)
            .ok_or_else(|| EntityError::invalid_type(format!("{}.{}", self.name, name), expected))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Declares an entity: fields, query, policy and provider links
pub struct EntityBuilder {
    name: String,
    kind: EntityKind,
    role: EntityRole,
    policy: SourcePolicy,
    schema: Schema,
    query: Option<Box<dyn Query>>,
    links: Vec<ProviderLink>,
}

impl EntityBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntityKind::Scalar,
            role: EntityRole::Resource,
            policy: SourcePolicy::Cached(Refresh::once().watched()),
            schema: Schema::new(),
            query: None,
            links: Vec::new(),
        }
    }

    pub fn collection(mut self) -> Self {
        self.kind = EntityKind::Collection;
        self
    }

    pub fn provider(mut self) -> Self {
        self.role = EntityRole::Provider;
        self
    }

    pub fn cached(mut self, refresh: Refresh) -> Self {
        self.policy = SourcePolicy::Cached(refresh);
        self
    }

    pub fn lazy(mut self) -> Self {
        self.policy = SourcePolicy::Lazy;
        self
    }

    /// Declare a field
    pub fn field(mut self, field: FieldDef) -> Self {
        self.schema.declare(field);
        self
    }

    pub fn query(mut self, query: impl Query + 'static) -> Self {
        self.query = Some(Box::new(query));
        self
    }

    /// Serve a provider's instances through a proxy query and adopt its fields
    pub fn proxy(mut self, provider: &Arc<Entity>) -> Self {
        self.adopt_fields(provider);
        self.query = Some(Box::new(ProxyQuery::new(provider)));
        self
    }

    /// Merge every non-meta field of each provider instance into this
    /// entity's instances
    pub fn link(mut self, provider: &Arc<Entity>) -> Self {
        self.adopt_fields(provider);
        self.links.push(ProviderLink {
            provider: Arc::downgrade(provider),
            name: provider.name().to_string(),
            rule: Arc::new(|supplement: &Instance, target: &mut Instance| target.merge_from(supplement)),
        });
        self
    }

    /// Link a provider with a custom merge rule. Fields the rule writes must
    /// be declared separately.
    pub fn link_with(
        mut self,
        provider: &Arc<Entity>,
        rule: impl Fn(&Instance, &mut Instance) + Send + Sync + 'static,
    ) -> Self {
        self.links.push(ProviderLink {
            provider: Arc::downgrade(provider),
            name: provider.name().to_string(),
            rule: Arc::new(rule),
        });
        self
    }

    fn adopt_fields(&mut self, provider: &Entity) {
        for field in provider.schema().fields() {
            if !is_meta_field(&field.name) && self.schema.get(&field.name).is_none() {
                self.schema.declare(field.clone());
            }
        }
    }

    pub fn build(self) -> EntityResult<Entity> {
        let query = self
            .query
            .ok_or_else(|| EntityError::Configuration(format!("{} has no query", self.name)))?;

        Ok(Entity {
            name: self.name,
            kind: self.kind,
            role: self.role,
            policy: self.policy,
            schema: self.schema,
            query,
            links: self.links,
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            refresh_lock: Mutex::new(()),
            snapshot: RwLock::new(Snapshot {
                instances: Arc::new(Vec::new()),
                generation: 0,
                refreshed_at: None,
            }),
        })
    }
}
