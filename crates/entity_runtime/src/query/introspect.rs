//! Service introspection query

use entity_types::Instance;

use super::{PropertyMapping, Query, StaticHook};
use crate::QueryResult;
use crate::bus::{Bus, InterfaceMap};

/// One instance per object of a service that carries a mapped interface,
/// regardless of its path.
pub struct IntrospectQuery {
    service: String,
    mapping: PropertyMapping,
    hook: Option<StaticHook>,
}

impl IntrospectQuery {
    pub fn new(service: impl Into<String>, mapping: PropertyMapping) -> Self {
        Self {
            service: service.into(),
            mapping,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: impl Fn(&mut Instance) + Send + Sync + 'static) -> Self {
        self.hook = Some(std::sync::Arc::new(hook));
        self
    }
}

impl Query for IntrospectQuery {
    fn process(&self, bus: &dyn Bus) -> QueryResult<Vec<Instance>> {
        let objects = match bus.introspect_service(&self.service) {
            Ok(objects) => objects,
            Err(e) => {
                tracing::warn!(service = %self.service, error = %e, "Introspection failed, no matches");
                return Ok(Vec::new());
            }
        };

        let mut instances = Vec::new();
        for (path, interfaces) in objects {
            let relevant: InterfaceMap = interfaces
                .into_iter()
                .filter(|(name, _)| self.mapping.has_interface(name))
                .collect();
            if relevant.is_empty() {
                continue;
            }
            instances.extend(self.mapping.build(&self.service, &path, &relevant, self.hook.as_ref()));
        }

        Ok(instances)
    }

    fn fields(&self) -> Vec<String> {
        self.mapping.fields()
    }

    fn concerns_service(&self, service: &str) -> bool {
        self.service == service
    }

    fn describe(&self) -> String {
        format!("introspect {}", self.service)
    }
}
