//! Direct-object query

use entity_types::Instance;

use super::{PropertyMapping, Query, StaticHook};
use crate::QueryResult;
use crate::bus::{Bus, InterfaceMap};

/// Reads every mapped interface of one fixed object on one service.
///
/// Yields one instance, or none when no mapped interface could be read.
pub struct DirectQuery {
    service: String,
    path: String,
    mapping: PropertyMapping,
    hook: Option<StaticHook>,
}

impl DirectQuery {
    pub fn new(service: impl Into<String>, path: impl Into<String>, mapping: PropertyMapping) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
            mapping,
            hook: None,
        }
    }

    pub fn with_hook(mut self, hook: impl Fn(&mut Instance) + Send + Sync + 'static) -> Self {
        self.hook = Some(std::sync::Arc::new(hook));
        self
    }
}

impl Query for DirectQuery {
    fn process(&self, bus: &dyn Bus) -> QueryResult<Vec<Instance>> {
        let mut interfaces = InterfaceMap::new();
        for interface in self.mapping.interfaces() {
            match bus.get_all(&self.service, &self.path, &interface) {
                Ok(properties) => {
                    interfaces.insert(interface, properties);
                }
                Err(e) => {
                    tracing::debug!(
                        service = %self.service,
                        path = %self.path,
                        interface = %interface,
                        error = %e,
                        "Interface not readable"
                    );
                }
            }
        }

        if interfaces.is_empty() {
            tracing::debug!(service = %self.service, path = %self.path, "Object absent");
            return Ok(Vec::new());
        }

        Ok(self
            .mapping
            .build(&self.service, &self.path, &interfaces, self.hook.as_ref()))
    }

    fn fields(&self) -> Vec<String> {
        self.mapping.fields()
    }

    fn concerns_service(&self, service: &str) -> bool {
        self.service == service
    }

    fn describe(&self) -> String {
        format!("direct {}:{}", self.service, self.path)
    }
}
