//! Search query
//!
//! Enumerates objects below a path prefix and keeps those that implement
//! every required interface, sit within the depth bound, and (optionally)
//! belong to one owning service.

use std::collections::BTreeSet;

use entity_types::Instance;
use parking_lot::Mutex;

use super::{PropertyMapping, Query, StaticHook};
use crate::QueryResult;
use crate::bus::{Bus, InterfaceMap, SearchDepth};

// ─────────────────────────────────────────────────────────────────────────────
// Search Criteria
// ─────────────────────────────────────────────────────────────────────────────

/// Which objects a search selects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    pub prefix: String,
    pub interfaces: Vec<String>,
    pub depth: SearchDepth,
    pub owner: Option<String>,
}

impl SearchCriteria {
    /// Direct children of `prefix`, any interface, any owner
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            interfaces: Vec::new(),
            depth: SearchDepth::Children,
            owner: None,
        }
    }

    pub fn require(mut self, interface: impl Into<String>) -> Self {
        self.interfaces.push(interface.into());
        self
    }

    pub fn subtree(mut self) -> Self {
        self.depth = SearchDepth::Subtree;
        self
    }

    pub fn owned_by(mut self, service: impl Into<String>) -> Self {
        self.owner = Some(service.into());
        self
    }

    /// Whether an enumerated object qualifies
    pub fn matches(&self, path: &str, service: &str, interfaces: &[String]) -> bool {
        if !self.depth.admits(&self.prefix, path) {
            return false;
        }
        if self.owner.as_deref().is_some_and(|owner| owner != service) {
            return false;
        }
        self.interfaces
            .iter()
            .all(|required| interfaces.iter().any(|i| i == required))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Search Query
// ─────────────────────────────────────────────────────────────────────────────

/// One instance per object matching [`SearchCriteria`]
pub struct SearchQuery {
    criteria: SearchCriteria,
    mapping: PropertyMapping,
    hook: Option<StaticHook>,
    /// Services that owned a match in the last enumeration; `None` until the
    /// first run
    seen: Mutex<Option<BTreeSet<String>>>,
}

impl SearchQuery {
    pub fn new(criteria: SearchCriteria, mapping: PropertyMapping) -> Self {
        Self {
            criteria,
            mapping,
            hook: None,
            seen: Mutex::new(None),
        }
    }

    pub fn with_hook(mut self, hook: impl Fn(&mut Instance) + Send + Sync + 'static) -> Self {
        self.hook = Some(std::sync::Arc::new(hook));
        self
    }

    pub fn criteria(&self) -> &SearchCriteria {
        &self.criteria
    }

    /// Interfaces used to narrow the bus enumeration
    fn enumeration_filter(&self) -> Vec<String> {
        if self.criteria.interfaces.is_empty() {
            self.mapping.interfaces()
        } else {
            self.criteria.interfaces.clone()
        }
    }

    fn read_object(&self, bus: &dyn Bus, service: &str, path: &str, interfaces: &[String]) -> InterfaceMap {
        let mut object = InterfaceMap::new();
        for interface in interfaces.iter().filter(|i| self.mapping.has_interface(i)) {
            match bus.get_all(service, path, interface) {
                Ok(properties) => {
                    object.insert(interface.clone(), properties);
                }
                Err(e) => {
                    tracing::debug!(service, path, interface = %interface, error = %e, "Interface not readable");
                }
            }
        }
        object
    }
}

impl Query for SearchQuery {
    fn process(&self, bus: &dyn Bus) -> QueryResult<Vec<Instance>> {
        let criteria = &self.criteria;
        let tree = match bus.find_objects(
            &criteria.prefix,
            &self.enumeration_filter(),
            criteria.depth,
            criteria.owner.as_deref(),
        ) {
            Ok(tree) => tree,
            Err(e) => {
                tracing::warn!(prefix = %criteria.prefix, error = %e, "Search failed, no matches");
                return Ok(Vec::new());
            }
        };

        let mut instances = Vec::new();
        let mut seen = BTreeSet::new();
        for (path, owners) in &tree {
            for (service, interfaces) in owners {
                if !criteria.matches(path, service, interfaces) {
                    continue;
                }
                seen.insert(service.clone());
                let object = self.read_object(bus, service, path, interfaces);
                instances.extend(self.mapping.build(service, path, &object, self.hook.as_ref()));
            }
        }

        *self.seen.lock() = Some(seen);
        Ok(instances)
    }

    fn fields(&self) -> Vec<String> {
        self.mapping.fields()
    }

    /// An unfiltered search follows the services it last matched. Before the
    /// first run, or after an empty one, any owner change may bring matches.
    fn concerns_service(&self, service: &str) -> bool {
        if let Some(owner) = self.criteria.owner.as_deref() {
            return owner == service;
        }
        match self.seen.lock().as_ref() {
            Some(seen) if !seen.is_empty() => seen.contains(service),
            _ => true,
        }
    }

    fn describe(&self) -> String {
        format!("search {} {:?}", self.criteria.prefix, self.criteria.depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use entity_types::Value;

    const SENSORS: &str = "/xyz/openbmc_project/sensors";
    const VALUE: &str = "xyz.openbmc_project.Sensor.Value";
    const THRESHOLD: &str = "xyz.openbmc_project.Sensor.Threshold.Critical";
    const HWMON: &str = "xyz.openbmc_project.Hwmon";

    fn mapping() -> PropertyMapping {
        PropertyMapping::new()
            .map(VALUE, "Value", "Reading")
            .map(THRESHOLD, "CriticalHigh", "UpperCritical")
    }

    fn bus() -> MemoryBus {
        let bus = MemoryBus::new();
        bus.add_object(HWMON, "/xyz/openbmc_project/sensors/temperature", VALUE, [("Value", 1.0)]);
        bus.add_object(HWMON, "/xyz/openbmc_project/sensors/temperature/cpu0", VALUE, [("Value", 40.0)]);
        bus.add_object(
            HWMON,
            "/xyz/openbmc_project/sensors/temperature/cpu0",
            THRESHOLD,
            [("CriticalHigh", 90.0)],
        );
        bus
    }

    #[test]
    fn test_direct_children_depth() {
        let bus = bus();
        let query = SearchQuery::new(SearchCriteria::new(SENSORS).require(VALUE), mapping());

        let instances = query.process(&bus).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].object_path(), Some("/xyz/openbmc_project/sensors/temperature"));
    }

    #[test]
    fn test_subtree_depth() {
        let bus = bus();
        let query = SearchQuery::new(SearchCriteria::new(SENSORS).require(VALUE).subtree(), mapping());
        assert_eq!(query.process(&bus).unwrap().len(), 2);
    }

    #[test]
    fn test_requires_all_interfaces() {
        let bus = bus();
        let query = SearchQuery::new(
            SearchCriteria::new(SENSORS).require(VALUE).require(THRESHOLD).subtree(),
            mapping(),
        );

        let instances = query.process(&bus).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].get_field("Reading"), &Value::Float(40.0));
        assert_eq!(instances[0].get_field("UpperCritical"), &Value::Float(90.0));
    }

    #[test]
    fn test_owner_filter() {
        let bus = bus();
        bus.add_object("other.Sensors", "/xyz/openbmc_project/sensors/fan", VALUE, [("Value", 3.0)]);

        let all = SearchQuery::new(SearchCriteria::new(SENSORS).require(VALUE), mapping());
        assert_eq!(all.process(&bus).unwrap().len(), 2);

        let owned = SearchQuery::new(SearchCriteria::new(SENSORS).require(VALUE).owned_by(HWMON), mapping());
        let instances = owned.process(&bus).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].service(), Some(HWMON));
        assert!(owned.concerns_service(HWMON));
        assert!(!owned.concerns_service("other.Sensors"));
    }

    #[test]
    fn test_no_matches_on_empty_bus() {
        let bus = MemoryBus::new();
        let query = SearchQuery::new(SearchCriteria::new(SENSORS).require(VALUE), mapping());
        assert!(query.process(&bus).unwrap().is_empty());
    }

    #[test]
    fn test_unfiltered_search_follows_matched_services() {
        let query = SearchQuery::new(SearchCriteria::new(SENSORS).require(VALUE).subtree(), mapping());
        assert!(query.concerns_service("xyz.openbmc_project.Settings"));

        query.process(&bus()).unwrap();
        assert!(query.concerns_service(HWMON));
        assert!(!query.concerns_service("xyz.openbmc_project.Settings"));

        query.process(&MemoryBus::new()).unwrap();
        assert!(query.concerns_service("xyz.openbmc_project.Settings"));
    }

    #[test]
    fn test_hook_applies_per_match() {
        let bus = bus();
        let query = SearchQuery::new(SearchCriteria::new(SENSORS).require(VALUE).subtree(), mapping())
            .with_hook(|inst| inst.set("Kind", "Sensor"));
        let instances = query.process(&bus).unwrap();
        assert!(instances.iter().all(|i| i.get_field("Kind") == &Value::from("Sensor")));
    }
}
