//! Property to field mapping
//!
//! Each bus-backed query owns a table of `(interface, property, field,
//! formatter)` entries. Properties without an entry are ignored.
//!
//! Association lists get special treatment: a mapped property whose value is
//! a list of association tuples discloses one child instance per tuple. The
//! child's `Source`, `Destination` and `Endpoint` pseudo-properties are mapped
//! through entries whose interface is the parent field name.

use std::collections::BTreeSet;
use std::sync::Arc;

use entity_types::{Association, Instance, Value};

use crate::bus::{InterfaceMap, PropertyMap};
use crate::format::SharedFormatter;

/// Pseudo-properties of a disclosed association
pub const ASSOCIATION_SOURCE: &str = "Source";
pub const ASSOCIATION_DESTINATION: &str = "Destination";
pub const ASSOCIATION_ENDPOINT: &str = "Endpoint";

/// Interface whose properties carry association lists
pub const ASSOCIATION_DEFINITIONS: &str = "xyz.openbmc_project.Association.Definitions";

/// Hook that synthesizes static or derived fields on a finished instance
pub type StaticHook = Arc<dyn Fn(&mut Instance) + Send + Sync>;

/// One row of the mapping table
#[derive(Clone)]
pub struct MappingEntry {
    pub interface: String,
    pub property: String,
    pub field: String,
    pub formatter: Option<SharedFormatter>,
}

impl std::fmt::Debug for MappingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingEntry")
            .field("interface", &self.interface)
            .field("property", &self.property)
            .field("field", &self.field)
            .field("formatted", &self.formatter.is_some())
            .finish()
    }
}

/// Property to field mapping table
#[derive(Debug, Clone, Default)]
pub struct PropertyMapping {
    entries: Vec<MappingEntry>,
}

impl PropertyMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a property to a field unchanged
    pub fn map(
        mut self,
        interface: impl Into<String>,
        property: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        self.entries.push(MappingEntry {
            interface: interface.into(),
            property: property.into(),
            field: field.into(),
            formatter: None,
        });
        self
    }

    /// Map a property to a field through a formatter
    pub fn map_with(
        mut self,
        interface: impl Into<String>,
        property: impl Into<String>,
        field: impl Into<String>,
        formatter: SharedFormatter,
    ) -> Self {
        self.entries.push(MappingEntry {
            interface: interface.into(),
            property: property.into(),
            field: field.into(),
            formatter: Some(formatter),
        });
        self
    }

    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    pub fn entries_for<'a>(&'a self, interface: &'a str) -> impl Iterator<Item = &'a MappingEntry> {
        self.entries.iter().filter(move |e| e.interface == interface)
    }

    pub fn has_interface(&self, interface: &str) -> bool {
        self.entries.iter().any(|e| e.interface == interface)
    }

    /// Bus interfaces named by the table, in declaration order. Pseudo
    /// interfaces used for association children are skipped.
    pub fn interfaces(&self) -> Vec<String> {
        let fields: BTreeSet<&str> = self.entries.iter().map(|e| e.field.as_str()).collect();
        let mut seen = BTreeSet::new();
        self.entries
            .iter()
            .filter(|e| !fields.contains(e.interface.as_str()))
            .filter(|e| seen.insert(e.interface.as_str()))
            .map(|e| e.interface.clone())
            .collect()
    }

    /// Every field name the table can produce. Association definitions
    /// without pseudo entries disclose children under the default
    /// pseudo-property names, so those names are listed too.
    pub fn fields(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut fields: Vec<String> = self
            .entries
            .iter()
            .filter(|e| seen.insert(e.field.as_str()))
            .map(|e| e.field.clone())
            .collect();

        let discloses_defaults = self
            .entries
            .iter()
            .any(|e| e.interface == ASSOCIATION_DEFINITIONS && !self.has_interface(&e.field));
        if discloses_defaults {
            for name in [ASSOCIATION_SOURCE, ASSOCIATION_DESTINATION, ASSOCIATION_ENDPOINT] {
                if seen.insert(name) {
                    fields.push(name.to_string());
                }
            }
        }
        fields
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Instance Building
    // ─────────────────────────────────────────────────────────────────────────

    /// Build the instance for one object, followed by any association
    /// children. Only interfaces known to the table are read.
    pub fn build(
        &self,
        service: &str,
        path: &str,
        interfaces: &InterfaceMap,
        hook: Option<&StaticHook>,
    ) -> Vec<Instance> {
        let mut instance = Instance::with_origin(path, service);
        let mut children = Vec::new();

        for (interface, properties) in interfaces {
            for entry in self.entries_for(interface) {
                let Some(value) = self.resolve(entry, properties) else {
                    continue;
                };
                if let Value::Associations(associations) = &value {
                    children.extend(
                        associations
                            .iter()
                            .map(|a| self.disclose(&entry.field, service, a)),
                    );
                }
                instance.set(entry.field.clone(), value);
            }
        }

        if let Some(hook) = hook {
            hook(&mut instance);
        }

        let mut out = Vec::with_capacity(children.len() + 1);
        out.push(instance);
        out.extend(children);
        out
    }

    fn resolve(&self, entry: &MappingEntry, properties: &PropertyMap) -> Option<Value> {
        let raw = properties.get(&entry.property)?;
        Some(apply(entry, raw))
    }

    fn disclose(&self, field: &str, service: &str, association: &Association) -> Instance {
        let mut child = Instance::with_origin(association.endpoint.as_str(), service);
        let pseudo = [
            (ASSOCIATION_SOURCE, &association.source),
            (ASSOCIATION_DESTINATION, &association.destination),
            (ASSOCIATION_ENDPOINT, &association.endpoint),
        ];
        let has_entries = self.has_interface(field);

        for (property, raw) in pseudo {
            let raw = Value::from(raw.as_str());
            if !has_entries {
                child.set(property, raw);
                continue;
            }
            for entry in self.entries_for(field).filter(|e| e.property == property) {
                child.set(entry.field.clone(), apply(entry, &raw));
            }
        }
        child
    }
}

fn apply(entry: &MappingEntry, raw: &Value) -> Value {
    match &entry.formatter {
        Some(formatter) => formatter.format(&entry.property, raw),
        None => raw.clone(),
    }
}
