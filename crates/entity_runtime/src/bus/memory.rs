//! In-memory Bus
//!
//! An object tree held in process memory. The agent loads bus snapshots into
//! it, and tests use it as the bus double: it tracks owners, fans out owner
//! changes to subscribers, and counts read calls.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

use parking_lot::{Mutex, RwLock};

use entity_types::Value;

use super::{Bus, InterfaceMap, ManagedObjects, OwnerChange, PropertyMap, SearchDepth, SubTree};
use crate::{BusError, BusResult};

struct ServiceEntry {
    /// Unique connection name currently owning the service
    owner: String,
    objects: ManagedObjects,
}

/// Bus implementation backed by an in-memory object tree
pub struct MemoryBus {
    services: RwLock<BTreeMap<String, ServiceEntry>>,
    subscribers: Mutex<Vec<Sender<OwnerChange>>>,
    next_unique: AtomicUsize,
    calls: AtomicUsize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(BTreeMap::new()),
            subscribers: Mutex::new(Vec::new()),
            next_unique: AtomicUsize::new(1),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of read calls served so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn services(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    /// Unique name currently owning `service`
    pub fn owner_of(&self, service: &str) -> Option<String> {
        self.services.read().get(service).map(|s| s.owner.clone())
    }

    fn allocate_owner(&self) -> String {
        format!(":1.{}", self.next_unique.fetch_add(1, Ordering::SeqCst))
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }

    fn notify(&self, change: OwnerChange) {
        tracing::debug!(
            name = %change.name,
            old = ?change.old_owner,
            new = ?change.new_owner,
            "Owner changed"
        );
        self.subscribers
            .lock()
            .retain(|tx| tx.send(change.clone()).is_ok());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutation
    // ─────────────────────────────────────────────────────────────────────────

    /// Add (or overwrite) one interface on one object. A service seen for the
    /// first time acquires an owner and is announced to subscribers.
    pub fn add_object<I, K, V>(&self, service: &str, path: &str, interface: &str, properties: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let properties: PropertyMap = properties
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let appeared = {
            let mut services = self.services.write();
            let appeared = !services.contains_key(service);
            if appeared {
                let owner = self.allocate_owner();
                services.insert(
                    service.to_string(),
                    ServiceEntry {
                        owner,
                        objects: ManagedObjects::new(),
                    },
                );
            }
            if let Some(entry) = services.get_mut(service) {
                entry
                    .objects
                    .entry(path.to_string())
                    .or_default()
                    .insert(interface.to_string(), properties);
            }
            appeared
        };

        if appeared {
            let new_owner = self.owner_of(service);
            self.notify(OwnerChange {
                name: service.to_string(),
                old_owner: None,
                new_owner,
            });
        }
    }

    /// Update a single property; fails when the interface does not exist
    pub fn set_property(
        &self,
        service: &str,
        path: &str,
        interface: &str,
        property: &str,
        value: impl Into<Value>,
    ) -> BusResult<()> {
        let mut services = self.services.write();
        let props = services
            .get_mut(service)
            .ok_or_else(|| BusError::ServiceUnknown(service.to_string()))?
            .objects
            .get_mut(path)
            .ok_or_else(|| BusError::ObjectNotFound {
                service: service.to_string(),
                path: path.to_string(),
            })?
            .get_mut(interface)
            .ok_or_else(|| BusError::InterfaceNotFound {
                path: path.to_string(),
                interface: interface.to_string(),
            })?;
        props.insert(property.to_string(), value.into());
        Ok(())
    }

    pub fn remove_object(&self, service: &str, path: &str) -> bool {
        self.services
            .write()
            .get_mut(service)
            .is_some_and(|entry| entry.objects.remove(path).is_some())
    }

    /// Drop a service and announce that it vanished
    pub fn remove_service(&self, service: &str) -> bool {
        let removed = self.services.write().remove(service);
        match removed {
            Some(entry) => {
                self.notify(OwnerChange {
                    name: service.to_string(),
                    old_owner: Some(entry.owner),
                    new_owner: None,
                });
                true
            }
            None => false,
        }
    }

    /// Give a service a new owner, as if its process restarted
    pub fn restart_service(&self, service: &str) -> BusResult<()> {
        let new_owner = self.allocate_owner();
        let old_owner = {
            let mut services = self.services.write();
            let entry = services
                .get_mut(service)
                .ok_or_else(|| BusError::ServiceUnknown(service.to_string()))?;
            std::mem::replace(&mut entry.owner, new_owner.clone())
        };
        self.notify(OwnerChange {
            name: service.to_string(),
            old_owner: Some(old_owner),
            new_owner: Some(new_owner),
        });
        Ok(())
    }

    /// Replace the whole object tree of a service. Announces a new owner when
    /// the service is new or its objects changed. Returns whether anything
    /// was announced.
    pub fn replace_service(&self, service: &str, objects: ManagedObjects) -> bool {
        let new_owner = self.allocate_owner();
        let change = {
            let mut services = self.services.write();
            match services.get_mut(service) {
                Some(entry) if entry.objects == objects => None,
                Some(entry) => {
                    entry.objects = objects;
                    let old = std::mem::replace(&mut entry.owner, new_owner.clone());
                    Some(Some(old))
                }
                None => {
                    services.insert(
                        service.to_string(),
                        ServiceEntry {
                            owner: new_owner.clone(),
                            objects,
                        },
                    );
                    Some(None)
                }
            }
        };

        match change {
            Some(old_owner) => {
                self.notify(OwnerChange {
                    name: service.to_string(),
                    old_owner,
                    new_owner: Some(new_owner),
                });
                true
            }
            None => false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl Bus for MemoryBus {
    fn get_all(&self, service: &str, path: &str, interface: &str) -> BusResult<PropertyMap> {
        self.record_call();
        let services = self.services.read();
        let object = services
            .get(service)
            .ok_or_else(|| BusError::ServiceUnknown(service.to_string()))?
            .objects
            .get(path)
            .ok_or_else(|| BusError::ObjectNotFound {
                service: service.to_string(),
                path: path.to_string(),
            })?;
        object
            .get(interface)
            .cloned()
            .ok_or_else(|| BusError::InterfaceNotFound {
                path: path.to_string(),
                interface: interface.to_string(),
            })
    }

    fn find_objects(
        &self,
        prefix: &str,
        interfaces: &[String],
        depth: SearchDepth,
        owner: Option<&str>,
    ) -> BusResult<SubTree> {
        self.record_call();
        let services = self.services.read();
        let mut tree = SubTree::new();

        for (name, entry) in services.iter() {
            if let Some(owner) = owner {
                if owner != name && owner != entry.owner {
                    continue;
                }
            }
            for (path, object) in &entry.objects {
                if !depth.admits(prefix, path) || !implements_any(object, interfaces) {
                    continue;
                }
                tree.entry(path.clone())
                    .or_default()
                    .insert(name.clone(), object.keys().cloned().collect());
            }
        }

        Ok(tree)
    }

    fn introspect_service(&self, service: &str) -> BusResult<ManagedObjects> {
        self.record_call();
        self.services
            .read()
            .get(service)
            .map(|entry| entry.objects.clone())
            .ok_or_else(|| BusError::ServiceUnknown(service.to_string()))
    }

    fn subscribe_owner_changes(&self) -> BusResult<Receiver<OwnerChange>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        Ok(rx)
    }
}

fn implements_any(object: &InterfaceMap, interfaces: &[String]) -> bool {
    interfaces.is_empty() || interfaces.iter().any(|i| object.contains_key(i))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: &str = "xyz.openbmc_project.State.Host";
    const HOST_IFACE: &str = "xyz.openbmc_project.State.Host";

    fn bus() -> MemoryBus {
        let bus = MemoryBus::new();
        bus.add_object(
            HOST,
            "/xyz/openbmc_project/state/host0",
            HOST_IFACE,
            [("CurrentHostState", "xyz.openbmc_project.State.Host.HostState.Running")],
        );
        bus
    }

    #[test]
    fn test_get_property() {
        let bus = bus();
        let value = bus
            .get_property(HOST, "/xyz/openbmc_project/state/host0", HOST_IFACE, "CurrentHostState")
            .unwrap();
        assert_eq!(value.as_str(), Some("xyz.openbmc_project.State.Host.HostState.Running"));
        assert_eq!(bus.calls(), 1);
    }

    #[test]
    fn test_get_all_errors() {
        let bus = bus();
        assert!(matches!(
            bus.get_all("nope", "/", HOST_IFACE),
            Err(BusError::ServiceUnknown(_))
        ));
        assert!(matches!(
            bus.get_all(HOST, "/missing", HOST_IFACE),
            Err(BusError::ObjectNotFound { .. })
        ));
        assert!(matches!(
            bus.get_all(HOST, "/xyz/openbmc_project/state/host0", "other"),
            Err(BusError::InterfaceNotFound { .. })
        ));
    }

    #[test]
    fn test_find_objects_owner_filter() {
        let bus = bus();
        bus.add_object("other.Service", "/xyz/openbmc_project/state/bmc0", HOST_IFACE, [("A", 1)]);

        let all = bus
            .find_objects("/xyz/openbmc_project/state", &[HOST_IFACE.to_string()], SearchDepth::Children, None)
            .unwrap();
        assert_eq!(all.len(), 2);

        let owned = bus
            .find_objects("/xyz/openbmc_project/state", &[], SearchDepth::Children, Some(HOST))
            .unwrap();
        assert_eq!(owned.len(), 1);
        assert!(owned.contains_key("/xyz/openbmc_project/state/host0"));

        let unique = bus.owner_of(HOST).unwrap();
        let by_unique = bus
            .find_objects("/xyz/openbmc_project/state", &[], SearchDepth::Children, Some(&unique))
            .unwrap();
        assert_eq!(by_unique.len(), 1);
    }

    #[test]
    fn test_owner_notifications() {
        let bus = MemoryBus::new();
        let rx = bus.subscribe_owner_changes().unwrap();

        bus.add_object(HOST, "/a", HOST_IFACE, [("A", 1)]);
        let appeared = rx.try_recv().unwrap();
        assert_eq!(appeared.name, HOST);
        assert!(appeared.old_owner.is_none());

        bus.restart_service(HOST).unwrap();
        let restarted = rx.try_recv().unwrap();
        assert!(restarted.old_owner.is_some());
        assert_ne!(restarted.old_owner, restarted.new_owner);

        assert!(bus.remove_service(HOST));
        assert!(rx.try_recv().unwrap().vanished());
    }

    #[test]
    fn test_replace_service_unchanged_is_silent() {
        let bus = bus();
        let rx = bus.subscribe_owner_changes().unwrap();
        let objects = bus.introspect_service(HOST).unwrap();

        assert!(!bus.replace_service(HOST, objects.clone()));
        assert!(rx.try_recv().is_err());

        let mut changed = objects;
        changed.insert("/xyz/openbmc_project/state/host1".to_string(), InterfaceMap::new());
        assert!(bus.replace_service(HOST, changed));
        assert_eq!(rx.try_recv().unwrap().name, HOST);
    }
}
