//! Object Bus
//!
//! The entity layer treats the local object bus purely as a capability:
//! read properties, enumerate objects under a path prefix, introspect a whole
//! service, and watch service ownership changes. Transport lives elsewhere.

mod memory;

pub use memory::*;

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;

use entity_types::Value;

use crate::{BusError, BusResult};

/// Property name to value, for one interface of one object
pub type PropertyMap = BTreeMap<String, Value>;

/// Interface name to its properties, for one object
pub type InterfaceMap = BTreeMap<String, PropertyMap>;

/// Object path to interfaces, for every object of one service
pub type ManagedObjects = BTreeMap<String, InterfaceMap>;

/// Object path to owning service to implemented interfaces
pub type SubTree = BTreeMap<String, BTreeMap<String, Vec<String>>>;

// ─────────────────────────────────────────────────────────────────────────────
// Search Depth
// ─────────────────────────────────────────────────────────────────────────────

/// How far below a path prefix an enumeration reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDepth {
    /// Only objects exactly one segment below the prefix
    Children,
    /// Any object below the prefix
    Subtree,
}

impl SearchDepth {
    /// Whether `path` lies under `prefix` within this depth
    pub fn admits(&self, prefix: &str, path: &str) -> bool {
        match extra_segments(prefix, path) {
            Some(0) | None => false,
            Some(n) => match self {
                SearchDepth::Children => n == 1,
                SearchDepth::Subtree => true,
            },
        }
    }
}

/// Number of path segments `path` has below `prefix`, or `None` when `path`
/// is not under `prefix`.
///
/// A trailing slash on the prefix is ignored, so `/a/b/` and `/a/b` are the
/// same prefix. A path equal to the prefix has zero extra segments.
pub fn extra_segments(prefix: &str, path: &str) -> Option<usize> {
    let prefix = prefix.trim_end_matches('/');
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some(0);
    }
    if !rest.starts_with('/') {
        return None;
    }
    Some(rest.trim_end_matches('/').matches('/').count())
}

/// Last segment of an object path
pub fn path_leaf(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Ownership Changes
// ─────────────────────────────────────────────────────────────────────────────

/// A bus name changed owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerChange {
    pub name: String,
    pub old_owner: Option<String>,
    pub new_owner: Option<String>,
}

impl OwnerChange {
    /// Unique connection names (`:1.42`) are not services
    pub fn is_unique_name(&self) -> bool {
        self.name.starts_with(':')
    }

    pub fn vanished(&self) -> bool {
        self.new_owner.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus Capability
// ─────────────────────────────────────────────────────────────────────────────

/// A connected, reusable bus handle
pub trait Bus: Send + Sync {
    /// Read all properties of one interface on one object
    fn get_all(&self, service: &str, path: &str, interface: &str) -> BusResult<PropertyMap>;

    /// Read a single property
    fn get_property(
        &self,
        service: &str,
        path: &str,
        interface: &str,
        property: &str,
    ) -> BusResult<Value> {
        self.get_all(service, path, interface)?
            .remove(property)
            .ok_or_else(|| BusError::PropertyNotFound {
                path: path.to_string(),
                interface: interface.to_string(),
                property: property.to_string(),
            })
    }

    /// Enumerate objects below `prefix` implementing any of `interfaces`
    /// (all objects when empty), optionally restricted to one owner.
    fn find_objects(
        &self,
        prefix: &str,
        interfaces: &[String],
        depth: SearchDepth,
        owner: Option<&str>,
    ) -> BusResult<SubTree>;

    /// Every object exposed by one service
    fn introspect_service(&self, service: &str) -> BusResult<ManagedObjects>;

    /// Stream of name ownership changes
    fn subscribe_owner_changes(&self) -> BusResult<Receiver<OwnerChange>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extra_segments() {
        assert_eq!(extra_segments("/xyz/state", "/xyz/state/host0"), Some(1));
        assert_eq!(extra_segments("/xyz/state/", "/xyz/state/host0"), Some(1));
        assert_eq!(extra_segments("/xyz/state", "/xyz/state/host0/sub"), Some(2));
        assert_eq!(extra_segments("/xyz/state", "/xyz/state"), Some(0));
        assert_eq!(extra_segments("/xyz/state", "/xyz/stateful/host0"), None);
        assert_eq!(extra_segments("/xyz/state", "/abc"), None);
    }

    #[test]
    fn test_depth_children_vs_subtree() {
        let prefix = "/xyz/openbmc_project/sensors";
        let child = "/xyz/openbmc_project/sensors/temperature";
        let grandchild = "/xyz/openbmc_project/sensors/temperature/cpu0";

        assert!(SearchDepth::Children.admits(prefix, child));
        assert!(!SearchDepth::Children.admits(prefix, grandchild));
        assert!(SearchDepth::Subtree.admits(prefix, child));
        assert!(SearchDepth::Subtree.admits(prefix, grandchild));
        assert!(!SearchDepth::Subtree.admits(prefix, prefix));
    }

    #[test]
    fn test_root_prefix() {
        assert!(SearchDepth::Children.admits("/", "/xyz"));
        assert!(!SearchDepth::Children.admits("/", "/xyz/openbmc_project"));
    }

    #[test]
    fn test_path_leaf() {
        assert_eq!(path_leaf("/xyz/openbmc_project/sensors/temperature/cpu0"), "cpu0");
        assert_eq!(path_leaf("cpu0"), "cpu0");
    }
}
