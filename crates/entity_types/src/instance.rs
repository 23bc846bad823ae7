//! Instances
//!
//! An instance is one fetched record: field name to value, plus the meta
//! fields recording where on the bus it came from.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::{EntityError, EntityResult, META_OBJECT_PATH, META_OBJECT_SERVICE, Value, is_meta_field};

static UNAVAILABLE: Value = Value::Unavailable;

/// One concrete record held by an entity
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Instance {
    fields: BTreeMap<String, Value>,
}

impl Instance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an instance tagged with the object it was read from
    pub fn with_origin(path: impl Into<String>, service: impl Into<String>) -> Self {
        let path: String = path.into();
        let service: String = service.into();
        Self::new()
            .with(META_OBJECT_PATH, path)
            .with(META_OBJECT_SERVICE, service)
    }

    /// Builder-style setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Field value, or the unavailable marker when the field is not set
    pub fn get_field(&self, name: &str) -> &Value {
        self.fields.get(name).unwrap_or(&UNAVAILABLE)
    }

    /// Field value if the field is set at all
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// All field names, meta fields included
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Non-meta fields in name order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields
            .iter()
            .filter(|(name, _)| !is_meta_field(name))
            .map(|(name, value)| (name.as_str(), value))
    }

    pub fn object_path(&self) -> Option<&str> {
        self.get_field(META_OBJECT_PATH).as_str()
    }

    pub fn service(&self) -> Option<&str> {
        self.get_field(META_OBJECT_SERVICE).as_str()
    }

    /// Copy every non-meta field of `other` onto this instance
    pub fn merge_from(&mut self, other: &Instance) {
        for (name, value) in other.fields() {
            self.fields.insert(name.to_string(), value.clone());
        }
    }

    /// Render the non-meta fields as a JSON object
    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields()
            .map(|(name, value)| (name.to_string(), serde_json::Value::from(value)))
            .collect();
        serde_json::Value::Object(map)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Typed Accessors
// ─────────────────────────────────────────────────────────────────────────────

impl Instance {
    fn typed<'a, T>(
        &'a self,
        name: &str,
        expected: &str,
        extract: impl FnOnce(&'a Value) -> Option<T>,
    ) -> EntityResult<Option<T>> {
        let value = self
            .fields
            .get(name)
            .ok_or_else(|| EntityError::unknown_field("instance", name))?;
        if !value.is_available() {
            return Ok(None);
        }
        extract(value)
            .map(Some)
            .ok_or_else(|| EntityError::invalid_type(name, expected))
    }

    /// String field; `Ok(None)` when unavailable
    pub fn get_str(&self, name: &str) -> EntityResult<Option<&str>> {
        self.typed(name, "string", Value::as_str)
    }

    pub fn get_bool(&self, name: &str) -> EntityResult<Option<bool>> {
        self.typed(name, "bool", Value::as_bool)
    }

    pub fn get_i64(&self, name: &str) -> EntityResult<Option<i64>> {
        self.typed(name, "int", Value::as_i64)
    }

    pub fn get_u64(&self, name: &str) -> EntityResult<Option<u64>> {
        self.typed(name, "uint", Value::as_u64)
    }

    pub fn get_f64(&self, name: &str) -> EntityResult<Option<f64>> {
        self.typed(name, "float", Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_fields() {
        let instance = Instance::with_origin("/xyz/openbmc_project/state/host0", "xyz.openbmc_project.State.Host");
        assert_eq!(instance.object_path(), Some("/xyz/openbmc_project/state/host0"));
        assert_eq!(instance.service(), Some("xyz.openbmc_project.State.Host"));
        assert_eq!(instance.fields().count(), 0);
    }

    #[test]
    fn test_missing_field_is_unavailable() {
        let instance = Instance::new();
        assert_eq!(instance.get_field("Anything"), &Value::Unavailable);
    }

    #[test]
    fn test_typed_accessors() {
        let instance = Instance::new()
            .with("Model", "R2")
            .with("Reading", 12.5)
            .with("Serial", Value::Unavailable);

        assert_eq!(instance.get_str("Model").unwrap(), Some("R2"));
        assert_eq!(instance.get_f64("Reading").unwrap(), Some(12.5));
        assert_eq!(instance.get_str("Serial").unwrap(), None);
        assert!(matches!(
            instance.get_bool("Model"),
            Err(EntityError::InvalidType { .. })
        ));
        assert!(matches!(
            instance.get_str("Nope"),
            Err(EntityError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_merge_skips_meta() {
        let mut target = Instance::with_origin("/a", "svc.a").with("Name", "a");
        let supplement = Instance::with_origin("/b", "svc.b").with("Led", true);
        target.merge_from(&supplement);

        assert_eq!(target.object_path(), Some("/a"));
        assert_eq!(target.get_field("Led"), &Value::Bool(true));
    }

    #[test]
    fn test_json_hides_meta() {
        let instance = Instance::with_origin("/a", "svc.a").with("Name", "a");
        assert_eq!(instance.to_json(), serde_json::json!({"Name": "a"}));
    }
}
