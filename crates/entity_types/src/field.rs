//! Field declarations
//!
//! An entity declares its fields up front. Every value a query produces must
//! land in a declared field; undeclared fields are rejected when an instance
//! is installed, and declared fields left empty receive their default.

use serde::Serialize;

use crate::{EntityError, EntityResult, Instance, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Meta Fields
// ─────────────────────────────────────────────────────────────────────────────

/// Prefix reserved for bookkeeping fields that are never rendered
pub const META_FIELD_PREFIX: &str = "__meta_field__";

/// Object path an instance was read from
pub const META_OBJECT_PATH: &str = "__meta_field__object_path";

/// Service an instance was read from
pub const META_OBJECT_SERVICE: &str = "__meta_field__object_service";

/// Whether a field name is a reserved meta field
pub fn is_meta_field(name: &str) -> bool {
    name.starts_with(META_FIELD_PREFIX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Field Definition
// ─────────────────────────────────────────────────────────────────────────────

/// Semantic type of a declared field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Bool,
    Int,
    UInt,
    Float,
    String,
    /// A normalized enum label, stored as a string
    Enum,
    List,
    Associations,
}

impl FieldKind {
    /// Whether a value fits this kind. `Unavailable` fits every kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Unavailable) => true,
            (FieldKind::Bool, Value::Bool(_)) => true,
            (FieldKind::Int | FieldKind::UInt, Value::Int(_) | Value::UInt(_)) => true,
            (FieldKind::Float, Value::Float(_) | Value::Int(_) | Value::UInt(_)) => true,
            (FieldKind::String | FieldKind::Enum, Value::String(_)) => true,
            (FieldKind::List, Value::List(_)) => true,
            (FieldKind::Associations, Value::Associations(_)) => true,
            _ => false,
        }
    }
}

/// A declared (name, kind, default) slot on an entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub default: Value,
}

impl FieldDef {
    /// Declare a field whose default is the unavailable marker
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: Value::Unavailable,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Enum)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Int)
    }

    pub fn uint(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::UInt)
    }

    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn list(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::List)
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Schema
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered set of field declarations
#[derive(Debug, Clone, Default, Serialize)]
pub struct Schema {
    fields: Vec<FieldDef>,
}

/// Outcome of completing an instance against a schema
#[derive(Debug, Default, PartialEq)]
pub struct Completion {
    /// Undeclared fields that were dropped
    pub rejected: Vec<String>,
    /// Declared fields whose value did not fit the declared kind
    pub mistyped: Vec<String>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a field. Redeclaring a name replaces the earlier definition in place.
    pub fn declare(&mut self, field: FieldDef) -> &mut Self {
        match self.fields.iter_mut().find(|f| f.name == field.name) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether a field may be stored on an instance of this schema
    pub fn contains(&self, name: &str) -> bool {
        is_meta_field(name) || self.get(name).is_some()
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fail with `UnknownField` unless every name is declared
    pub fn require<'a>(
        &self,
        owner: &str,
        names: impl IntoIterator<Item = &'a str>,
    ) -> EntityResult<()> {
        for name in names {
            if !self.contains(name) {
                return Err(EntityError::unknown_field(owner, name));
            }
        }
        Ok(())
    }

    /// Drop undeclared fields and install defaults for declared fields that
    /// carry no value. An explicit `Unavailable` from a formatter or hook is
    /// kept.
    pub fn complete(&self, instance: &mut Instance) -> Completion {
        let mut completion = Completion::default();

        let undeclared: Vec<String> = instance
            .names()
            .filter(|name| !self.contains(name))
            .map(str::to_string)
            .collect();
        for name in undeclared {
            instance.remove(&name);
            completion.rejected.push(name);
        }

        for field in &self.fields {
            match instance.value(&field.name) {
                Some(value) => {
                    if !field.kind.accepts(value) {
                        completion.mistyped.push(field.name.clone());
                    }
                }
                None => instance.set(field.name.clone(), field.default.clone()),
            }
        }

        completion
    }
}
