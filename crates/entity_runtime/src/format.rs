//! Formatters
//!
//! A formatter normalizes one raw property value into its final field value.
//! Formatters never fail: invalid input is logged and becomes
//! [`Value::Unavailable`] (or a documented fallback such as `0`).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};
use serde::Serialize;

use entity_types::Value;

/// Transform applied to one mapped property
pub trait Formatter: Send + Sync {
    fn format(&self, property: &str, value: &Value) -> Value;
}

impl<F> Formatter for F
where
    F: Fn(&str, &Value) -> Value + Send + Sync,
{
    fn format(&self, property: &str, value: &Value) -> Value {
        self(property, value)
    }
}

pub type SharedFormatter = Arc<dyn Formatter>;

fn rejected(property: &str, value: &Value, reason: &str) -> Value {
    tracing::debug!(property, value = %value, reason, "Formatter rejected value");
    Value::Unavailable
}

// ─────────────────────────────────────────────────────────────────────────────
// Dictionary
// ─────────────────────────────────────────────────────────────────────────────

/// Maps raw strings or codes to normalized labels
pub struct DictFormatter {
    table: HashMap<String, Value>,
    default: Value,
    match_suffix: bool,
}

impl DictFormatter {
    pub fn new<I, K, V>(entries: I, default: impl Into<Value>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            table: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            default: default.into(),
            match_suffix: false,
        }
    }

    /// Look raw enum strings up by their last dotted segment
    pub fn on_suffix(mut self) -> Self {
        self.match_suffix = true;
        self
    }

    fn key(&self, value: &Value) -> Option<String> {
        match value {
            Value::String(s) if self.match_suffix => Some(enum_suffix(s)?.to_string()),
            Value::String(s) => Some(s.clone()),
            Value::Int(_) | Value::UInt(_) | Value::Bool(_) => Some(value.to_string()),
            _ => None,
        }
    }
}

impl Formatter for DictFormatter {
    fn format(&self, _property: &str, value: &Value) -> Value {
        self.key(value)
            .and_then(|key| self.table.get(&key).cloned())
            .unwrap_or_else(|| self.default.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Enum Suffix
// ─────────────────────────────────────────────────────────────────────────────

/// Last segment of a dotted enum name, `None` when there is no namespace
pub fn enum_suffix(raw: &str) -> Option<&str> {
    match raw.rsplit_once('.') {
        Some((namespace, tail)) if !namespace.is_empty() && !tail.is_empty() => Some(tail),
        _ => None,
    }
}

/// Strips the namespace off dotted enum values
pub struct EnumSuffix;

impl Formatter for EnumSuffix {
    fn format(&self, property: &str, value: &Value) -> Value {
        match value.as_str().and_then(enum_suffix) {
            Some(tail) => Value::from(tail),
            None => rejected(property, value, "not a dotted enum"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hex
// ─────────────────────────────────────────────────────────────────────────────

/// Parses hexadecimal strings (with or without `0x`). Invalid input yields `0`.
pub struct HexToInt;

pub fn parse_hex(raw: &str) -> Option<i64> {
    let digits = raw.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    i64::from_str_radix(digits, 16).ok()
}

impl Formatter for HexToInt {
    fn format(&self, property: &str, value: &Value) -> Value {
        match value.as_str().and_then(parse_hex) {
            Some(n) => Value::Int(n),
            None => {
                tracing::debug!(property, value = %value, "Invalid hex value, using 0");
                Value::Int(0)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trim
// ─────────────────────────────────────────────────────────────────────────────

/// Trims surrounding whitespace (and NUL padding) from strings
pub struct Trim;

impl Formatter for Trim {
    fn format(&self, property: &str, value: &Value) -> Value {
        match value.as_str() {
            Some(s) => Value::from(s.trim_matches(|c: char| c.is_whitespace() || c == '\0')),
            None => rejected(property, value, "not a string"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Time
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochUnit {
    Seconds,
    Milliseconds,
}

/// Converts a unix epoch into an ISO 8601 UTC timestamp
pub struct EpochToIso8601 {
    unit: EpochUnit,
}

impl EpochToIso8601 {
    pub fn seconds() -> Self {
        Self {
            unit: EpochUnit::Seconds,
        }
    }

    pub fn milliseconds() -> Self {
        Self {
            unit: EpochUnit::Milliseconds,
        }
    }
}

pub fn epoch_to_iso8601(epoch: i64, unit: EpochUnit) -> Option<String> {
    let seconds = match unit {
        EpochUnit::Seconds => epoch,
        EpochUnit::Milliseconds => epoch.div_euclid(1000),
    };
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, false))
}

impl Formatter for EpochToIso8601 {
    fn format(&self, property: &str, value: &Value) -> Value {
        match value.as_i64().and_then(|epoch| epoch_to_iso8601(epoch, self.unit)) {
            Some(ts) => Value::String(ts),
            None => rejected(property, value, "not an epoch"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Health Status
// ─────────────────────────────────────────────────────────────────────────────

/// Health status, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum HealthStatus {
    #[default]
    OK,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::OK => "OK",
            HealthStatus::Warning => "Warning",
            HealthStatus::Critical => "Critical",
        }
    }

    /// Parse a status label; unknown labels are `None`
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "OK" => Some(HealthStatus::OK),
            "Warning" => Some(HealthStatus::Warning),
            "Critical" => Some(HealthStatus::Critical),
            _ => None,
        }
    }

    /// Most severe status among `values`; `OK` when empty
    pub fn highest<'a>(values: impl IntoIterator<Item = &'a Value>) -> Self {
        values
            .into_iter()
            .filter_map(|v| v.as_str().and_then(Self::parse))
            .max()
            .unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared Constructors
// ─────────────────────────────────────────────────────────────────────────────

pub fn dictionary<I, K, V>(entries: I, default: impl Into<Value>) -> SharedFormatter
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    Arc::new(DictFormatter::new(entries, default))
}

/// Dictionary keyed on the enum suffix of the raw value
pub fn suffix_dictionary<I, K, V>(entries: I, default: impl Into<Value>) -> SharedFormatter
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    Arc::new(DictFormatter::new(entries, default).on_suffix())
}

pub fn suffix() -> SharedFormatter {
    Arc::new(EnumSuffix)
}

pub fn hex() -> SharedFormatter {
    Arc::new(HexToInt)
}

pub fn trim() -> SharedFormatter {
    Arc::new(Trim)
}

pub fn epoch_seconds() -> SharedFormatter {
    Arc::new(EpochToIso8601::seconds())
}

pub fn epoch_millis() -> SharedFormatter {
    Arc::new(EpochToIso8601::milliseconds())
}
