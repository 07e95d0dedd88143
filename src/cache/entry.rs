//! The value stored per cache key.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;

use super::events::Epoch;

/// Expiry applied when a Set/Append event does not carry one.
pub const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Opaque cached payload: an object, or a list of records for paginated resources.
pub type Payload = Value;

/// Error attached to an entry and surfaced to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ErrorValue(Value);

impl ErrorValue {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self(Value::String(message.into()))
    }

    /// JSON `null` and `false` mean "no error".
    pub fn is_present(&self) -> bool {
        !matches!(self.0, Value::Null | Value::Bool(false))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// Named boolean side-flags; a flag is set when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Flags(BTreeSet<String>);

impl Flags {
    pub fn is_set(&self, flag: &str) -> bool {
        self.0.contains(flag)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub(crate) fn with(mut self, flag: &str) -> Self {
        self.0.insert(flag.to_string());
        self
    }

    pub(crate) fn without(mut self, flag: &str) -> Self {
        self.0.remove(flag);
        self
    }
}

/// Payload, lifecycle flags and freshness metadata for one key.
///
/// Entries are never mutated once published; every transition produces a new
/// value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheEntry {
    pub data: Option<Payload>,
    pub loading: bool,
    pub error: Option<ErrorValue>,
    /// Written only by successful Set/Append transitions.
    #[serde(with = "time::serde::rfc3339::option")]
    pub cached_at: Option<OffsetDateTime>,
    pub expires_in_seconds: u64,
    #[serde(skip_serializing_if = "Flags::is_empty")]
    pub flags: Flags,
    #[serde(skip)]
    pub(crate) pending_epoch: Option<Epoch>,
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            cached_at: None,
            expires_in_seconds: DEFAULT_EXPIRES_IN_SECS,
            flags: Flags::default(),
            pending_epoch: None,
        }
    }
}

impl CacheEntry {
    /// Epoch handed out by the most recent `RequestStarted`, if any.
    pub fn pending_epoch(&self) -> Option<Epoch> {
        self.pending_epoch
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.is_set(flag)
    }

    pub fn view(&self) -> EntryView {
        EntryView {
            data: self.data.clone(),
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

/// The `(data, loading, error)` triple the rendering layer reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryView {
    pub data: Option<Payload>,
    pub loading: bool,
    pub error: Option<ErrorValue>,
}

impl EntryView {
    /// View of a key no request has populated yet.
    pub fn pending() -> Self {
        Self {
            data: None,
            loading: true,
            error: None,
        }
    }
}
