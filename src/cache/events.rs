//! Cache lifecycle events.
//!
//! `CacheEvent` is the closed set of transitions a store understands.
//! `RawEvent` is the loosely typed form producers put on the wire; converting
//! it is where malformed events are caught.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::entry::{ErrorValue, Payload};
use super::keys::{CacheKey, KeyError, Segment};

/// Monotonic per-store request token handed out by `RequestStarted`.
///
/// Terminal events that echo a superseded epoch are dropped when fencing is
/// enabled.
pub type Epoch = u64;

/// Lifecycle event for one key.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent<K> {
    /// A request for the key went out.
    RequestStarted { key: K },
    /// The request returned a full payload.
    RequestSucceeded {
        key: K,
        data: Payload,
        expires_in_seconds: Option<u64>,
        epoch: Option<Epoch>,
    },
    /// The request returned a further page to append.
    RequestAppended {
        key: K,
        incoming: Payload,
        dedup_key: Option<String>,
        expires_in_seconds: Option<u64>,
        epoch: Option<Epoch>,
    },
    /// The request failed.
    RequestFailed {
        key: K,
        error: ErrorValue,
        epoch: Option<Epoch>,
    },
    /// Drop the entry unconditionally.
    EntryCleared { key: K },
    /// Drop the entry if it expired.
    EntryInvalidated { key: K },
    /// Reset one side-flag.
    FlagInvalidated { key: K, flag: String },
    /// Raise one side-flag.
    FlagSet { key: K, flag: String },
}

impl<K> CacheEvent<K> {
    pub fn succeeded(key: K, data: Payload) -> Self {
        Self::RequestSucceeded {
            key,
            data,
            expires_in_seconds: None,
            epoch: None,
        }
    }

    pub fn appended(key: K, incoming: Payload, dedup_key: Option<&str>) -> Self {
        Self::RequestAppended {
            key,
            incoming,
            dedup_key: dedup_key.map(str::to_string),
            expires_in_seconds: None,
            epoch: None,
        }
    }

    pub fn failed(key: K, error: ErrorValue) -> Self {
        Self::RequestFailed {
            key,
            error,
            epoch: None,
        }
    }

    pub fn key(&self) -> &K {
        match self {
            Self::RequestStarted { key }
            | Self::RequestSucceeded { key, .. }
            | Self::RequestAppended { key, .. }
            | Self::RequestFailed { key, .. }
            | Self::EntryCleared { key }
            | Self::EntryInvalidated { key }
            | Self::FlagInvalidated { key, .. }
            | Self::FlagSet { key, .. } => key,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::RequestStarted { .. } => EventKind::RequestStarted,
            Self::RequestSucceeded { .. } => EventKind::RequestSucceeded,
            Self::RequestAppended { .. } => EventKind::RequestAppended,
            Self::RequestFailed { .. } => EventKind::RequestFailed,
            Self::EntryCleared { .. } => EventKind::EntryCleared,
            Self::EntryInvalidated { .. } => EventKind::EntryInvalidated,
            Self::FlagInvalidated { .. } => EventKind::FlagInvalidated,
            Self::FlagSet { .. } => EventKind::FlagSet,
        }
    }

    /// Epoch echoed by a terminal event, if the producer fenced it.
    pub fn epoch(&self) -> Option<Epoch> {
        match self {
            Self::RequestSucceeded { epoch, .. }
            | Self::RequestAppended { epoch, .. }
            | Self::RequestFailed { epoch, .. } => *epoch,
            _ => None,
        }
    }

    /// Attach the epoch returned by `RequestStarted` to a terminal event.
    pub fn with_epoch(self, fence: Epoch) -> Self {
        match self {
            Self::RequestSucceeded {
                key,
                data,
                expires_in_seconds,
                ..
            } => Self::RequestSucceeded {
                key,
                data,
                expires_in_seconds,
                epoch: Some(fence),
            },
            Self::RequestAppended {
                key,
                incoming,
                dedup_key,
                expires_in_seconds,
                ..
            } => Self::RequestAppended {
                key,
                incoming,
                dedup_key,
                expires_in_seconds,
                epoch: Some(fence),
            },
            Self::RequestFailed { key, error, .. } => Self::RequestFailed {
                key,
                error,
                epoch: Some(fence),
            },
            other => other,
        }
    }

    /// Override the expiry of a Set/Append event.
    pub fn with_expiry(self, seconds: u64) -> Self {
        match self {
            Self::RequestSucceeded {
                key, data, epoch, ..
            } => Self::RequestSucceeded {
                key,
                data,
                expires_in_seconds: Some(seconds),
                epoch,
            },
            Self::RequestAppended {
                key,
                incoming,
                dedup_key,
                epoch,
                ..
            } => Self::RequestAppended {
                key,
                incoming,
                dedup_key,
                expires_in_seconds: Some(seconds),
                epoch,
            },
            other => other,
        }
    }

    /// Reshape the key, keeping the payload.
    pub fn try_map_key<K2, E>(self, f: impl FnOnce(K) -> Result<K2, E>) -> Result<CacheEvent<K2>, E> {
        Ok(match self {
            Self::RequestStarted { key } => CacheEvent::RequestStarted { key: f(key)? },
            Self::RequestSucceeded {
                key,
                data,
                expires_in_seconds,
                epoch,
            } => CacheEvent::RequestSucceeded {
                key: f(key)?,
                data,
                expires_in_seconds,
                epoch,
            },
            Self::RequestAppended {
                key,
                incoming,
                dedup_key,
                expires_in_seconds,
                epoch,
            } => CacheEvent::RequestAppended {
                key: f(key)?,
                incoming,
                dedup_key,
                expires_in_seconds,
                epoch,
            },
            Self::RequestFailed { key, error, epoch } => CacheEvent::RequestFailed {
                key: f(key)?,
                error,
                epoch,
            },
            Self::EntryCleared { key } => CacheEvent::EntryCleared { key: f(key)? },
            Self::EntryInvalidated { key } => CacheEvent::EntryInvalidated { key: f(key)? },
            Self::FlagInvalidated { key, flag } => CacheEvent::FlagInvalidated {
                key: f(key)?,
                flag,
            },
            Self::FlagSet { key, flag } => CacheEvent::FlagSet {
                key: f(key)?,
                flag,
            },
        })
    }
}

/// Discriminant of a lifecycle event, used for wire parsing and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    RequestStarted,
    RequestSucceeded,
    RequestAppended,
    RequestFailed,
    EntryCleared,
    EntryInvalidated,
    FlagInvalidated,
    FlagSet,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        Self::RequestStarted,
        Self::RequestSucceeded,
        Self::RequestAppended,
        Self::RequestFailed,
        Self::EntryCleared,
        Self::EntryInvalidated,
        Self::FlagInvalidated,
        Self::FlagSet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RequestStarted => "request_started",
            Self::RequestSucceeded => "request_succeeded",
            Self::RequestAppended => "request_appended",
            Self::RequestFailed => "request_failed",
            Self::EntryCleared => "entry_cleared",
            Self::EntryInvalidated => "entry_invalidated",
            Self::FlagInvalidated => "flag_invalidated",
            Self::FlagSet => "flag_set",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = MalformedEvent;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| MalformedEvent::UnknownKind(value.to_string()))
    }
}

// ============================================================================
// Wire form
// ============================================================================

/// Event as emitted by a producer; every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub key: Option<Vec<Value>>,
    pub data: Option<Value>,
    pub incoming: Option<Value>,
    pub error: Option<Value>,
    pub dedup_key: Option<String>,
    pub expires_in_seconds: Option<u64>,
    #[serde(alias = "flagName")]
    pub flag: Option<String>,
    pub epoch: Option<Epoch>,
}

impl RawEvent {
    pub fn new(kind: EventKind, key: Vec<Segment>) -> Self {
        Self {
            kind: Some(kind.as_str().to_string()),
            key: Some(key.into_iter().map(Value::from).collect()),
            ..Default::default()
        }
    }

    /// Parsed event kind, without validating the rest of the payload.
    pub fn event_kind(&self) -> Result<EventKind, MalformedEvent> {
        self.kind
            .as_deref()
            .ok_or(MalformedEvent::MissingKind)?
            .parse()
    }

    /// Typed event for a store keyed by `K`.
    pub fn into_event<K>(self) -> Result<CacheEvent<K>, MalformedEvent>
    where
        K: TryFrom<CacheKey, Error = KeyError>,
    {
        CacheEvent::try_from(self)?
            .try_map_key(<K as TryFrom<CacheKey>>::try_from)
            .map_err(MalformedEvent::from)
    }

    /// The event key, checked for segment types and count.
    pub fn cache_key(&self) -> Result<CacheKey, MalformedEvent> {
        let values = self.key.clone().ok_or(MalformedEvent::MissingKey)?;
        Ok(CacheKey::from_values(values)?)
    }
}

/// Why a wire event was absorbed as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedEvent {
    #[error("event has no type")]
    MissingKind,
    #[error("unknown event type `{0}`")]
    UnknownKind(String),
    #[error("event has no key")]
    MissingKey,
    #[error("invalid key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error("`{kind}` event is missing `{field}`")]
    MissingField {
        kind: EventKind,
        field: &'static str,
    },
    #[error("`{field}` is invalid: {reason}")]
    InvalidPayload { field: &'static str, reason: String },
    #[error("`{kind}` events are not supported by the {store} cache")]
    Unsupported { kind: String, store: String },
}

impl MalformedEvent {
    /// Stable label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingKind => "missing_kind",
            Self::UnknownKind(_) => "unknown_kind",
            Self::MissingKey => "missing_key",
            Self::InvalidKey(_) => "invalid_key",
            Self::MissingField { .. } => "missing_field",
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

/// Required payload field; JSON `null` counts as missing.
fn required(
    value: Option<Value>,
    kind: EventKind,
    field: &'static str,
) -> Result<Value, MalformedEvent> {
    match value {
        Some(Value::Null) | None => Err(MalformedEvent::MissingField { kind, field }),
        Some(value) => Ok(value),
    }
}

impl TryFrom<RawEvent> for CacheEvent<CacheKey> {
    type Error = MalformedEvent;

    fn try_from(raw: RawEvent) -> Result<Self, Self::Error> {
        let kind = raw.event_kind()?;
        let key = raw.cache_key()?;

        Ok(match kind {
            EventKind::RequestStarted => Self::RequestStarted { key },
            EventKind::RequestSucceeded => Self::RequestSucceeded {
                key,
                data: required(raw.data, kind, "data")?,
                expires_in_seconds: raw.expires_in_seconds,
                epoch: raw.epoch,
            },
            EventKind::RequestAppended => Self::RequestAppended {
                key,
                incoming: required(raw.incoming, kind, "incoming")?,
                dedup_key: raw.dedup_key,
                expires_in_seconds: raw.expires_in_seconds,
                epoch: raw.epoch,
            },
            EventKind::RequestFailed => Self::RequestFailed {
                key,
                // `null` is a legitimate "no error" value here, only absence is malformed.
                error: raw
                    .error
                    .map(ErrorValue::new)
                    .ok_or(MalformedEvent::MissingField {
                        kind,
                        field: "error",
                    })?,
                epoch: raw.epoch,
            },
            EventKind::EntryCleared => Self::EntryCleared { key },
            EventKind::EntryInvalidated => Self::EntryInvalidated { key },
            EventKind::FlagInvalidated => Self::FlagInvalidated {
                key,
                flag: raw.flag.ok_or(MalformedEvent::MissingField {
                    kind,
                    field: "flag",
                })?,
            },
            EventKind::FlagSet => Self::FlagSet {
                key,
                flag: raw.flag.ok_or(MalformedEvent::MissingField {
                    kind,
                    field: "flag",
                })?,
            },
        })
    }
}
