//! Cache key definitions.
//!
//! Defines the opaque wire-level `CacheKey` and the typed key shape each
//! domain cache is indexed by.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Largest number of segments a cache key may carry.
pub const MAX_SEGMENTS: usize = 3;

/// Default operation for list screens.
pub const LIST_OPERATION: &str = "list";
/// Default instance id for list screens.
pub const DEFAULT_INSTANCE_ID: &str = "0";

/// One segment of a cache key.
///
/// Equality is structural: the string `"1"` and the number `1` are different
/// segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segment {
    Num(i64),
    Str(String),
}

impl Segment {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            Self::Num(_) => None,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
        }
    }
}

impl From<&str> for Segment {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Segment {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Segment {
    fn from(value: i64) -> Self {
        Self::Num(value)
    }
}

impl From<i32> for Segment {
    fn from(value: i32) -> Self {
        Self::Num(i64::from(value))
    }
}

impl From<u32> for Segment {
    fn from(value: u32) -> Self {
        Self::Num(i64::from(value))
    }
}

impl TryFrom<Value> for Segment {
    type Error = KeyError;

    /// Strings and integers that fit in `i64`; anything else is rejected.
    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(value) => Ok(Self::Str(value)),
            Value::Number(ref number) => number
                .as_i64()
                .map(Self::Num)
                .ok_or_else(|| KeyError::InvalidSegment(value.to_string())),
            other => Err(KeyError::InvalidSegment(other.to_string())),
        }
    }
}

impl From<Segment> for Value {
    fn from(segment: Segment) -> Self {
        match segment {
            Segment::Num(value) => Value::from(value),
            Segment::Str(value) => Value::String(value),
        }
    }
}

/// Reasons a key cannot be built or reshaped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("cache key has no segments")]
    Empty,
    #[error("cache key has {0} segments, at most {MAX_SEGMENTS} are allowed")]
    TooManySegments(usize),
    #[error("expected a {expected}-segment key, found {found}")]
    Arity { expected: usize, found: usize },
    #[error("key segment `{0}` is neither a string nor a 64-bit integer")]
    InvalidSegment(String),
}

/// Opaque identity of one cached request, as carried by wire events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Vec<Segment>", into = "Vec<Segment>")]
pub struct CacheKey(Vec<Segment>);

impl CacheKey {
    pub fn new(segments: Vec<Segment>) -> Result<Self, KeyError> {
        match segments.len() {
            0 => Err(KeyError::Empty),
            len if len > MAX_SEGMENTS => Err(KeyError::TooManySegments(len)),
            _ => Ok(Self(segments)),
        }
    }

    /// Build a key from raw JSON segments.
    pub fn from_values(values: Vec<Value>) -> Result<Self, KeyError> {
        let segments = values
            .into_iter()
            .map(Segment::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn expect_arity(self, expected: usize) -> Result<Vec<Segment>, KeyError> {
        if self.0.len() == expected {
            Ok(self.0)
        } else {
            Err(KeyError::Arity {
                expected,
                found: self.0.len(),
            })
        }
    }
}

impl TryFrom<Vec<Segment>> for CacheKey {
    type Error = KeyError;

    fn try_from(segments: Vec<Segment>) -> Result<Self, Self::Error> {
        Self::new(segments)
    }
}

impl From<CacheKey> for Vec<Segment> {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, segment) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Typed keys
// ============================================================================

/// Generic REST result key: `(resource, operation, instance id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceKey {
    pub resource: Segment,
    pub operation: Segment,
    pub id: Segment,
}

impl ResourceKey {
    pub fn new(
        resource: impl Into<Segment>,
        operation: impl Into<Segment>,
        id: impl Into<Segment>,
    ) -> Self {
        Self {
            resource: resource.into(),
            operation: operation.into(),
            id: id.into(),
        }
    }

    /// The `(resource, "list", "0")` key list screens read by default.
    pub fn list(resource: impl Into<Segment>) -> Self {
        Self::new(resource, LIST_OPERATION, DEFAULT_INSTANCE_ID)
    }
}

impl TryFrom<CacheKey> for ResourceKey {
    type Error = KeyError;

    fn try_from(key: CacheKey) -> Result<Self, Self::Error> {
        let mut segments = key.expect_arity(3)?.into_iter();
        match (segments.next(), segments.next(), segments.next()) {
            (Some(resource), Some(operation), Some(id)) => Ok(Self {
                resource,
                operation,
                id,
            }),
            _ => Err(KeyError::Arity {
                expected: 3,
                found: 0,
            }),
        }
    }
}

impl From<ResourceKey> for CacheKey {
    fn from(key: ResourceKey) -> Self {
        Self(vec![key.resource, key.operation, key.id])
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.resource, self.operation, self.id)
    }
}

/// Workspace key: `(operation, instance id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WorkspaceKey {
    pub operation: Segment,
    pub id: Segment,
}

impl WorkspaceKey {
    pub fn new(operation: impl Into<Segment>, id: impl Into<Segment>) -> Self {
        Self {
            operation: operation.into(),
            id: id.into(),
        }
    }
}

impl TryFrom<CacheKey> for WorkspaceKey {
    type Error = KeyError;

    fn try_from(key: CacheKey) -> Result<Self, Self::Error> {
        let mut segments = key.expect_arity(2)?.into_iter();
        match (segments.next(), segments.next()) {
            (Some(operation), Some(id)) => Ok(Self { operation, id }),
            _ => Err(KeyError::Arity {
                expected: 2,
                found: 0,
            }),
        }
    }
}

impl From<WorkspaceKey> for CacheKey {
    fn from(key: WorkspaceKey) -> Self {
        Self(vec![key.operation, key.id])
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.operation, self.id)
    }
}

/// Identity of one externally defined entity (e.g. an integration).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntityId(pub Segment);

impl EntityId {
    pub fn new(id: impl Into<Segment>) -> Self {
        Self(id.into())
    }
}

impl TryFrom<CacheKey> for EntityId {
    type Error = KeyError;

    fn try_from(key: CacheKey) -> Result<Self, Self::Error> {
        key.expect_arity(1)?
            .pop()
            .map(Self)
            .ok_or(KeyError::Empty)
    }
}

impl From<EntityId> for CacheKey {
    fn from(id: EntityId) -> Self {
        Self(vec![id.0])
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one dashboard widget.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WidgetId(pub Segment);

impl WidgetId {
    pub fn new(id: impl Into<Segment>) -> Self {
        Self(id.into())
    }
}

impl TryFrom<CacheKey> for WidgetId {
    type Error = KeyError;

    fn try_from(key: CacheKey) -> Result<Self, Self::Error> {
        key.expect_arity(1)?
            .pop()
            .map(Self)
            .ok_or(KeyError::Empty)
    }
}

impl From<WidgetId> for CacheKey {
    fn from(id: WidgetId) -> Self {
        Self(vec![id.0])
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
