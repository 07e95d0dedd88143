//! Per-widget value caches.
//!
//! Widgets hold a single value with no expiry: `Idle`, then `Loading`, then
//! `Loaded` or `Failed`. A terminal state only changes when the next request
//! starts.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::entry::{ErrorValue, Payload};
use crate::cache::events::{CacheEvent, EventKind, MalformedEvent, RawEvent};
use crate::cache::keys::WidgetId;
use crate::cache::store::{Applied, record_ignored, record_size, record_transition};

/// State of one widget.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum WidgetState<V> {
    Idle,
    Loading,
    Loaded(V),
    Failed(ErrorValue),
}

impl<V> Default for WidgetState<V> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<V> WidgetState<V> {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WidgetEvent<V> {
    Started,
    Succeeded(V),
    Failed(ErrorValue),
}

impl<V> WidgetEvent<V> {
    fn kind(&self) -> EventKind {
        match self {
            Self::Started => EventKind::RequestStarted,
            Self::Succeeded(_) => EventKind::RequestSucceeded,
            Self::Failed(_) => EventKind::RequestFailed,
        }
    }
}

/// Next state, or `None` when the event does not apply to `current`.
pub fn transition<V>(current: &WidgetState<V>, event: WidgetEvent<V>) -> Option<WidgetState<V>> {
    match (current, event) {
        (_, WidgetEvent::Started) => Some(WidgetState::Loading),
        (WidgetState::Loading, WidgetEvent::Succeeded(value)) => Some(WidgetState::Loaded(value)),
        (WidgetState::Loading, WidgetEvent::Failed(error)) => Some(WidgetState::Failed(error)),
        _ => None,
    }
}

pub const VALUE_CACHE_NAME: &str = "widget_value";
pub const GRAPH_CACHE_NAME: &str = "widget_graph";

pub struct WidgetCache<V> {
    name: Arc<str>,
    widgets: DashMap<WidgetId, WidgetState<V>>,
}

/// Scalar widget values.
pub type WidgetValueCache = WidgetCache<Payload>;

/// Widget graph series.
pub type WidgetGraphCache = WidgetCache<Payload>;

impl<V> WidgetCache<V>
where
    V: Clone + DeserializeOwned,
{
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            widgets: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply(&self, id: WidgetId, event: WidgetEvent<V>) -> Applied<WidgetState<V>> {
        let kind = event.kind();
        let applied = match self.widgets.entry(id.clone()) {
            Entry::Occupied(mut occupied) => match transition(occupied.get(), event) {
                Some(next) => {
                    occupied.insert(next.clone());
                    Applied::Updated(next)
                }
                None => Applied::Unchanged,
            },
            Entry::Vacant(vacant) => match transition(&WidgetState::Idle, event) {
                Some(next) => {
                    vacant.insert(next.clone());
                    Applied::Updated(next)
                }
                None => Applied::Unchanged,
            },
        };

        record_transition(&self.name, kind, &id, applied.outcome());
        record_size(&self.name, self.widgets.len());
        applied
    }

    /// Apply a wire event; only the request lifecycle is understood.
    pub fn apply_raw(&self, raw: RawEvent) -> Applied<WidgetState<V>> {
        match self.parse(raw) {
            Ok((id, event)) => self.apply(id, event),
            Err(reason) => {
                record_ignored(&self.name, &reason);
                Applied::Ignored(reason)
            }
        }
    }

    fn parse(&self, raw: RawEvent) -> Result<(WidgetId, WidgetEvent<V>), MalformedEvent> {
        match raw.into_event::<WidgetId>()? {
            CacheEvent::RequestStarted { key } => Ok((key, WidgetEvent::Started)),
            CacheEvent::RequestSucceeded { key, data, .. } => {
                let value = serde_json::from_value(data).map_err(|err| {
                    MalformedEvent::InvalidPayload {
                        field: "data",
                        reason: err.to_string(),
                    }
                })?;
                Ok((key, WidgetEvent::Succeeded(value)))
            }
            CacheEvent::RequestFailed { key, error, .. } => Ok((key, WidgetEvent::Failed(error))),
            other => Err(MalformedEvent::Unsupported {
                kind: other.kind().to_string(),
                store: self.name.to_string(),
            }),
        }
    }

    /// Current state; a widget never requested is `Idle`.
    pub fn get(&self, id: &WidgetId) -> WidgetState<V> {
        self.widgets
            .get(id)
            .map(|state| state.value().clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }

    /// Every widget state, ordered by id.
    pub fn snapshot(&self) -> Vec<KeyedWidget<V>> {
        let mut widgets: Vec<_> = self
            .widgets
            .iter()
            .map(|entry| KeyedWidget {
                id: entry.key().clone(),
                state: entry.value().clone(),
            })
            .collect();
        widgets.sort_by(|a, b| a.id.cmp(&b.id));
        widgets
    }
}

impl<V> fmt::Debug for WidgetCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WidgetCache")
            .field("name", &self.name)
            .field("widget_count", &self.widgets.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyedWidget<V> {
    pub id: WidgetId,
    #[serde(flatten)]
    pub state: WidgetState<V>,
}
