//! Entity cache for integrations, with a store-wide "all loaded" marker.
//!
//! Individual integrations are cached per id like any TTL entry. Loading the
//! full list stores every record under its own id and raises the marker, so
//! list screens can skip the request until the marker is invalidated.

use std::sync::{Arc, RwLock};

use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::debug;

use crate::cache::clock::Clock;
use crate::cache::config::CacheConfig;
use crate::cache::entry::{CacheEntry, EntryView};
use crate::cache::events::{CacheEvent, EventKind, MalformedEvent, RawEvent};
use crate::cache::keys::{EntityId, Segment};
use crate::cache::lock::{rw_read, rw_write};
use crate::cache::merge;
use crate::cache::store::{Applied, CacheStore, KeyedEntry, record_transition};

const SOURCE: &str = "cache::domains::integration";

/// Flag name that resets the "all loaded" marker.
pub const ALL_LOADED_FLAG: &str = "all_loaded";

/// Wire `type` of the bulk-load event.
pub const ALL_LOADED_EVENT: &str = "all_loaded";

/// Field of each record holding its entity id.
pub const ENTITY_ID_FIELD: &str = "id";

pub struct IntegrationCache {
    store: CacheStore<EntityId>,
    all_loaded_at: RwLock<Option<OffsetDateTime>>,
}

impl IntegrationCache {
    pub const NAME: &'static str = "integration";

    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: CacheStore::new(Self::NAME, config, clock),
            all_loaded_at: RwLock::new(None),
        }
    }

    /// Apply a per-entity event.
    ///
    /// The `all_loaded` flag belongs to the store-wide marker: invalidating
    /// it resets the marker and leaves every entity entry untouched, while
    /// setting it is rejected because only a bulk load may raise the marker.
    pub fn apply(&self, event: CacheEvent<EntityId>) -> Applied {
        let targets_marker = matches!(
            &event,
            CacheEvent::FlagInvalidated { flag, .. } | CacheEvent::FlagSet { flag, .. }
                if flag == ALL_LOADED_FLAG
        );
        if !targets_marker {
            return self.store.apply(event);
        }

        if event.kind() == EventKind::FlagSet {
            return self.store.ignore(MalformedEvent::Unsupported {
                kind: format!("{}:{ALL_LOADED_FLAG}", event.kind()),
                store: Self::NAME.to_string(),
            });
        }

        let applied = match rw_write(&self.all_loaded_at, SOURCE, "reset").take() {
            Some(_) => Applied::Removed,
            None => Applied::Unchanged,
        };
        record_transition(Self::NAME, event.kind(), event.key(), applied.outcome());
        applied
    }

    pub fn apply_raw(&self, raw: RawEvent) -> Applied {
        if raw.kind.as_deref() == Some(ALL_LOADED_EVENT) {
            return match all_loaded_records(raw) {
                Ok((records, expires_in_seconds)) => {
                    self.all_loaded(records, expires_in_seconds);
                    Applied::Unchanged
                }
                Err(reason) => self.store.ignore(reason),
            };
        }

        match raw.into_event() {
            Ok(event) => self.apply(event),
            Err(reason) => self.store.ignore(reason),
        }
    }

    /// Store every record under its id and raise the marker.
    ///
    /// Records without a string or integer `id` are skipped. Returns how many
    /// entities were stored.
    pub fn all_loaded(&self, records: Vec<Value>, expires_in_seconds: Option<u64>) -> usize {
        let mut stored = 0;
        for record in records {
            let Some(id) = entity_id(&record) else {
                debug!(store = Self::NAME, "Skipping integration record without id");
                continue;
            };
            let mut event = CacheEvent::succeeded(id, record);
            if let Some(seconds) = expires_in_seconds {
                event = event.with_expiry(seconds);
            }
            if self.store.apply(event).entry().is_some() {
                stored += 1;
            }
        }

        *rw_write(&self.all_loaded_at, SOURCE, "set") = Some(self.store.now());
        debug!(store = Self::NAME, stored, "All integrations loaded");
        stored
    }

    pub fn is_all_loaded(&self) -> bool {
        rw_read(&self.all_loaded_at, SOURCE, "read").is_some()
    }

    pub fn all_loaded_at(&self) -> Option<OffsetDateTime> {
        *rw_read(&self.all_loaded_at, SOURCE, "read")
    }

    pub fn get(&self, id: &EntityId) -> Option<Arc<CacheEntry>> {
        self.store.get(id)
    }

    pub fn view(&self, id: &EntityId) -> EntryView {
        self.store.view(id)
    }

    /// Remove one entity; the marker and the other entities stay.
    pub fn clear(&self, id: EntityId) -> Applied {
        self.store.apply(CacheEvent::EntryCleared { key: id })
    }

    pub fn store(&self) -> &CacheStore<EntityId> {
        &self.store
    }

    pub fn snapshot(&self) -> IntegrationSnapshot {
        IntegrationSnapshot {
            all_loaded_at: self.all_loaded_at(),
            entities: self.store.snapshot(),
        }
    }
}

impl std::fmt::Debug for IntegrationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationCache")
            .field("store", &self.store)
            .field("all_loaded", &self.is_all_loaded())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationSnapshot {
    #[serde(with = "time::serde::rfc3339::option")]
    pub all_loaded_at: Option<OffsetDateTime>,
    pub entities: Vec<KeyedEntry<EntityId>>,
}

fn entity_id(record: &Value) -> Option<EntityId> {
    match record.get(ENTITY_ID_FIELD)? {
        Value::String(id) => Some(EntityId::new(id.as_str())),
        Value::Number(id) => id.as_i64().map(|id| EntityId(Segment::Num(id))),
        _ => None,
    }
}

fn all_loaded_records(raw: RawEvent) -> Result<(Vec<Value>, Option<u64>), MalformedEvent> {
    match raw.data {
        Some(Value::Null) | None => Err(MalformedEvent::InvalidPayload {
            field: "data",
            reason: "all_loaded requires a record list".to_string(),
        }),
        Some(Value::Array(records)) => Ok((records, raw.expires_in_seconds)),
        Some(data @ Value::Object(_)) => {
            Ok((merge::records(&data).to_vec(), raw.expires_in_seconds))
        }
        Some(other) => Err(MalformedEvent::InvalidPayload {
            field: "data",
            reason: format!("expected a record list, found `{other}`"),
        }),
    }
}
