//! Workspace cache keyed by `(operation, id)`.

use std::sync::Arc;

use crate::cache::clock::Clock;
use crate::cache::config::CacheConfig;
use crate::cache::entry::{CacheEntry, EntryView};
use crate::cache::events::{CacheEvent, EventKind, RawEvent};
use crate::cache::keys::{Segment, WorkspaceKey};
use crate::cache::store::{Applied, CacheStore, KeyedEntry, record_transition};

pub struct WorkspaceCache {
    store: CacheStore<WorkspaceKey>,
}

impl WorkspaceCache {
    pub const NAME: &'static str = "workspace";

    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: CacheStore::new(Self::NAME, config, clock),
        }
    }

    pub fn apply(&self, event: CacheEvent<WorkspaceKey>) -> Applied {
        self.store.apply(event)
    }

    /// Apply a wire event. An `entry_cleared` whose key names only an
    /// operation clears every id under it.
    pub fn apply_raw(&self, raw: RawEvent) -> Applied {
        if let (Ok(EventKind::EntryCleared), Ok(key)) = (raw.event_kind(), raw.cache_key())
            && let [operation] = key.segments()
        {
            let operation = operation.clone();
            let applied = match self.clear_operation(operation.clone()) {
                0 => Applied::Unchanged,
                _ => Applied::Removed,
            };
            record_transition(
                Self::NAME,
                EventKind::EntryCleared,
                &operation,
                applied.outcome(),
            );
            return applied;
        }
        self.store.apply_raw(raw)
    }

    pub fn clear(&self, operation: impl Into<Segment>, id: impl Into<Segment>) -> Applied {
        self.store.apply(CacheEvent::EntryCleared {
            key: WorkspaceKey::new(operation, id),
        })
    }

    /// Remove every id cached under `operation`.
    pub fn clear_operation(&self, operation: impl Into<Segment>) -> usize {
        let operation = operation.into();
        self.store.remove_where(|key, _| key.operation == operation)
    }

    pub fn get(&self, key: &WorkspaceKey) -> Option<Arc<CacheEntry>> {
        self.store.get(key)
    }

    pub fn view(&self, key: &WorkspaceKey) -> EntryView {
        self.store.view(key)
    }

    pub fn store(&self) -> &CacheStore<WorkspaceKey> {
        &self.store
    }

    pub fn snapshot(&self) -> Vec<KeyedEntry<WorkspaceKey>> {
        self.store.snapshot()
    }
}

impl std::fmt::Debug for WorkspaceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceCache")
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::cache::clock::ManualClock;

    fn cache() -> WorkspaceCache {
        WorkspaceCache::new(
            CacheConfig::default(),
            Arc::new(ManualClock::new(datetime!(2024-05-01 12:00 UTC))),
        )
    }

    fn seed(cache: &WorkspaceCache) {
        for (operation, id) in [("get", "w1"), ("get", "w2"), ("list", "0")] {
            cache.apply(CacheEvent::succeeded(
                WorkspaceKey::new(operation, id),
                json!({"id": id}),
            ));
        }
    }

    #[test]
    fn clear_removes_one_workspace() {
        let cache = cache();
        seed(&cache);

        assert_eq!(cache.clear("get", "w1"), Applied::Removed);
        assert_eq!(cache.clear("get", "w1"), Applied::Unchanged);
        assert!(cache.get(&WorkspaceKey::new("get", "w2")).is_some());
    }

    #[test]
    fn clear_operation_removes_every_id_under_it() {
        let cache = cache();
        seed(&cache);

        assert_eq!(cache.clear_operation("get"), 2);
        assert_eq!(cache.store().keys(), vec![WorkspaceKey::new("list", "0")]);
    }

    #[test]
    fn one_segment_clear_on_the_wire_clears_the_operation() {
        let cache = cache();
        seed(&cache);

        let applied = cache.apply_raw(RawEvent::new(EventKind::EntryCleared, vec!["get".into()]));
        assert_eq!(applied, Applied::Removed);
        assert_eq!(cache.store().len(), 1);

        let other = RawEvent::new(EventKind::RequestStarted, vec!["get".into()]);
        assert!(cache.apply_raw(other).is_ignored());
    }

    #[test]
    fn numeric_and_textual_operations_are_separate() {
        let cache = cache();
        for operation in [Segment::from(7), Segment::from("7")] {
            cache.apply_raw(RawEvent {
                data: Some(json!({"id": "w1"})),
                ..RawEvent::new(EventKind::RequestSucceeded, vec![operation, "w1".into()])
            });
        }
        assert_eq!(cache.store().len(), 2);

        let applied = cache.apply_raw(RawEvent::new(EventKind::EntryCleared, vec![7.into()]));
        assert_eq!(applied, Applied::Removed);
        assert_eq!(cache.store().keys(), vec![WorkspaceKey::new("7", "w1")]);
    }
}
