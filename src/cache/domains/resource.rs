//! Generic REST result cache keyed by `(resource, operation, id)`.

use std::sync::Arc;

use serde_json::Value;

use crate::cache::clock::Clock;
use crate::cache::config::CacheConfig;
use crate::cache::entry::{CacheEntry, EntryView};
use crate::cache::events::{CacheEvent, RawEvent};
use crate::cache::keys::ResourceKey;
use crate::cache::merge;
use crate::cache::store::{Applied, CacheStore, KeyedEntry};

pub struct ResourceCache {
    store: CacheStore<ResourceKey>,
}

impl ResourceCache {
    pub const NAME: &'static str = "resource";

    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: CacheStore::new(Self::NAME, config, clock),
        }
    }

    pub fn apply(&self, event: CacheEvent<ResourceKey>) -> Applied {
        self.store.apply(event)
    }

    pub fn apply_raw(&self, raw: RawEvent) -> Applied {
        self.store.apply_raw(raw)
    }

    pub fn get(&self, key: &ResourceKey) -> Option<Arc<CacheEntry>> {
        self.store.get(key)
    }

    pub fn view(&self, key: &ResourceKey) -> EntryView {
        self.store.view(key)
    }

    /// Records of a paginated entry; empty when the key holds no list.
    pub fn records(&self, key: &ResourceKey) -> Vec<Value> {
        self.store
            .get(key)
            .and_then(|entry| entry.data.as_ref().map(|data| merge::records(data).to_vec()))
            .unwrap_or_default()
    }

    pub fn store(&self) -> &CacheStore<ResourceKey> {
        &self.store
    }

    pub fn snapshot(&self) -> Vec<KeyedEntry<ResourceKey>> {
        self.store.snapshot()
    }
}

impl std::fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCache")
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
    use crate::cache::events::EventKind;

    fn cache() -> ResourceCache {
        ResourceCache::new(
            CacheConfig::default(),
            Arc::new(ManualClock::new(datetime!(2024-05-01 12:00 UTC))),
        )
    }

    #[test]
    fn list_screens_read_pending_before_first_request() {
        let cache = cache();
        assert_eq!(cache.view(&ResourceKey::list("tickets")), EntryView::pending());
        assert!(cache.records(&ResourceKey::list("tickets")).is_empty());
    }

    #[test]
    fn pages_accumulate_under_one_key() {
        let cache = cache();
        let key = ResourceKey::list("tickets");

        cache.apply(CacheEvent::succeeded(
            key.clone(),
            json!({"records": [{"id": 1}, {"id": 2}], "_metadata": {"page": 0}}),
        ));
        cache.apply(CacheEvent::appended(
            key.clone(),
            json!({"records": [{"id": 2}, {"id": 3}], "_metadata": {"page": 1}}),
            Some("id"),
        ));

        let ids: Vec<_> = cache.records(&key).iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
        let entry = cache.get(&key).expect("entry");
        assert_eq!(entry.data.as_ref().expect("data")["_metadata"]["page"], json!(1));
    }

    #[test]
    fn raw_events_need_three_segment_keys() {
        let cache = cache();
        let short = RawEvent::new(EventKind::RequestStarted, vec!["tickets".into()]);
        assert!(cache.apply_raw(short).is_ignored());

        let full = RawEvent::new(
            EventKind::RequestStarted,
            vec!["tickets".into(), "get".into(), 42.into()],
        );
        assert!(cache.apply_raw(full).entry().is_some());
        assert!(cache.get(&ResourceKey::new("tickets", "get", 42)).is_some());
        assert!(cache.get(&ResourceKey::new("tickets", "get", "42")).is_none());
    }
}
