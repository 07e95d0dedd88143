//! Keyed TTL store and the transition function it applies.
//!
//! [`reduce`] maps `(current entry, event)` to the next entry without touching
//! any shared state. [`CacheStore`] owns the per-key entries and swaps in the
//! value `reduce` produced, one key at a time.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, gauge};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use super::clock::Clock;
use super::config::CacheConfig;
use super::entry::{CacheEntry, EntryView, Payload};
use super::events::{CacheEvent, Epoch, EventKind, MalformedEvent, RawEvent};
use super::invalidation::{self, Invalidation};
use super::keys::{CacheKey, KeyError};
use super::merge;

pub const METRIC_TRANSITION_TOTAL: &str = "dashcache_cache_transition_total";
pub const METRIC_EVENT_IGNORED_TOTAL: &str = "dashcache_cache_event_ignored_total";
pub const METRIC_ENTRIES: &str = "dashcache_cache_entries";

// ============================================================================
// Transition function
// ============================================================================

/// Everything a transition may depend on besides the entry and the event.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub now: OffsetDateTime,
    pub default_expires_in_seconds: u64,
    pub fencing: bool,
    /// Epoch stamped by `RequestStarted`.
    pub next_epoch: Epoch,
}

/// What a single event does to the entry of its key.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Replace(CacheEntry),
    Remove,
    Keep,
    /// A fenced terminal event answered a superseded request.
    Stale,
}

pub fn reduce<K>(current: Option<&CacheEntry>, event: &CacheEvent<K>, ctx: &Context) -> Transition {
    if is_fenced_out(current, event, ctx) {
        return Transition::Stale;
    }

    let base = || current.cloned().unwrap_or_default();

    match event {
        CacheEvent::RequestStarted { .. } => Transition::Replace(CacheEntry {
            loading: true,
            error: None,
            pending_epoch: Some(ctx.next_epoch),
            ..base()
        }),
        CacheEvent::RequestSucceeded {
            data,
            expires_in_seconds,
            ..
        } => Transition::Replace(loaded(base(), data.clone(), *expires_in_seconds, ctx)),
        CacheEvent::RequestAppended {
            incoming,
            dedup_key,
            expires_in_seconds,
            ..
        } => {
            let merged = merge::append(
                current.and_then(|entry| entry.data.as_ref()),
                incoming.clone(),
                dedup_key.as_deref(),
            );
            Transition::Replace(loaded(base(), merged, *expires_in_seconds, ctx))
        }
        CacheEvent::RequestFailed { error, .. } => Transition::Replace(CacheEntry {
            loading: false,
            error: error.is_present().then(|| error.clone()),
            ..base()
        }),
        CacheEvent::EntryCleared { .. } => match current {
            Some(_) => Transition::Remove,
            None => Transition::Keep,
        },
        CacheEvent::EntryInvalidated { .. } => match current {
            Some(entry) => match invalidation::strict(entry, ctx.now) {
                Invalidation::Evict => Transition::Remove,
                Invalidation::Retain => Transition::Keep,
            },
            None => Transition::Keep,
        },
        CacheEvent::FlagInvalidated { flag, .. } => match current {
            Some(entry) if entry.has_flag(flag) => {
                Transition::Replace(invalidation::reset_flag(entry, flag))
            }
            _ => Transition::Keep,
        },
        CacheEvent::FlagSet { flag, .. } => match current {
            Some(entry) if entry.has_flag(flag) => Transition::Keep,
            _ => {
                let entry = base();
                Transition::Replace(CacheEntry {
                    flags: entry.flags.clone().with(flag),
                    ..entry
                })
            }
        },
    }
}

fn loaded(
    base: CacheEntry,
    data: Payload,
    expires_in_seconds: Option<u64>,
    ctx: &Context,
) -> CacheEntry {
    CacheEntry {
        data: Some(data),
        loading: false,
        error: None,
        cached_at: Some(ctx.now),
        expires_in_seconds: expires_in_seconds.unwrap_or(ctx.default_expires_in_seconds),
        ..base
    }
}

fn is_fenced_out<K>(current: Option<&CacheEntry>, event: &CacheEvent<K>, ctx: &Context) -> bool {
    if !ctx.fencing {
        return false;
    }
    match (event.epoch(), current.and_then(CacheEntry::pending_epoch)) {
        (Some(answered), Some(pending)) => answered != pending,
        _ => false,
    }
}

// ============================================================================
// Store
// ============================================================================

/// Result of applying one event to a store.
///
/// `T` is what the store publishes per key; TTL stores publish entries.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied<T = Arc<CacheEntry>> {
    Updated(T),
    Removed,
    Unchanged,
    Stale,
    Ignored(MalformedEvent),
}

impl<T> Applied<T> {
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Updated(_) => Outcome::Updated,
            Self::Removed => Outcome::Removed,
            Self::Unchanged => Outcome::Unchanged,
            Self::Stale => Outcome::Stale,
            Self::Ignored(_) => Outcome::Ignored,
        }
    }

    pub fn entry(&self) -> Option<&T> {
        match self {
            Self::Updated(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored(_))
    }
}

/// Payload-free summary of an [`Applied`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Updated,
    Removed,
    Unchanged,
    Stale,
    Ignored,
}

impl Outcome {
    /// Stable label for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::Unchanged => "unchanged",
            Self::Stale => "stale",
            Self::Ignored => "ignored",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One key and its entry, as listed in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyedEntry<K> {
    pub key: K,
    #[serde(flatten)]
    pub entry: CacheEntry,
}

/// Log and count a transition.
pub(crate) fn record_transition(
    store: &str,
    event: EventKind,
    key: &dyn fmt::Display,
    outcome: Outcome,
) {
    debug!(
        store,
        event = %event,
        key = %key,
        outcome = outcome.as_str(),
        "Cache transition applied"
    );
    counter!(
        METRIC_TRANSITION_TOTAL,
        "store" => store.to_string(),
        "event" => event.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Publish the number of live keys of a store.
pub(crate) fn record_size(store: &str, len: usize) {
    gauge!(METRIC_ENTRIES, "store" => store.to_string()).set(len as f64);
}

/// Log and count an event absorbed as a no-op.
pub(crate) fn record_ignored(store: &str, reason: &MalformedEvent) {
    debug!(store, reason = %reason, "Malformed cache event ignored");
    counter!(
        METRIC_EVENT_IGNORED_TOTAL,
        "store" => store.to_string(),
        "reason" => reason.reason()
    )
    .increment(1);
}

/// Keyed cache with a request-lifecycle state machine and expiry.
///
/// Entries are immutable `Arc` snapshots; each transition swaps in a new one,
/// so a reader holding an entry never sees a partial write and can detect
/// change with `Arc::ptr_eq`. Keys live in a sharded map, so events for
/// different keys do not contend.
pub struct CacheStore<K>
where
    K: Eq + Hash,
{
    name: Arc<str>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: DashMap<K, Arc<CacheEntry>>,
    epochs: AtomicU64,
}

impl<K> CacheStore<K>
where
    K: Eq + Hash + Clone + fmt::Display,
{
    pub fn new(name: impl Into<Arc<str>>, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            entries: DashMap::new(),
            epochs: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn now(&self) -> OffsetDateTime {
        self.clock.now()
    }

    /// Apply one lifecycle event to the entry of its key.
    pub fn apply(&self, event: CacheEvent<K>) -> Applied {
        let kind = event.kind();
        let key = event.key().clone();
        let ctx = Context {
            now: self.clock.now(),
            default_expires_in_seconds: self.config.default_expires_in_seconds,
            fencing: self.config.fencing,
            next_epoch: match event {
                CacheEvent::RequestStarted { .. } => {
                    self.epochs.fetch_add(1, Ordering::SeqCst) + 1
                }
                _ => 0,
            },
        };

        let applied = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                match reduce(Some(occupied.get().as_ref()), &event, &ctx) {
                    Transition::Replace(entry) => {
                        let entry = Arc::new(entry);
                        occupied.insert(Arc::clone(&entry));
                        Applied::Updated(entry)
                    }
                    Transition::Remove => {
                        occupied.remove();
                        Applied::Removed
                    }
                    Transition::Keep => Applied::Unchanged,
                    Transition::Stale => Applied::Stale,
                }
            }
            Entry::Vacant(vacant) => match reduce(None, &event, &ctx) {
                Transition::Replace(entry) => {
                    let entry = Arc::new(entry);
                    vacant.insert(Arc::clone(&entry));
                    Applied::Updated(entry)
                }
                Transition::Remove | Transition::Keep => Applied::Unchanged,
                Transition::Stale => Applied::Stale,
            },
        };

        record_transition(&self.name, kind, &key, applied.outcome());
        self.report_size();

        applied
    }

    /// Apply a wire event; malformed events leave the store untouched.
    pub fn apply_raw(&self, raw: RawEvent) -> Applied
    where
        K: TryFrom<CacheKey, Error = KeyError>,
    {
        match raw.into_event() {
            Ok(event) => self.apply(event),
            Err(reason) => self.ignore(reason),
        }
    }

    pub(crate) fn ignore(&self, reason: MalformedEvent) -> Applied {
        record_ignored(&self.name, &reason);
        Applied::Ignored(reason)
    }

    /// Mark a request as started and return the epoch that fences its answer.
    pub fn begin(&self, key: K) -> Epoch {
        match self.apply(CacheEvent::RequestStarted { key }) {
            Applied::Updated(entry) => entry.pending_epoch().unwrap_or_default(),
            _ => 0,
        }
    }

    pub fn get(&self, key: &K) -> Option<Arc<CacheEntry>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// The `(data, loading, error)` triple; a never-populated key reads as pending.
    pub fn view(&self, key: &K) -> EntryView {
        self.get(key)
            .map(|entry| entry.view())
            .unwrap_or_else(EntryView::pending)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Point-in-time copy of every entry.
    pub fn entries(&self) -> Vec<(K, Arc<CacheEntry>)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect()
    }

    /// Remove every entry matching `predicate`, returning how many went.
    pub fn remove_where(&self, mut predicate: impl FnMut(&K, &CacheEntry) -> bool) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            if predicate(key, entry) {
                removed += 1;
                false
            } else {
                true
            }
        });
        if removed > 0 {
            debug!(store = %self.name, removed, "Cache entries removed");
            self.report_size();
        }
        removed
    }

    /// Strictly invalidate every expired entry.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.remove_where(|_, entry| invalidation::is_expired(entry, now))
    }

    pub fn clear_all(&self) -> usize {
        self.remove_where(|_, _| true)
    }

    /// Every entry, ordered by key.
    pub fn snapshot(&self) -> Vec<KeyedEntry<K>>
    where
        K: Ord,
    {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|entry| KeyedEntry {
                key: entry.key().clone(),
                entry: CacheEntry::clone(entry.value()),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    fn report_size(&self) {
        record_size(&self.name, self.entries.len());
    }
}

impl<K> fmt::Debug for CacheStore<K>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("entry_count", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use time::Duration;
    use time::macros::datetime;

    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::entry::{DEFAULT_EXPIRES_IN_SECS, ErrorValue};

    fn ctx() -> Context {
        Context {
            now: datetime!(2024-03-01 9:00 UTC),
            default_expires_in_seconds: DEFAULT_EXPIRES_IN_SECS,
            fencing: true,
            next_epoch: 1,
        }
    }

    fn replaced(transition: Transition) -> CacheEntry {
        match transition {
            Transition::Replace(entry) => entry,
            other => panic!("expected a replacement, got {other:?}"),
        }
    }

    fn store(clock: Arc<ManualClock>) -> CacheStore<&'static str> {
        CacheStore::new("test", CacheConfig::default(), clock)
    }

    #[test]
    fn started_creates_loading_entry_and_clears_error() {
        let failed = CacheEntry {
            error: Some(ErrorValue::message("boom")),
            data: Some(json!({"kept": true})),
            ..Default::default()
        };
        let entry = replaced(reduce(
            Some(&failed),
            &CacheEvent::RequestStarted { key: () },
            &ctx(),
        ));
        assert!(entry.loading);
        assert!(entry.error.is_none());
        assert_eq!(entry.data, Some(json!({"kept": true})));
        assert_eq!(entry.pending_epoch(), Some(1));

        let fresh = replaced(reduce(None, &CacheEvent::RequestStarted { key: () }, &ctx()));
        assert!(fresh.loading);
        assert!(fresh.cached_at.is_none());
    }

    #[test]
    fn succeeded_applies_default_expiry() {
        let entry = replaced(reduce(
            None,
            &CacheEvent::succeeded((), json!({"id": 1})),
            &ctx(),
        ));
        assert_eq!(entry.expires_in_seconds, 3600);
        assert_eq!(entry.cached_at, Some(ctx().now));
        assert!(!entry.loading);
        assert!(entry.error.is_none());
    }

    #[test]
    fn failure_always_ends_loading() {
        let loading = replaced(reduce(None, &CacheEvent::RequestStarted { key: () }, &ctx()));

        let failed = replaced(reduce(
            Some(&loading),
            &CacheEvent::failed((), ErrorValue::message("timeout")),
            &ctx(),
        ));
        assert!(!failed.loading);
        assert_eq!(failed.error, Some(ErrorValue::message("timeout")));
        assert!(failed.cached_at.is_none());

        let cleared = replaced(reduce(
            Some(&failed),
            &CacheEvent::failed((), ErrorValue::new(Value::Null)),
            &ctx(),
        ));
        assert!(!cleared.loading);
        assert!(cleared.error.is_none());
    }

    #[test]
    fn clear_and_invalidate_on_absent_entry_keep() {
        assert_eq!(
            reduce(None, &CacheEvent::EntryCleared { key: () }, &ctx()),
            Transition::Keep
        );
        assert_eq!(
            reduce(None, &CacheEvent::EntryInvalidated { key: () }, &ctx()),
            Transition::Keep
        );
        assert_eq!(
            reduce(
                None,
                &CacheEvent::FlagInvalidated {
                    key: (),
                    flag: "all_loaded".into()
                },
                &ctx()
            ),
            Transition::Keep
        );
    }

    #[test]
    fn fenced_answer_to_superseded_request_is_stale() {
        let entry = CacheEntry {
            loading: true,
            pending_epoch: Some(2),
            ..Default::default()
        };
        let late = CacheEvent::succeeded((), json!("old")).with_epoch(1);
        assert_eq!(reduce(Some(&entry), &late, &ctx()), Transition::Stale);

        let unfenced = Context {
            fencing: false,
            ..ctx()
        };
        assert!(matches!(
            reduce(Some(&entry), &late, &unfenced),
            Transition::Replace(_)
        ));

        let current = CacheEvent::succeeded((), json!("new")).with_epoch(2);
        assert!(matches!(
            reduce(Some(&entry), &current, &ctx()),
            Transition::Replace(_)
        ));
    }

    #[test]
    fn store_lifecycle_and_identity() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-03-01 9:00 UTC)));
        let store = store(clock.clone());

        let epoch = store.begin("a");
        assert_eq!(epoch, 1);
        let loading = store.get(&"a").expect("entry created");
        assert!(loading.loading);

        let done = store.apply(CacheEvent::succeeded("a", json!({"n": 1})).with_epoch(epoch));
        let done = done.entry().cloned().expect("updated");
        assert!(!Arc::ptr_eq(&loading, &done));
        assert!(loading.loading, "old snapshot is never mutated");

        assert_eq!(
            store.apply(CacheEvent::EntryInvalidated { key: "a" }),
            Applied::Unchanged
        );
        let retained = store.get(&"a").expect("still cached");
        assert!(Arc::ptr_eq(&retained, &done));

        clock.advance(Duration::seconds(3601));
        assert_eq!(
            store.apply(CacheEvent::EntryInvalidated { key: "a" }),
            Applied::Removed
        );
        assert!(store.get(&"a").is_none());
    }

    #[test]
    fn epochs_increase_per_started_request() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-03-01 9:00 UTC)));
        let store = store(clock);

        let first = store.begin("a");
        let second = store.begin("a");
        let other = store.begin("b");
        assert!(first < second && second < other);

        assert_eq!(
            store.apply(CacheEvent::succeeded("a", json!(1)).with_epoch(first)),
            Applied::Stale
        );
        assert!(store.get(&"a").expect("entry").loading);
    }

    #[test]
    fn apply_raw_ignores_malformed_events() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-03-01 9:00 UTC)));
        let store: CacheStore<crate::cache::keys::EntityId> =
            CacheStore::new("entities", CacheConfig::default(), clock);

        let applied = store.apply_raw(RawEvent::default());
        assert_eq!(applied, Applied::Ignored(MalformedEvent::MissingKind));
        assert!(store.is_empty());

        let wrong_arity = RawEvent::new(EventKind::RequestStarted, vec!["a".into(), "b".into()]);
        assert!(store.apply_raw(wrong_arity).is_ignored());
        assert!(store.is_empty());

        let started = RawEvent::new(EventKind::RequestStarted, vec!["a".into()]);
        assert!(matches!(store.apply_raw(started), Applied::Updated(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-03-01 9:00 UTC)));
        let store = store(clock.clone());

        store.apply(CacheEvent::succeeded("short", json!(1)).with_expiry(10));
        store.apply(CacheEvent::succeeded("long", json!(2)).with_expiry(1000));
        store.begin("never-loaded");

        clock.advance(Duration::seconds(11));
        assert_eq!(store.purge_expired(), 1);

        let mut keys = store.keys();
        keys.sort();
        assert_eq!(keys, vec!["long", "never-loaded"]);
    }

    #[test]
    fn view_of_unknown_key_is_pending() {
        let clock = Arc::new(ManualClock::new(datetime!(2024-03-01 9:00 UTC)));
        let store = store(clock);
        assert_eq!(store.view(&"missing"), EntryView::pending());
    }
}
