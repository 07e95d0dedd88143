//! Keyed request-lifecycle caches.
//!
//! Every dashboard data domain keeps its fetched values in a keyed store whose
//! entries move through an explicit lifecycle:
//!
//! - `request_started` marks a key as loading
//! - `request_succeeded` / `request_appended` store (or grow) the payload and
//!   stamp it with `cached_at`
//! - `request_failed` records the error
//! - `entry_cleared` / `entry_invalidated` drop the entry, the latter only
//!   once it has expired
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! default_expires_in_seconds = 3600
//! fencing = true
//! ```

mod clock;
mod config;
pub mod dashboard;
pub mod domains;
mod entry;
mod events;
pub mod invalidation;
mod keys;
mod lock;
pub mod merge;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use dashboard::{DashboardCaches, DashboardSnapshot, Domain, DomainEvent};
pub use entry::{CacheEntry, DEFAULT_EXPIRES_IN_SECS, EntryView, ErrorValue, Flags, Payload};
pub use events::{CacheEvent, Epoch, EventKind, MalformedEvent, RawEvent};
pub use keys::{
    CacheKey, DEFAULT_INSTANCE_ID, EntityId, KeyError, LIST_OPERATION, MAX_SEGMENTS, ResourceKey,
    Segment, WidgetId, WorkspaceKey,
};
pub use store::{
    Applied, CacheStore, Context, KeyedEntry, METRIC_ENTRIES, METRIC_EVENT_IGNORED_TOTAL,
    METRIC_TRANSITION_TOTAL, Outcome, Transition, reduce,
};
