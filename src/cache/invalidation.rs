//! Freshness decisions for cached entries.
//!
//! Two invalidation forms exist: a strict one that evicts an entry only once
//! it has expired, and a flag one that resets a single side-flag regardless of
//! data and expiry.

use time::{Duration, OffsetDateTime};

use super::entry::CacheEntry;

/// Outcome of a strict invalidation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    /// The entry expired and must be removed entirely.
    Evict,
    /// The entry is fresh (or was never loaded) and stays unchanged.
    Retain,
}

/// Instant after which the entry is stale.
///
/// `None` when the entry was never successfully loaded, or when the expiry
/// lies beyond the representable range (such an entry never expires).
pub fn expires_at(entry: &CacheEntry) -> Option<OffsetDateTime> {
    let cached_at = entry.cached_at?;
    let ttl = i64::try_from(entry.expires_in_seconds).ok()?;
    cached_at.checked_add(Duration::seconds(ttl))
}

/// True iff the entry was loaded and `now` is strictly past its expiry.
pub fn is_expired(entry: &CacheEntry, now: OffsetDateTime) -> bool {
    expires_at(entry).is_some_and(|deadline| now > deadline)
}

pub fn strict(entry: &CacheEntry, now: OffsetDateTime) -> Invalidation {
    if is_expired(entry, now) {
        Invalidation::Evict
    } else {
        Invalidation::Retain
    }
}

/// Copy of `entry` with `flag` reset; every other field is carried over.
pub fn reset_flag(entry: &CacheEntry, flag: &str) -> CacheEntry {
    CacheEntry {
        flags: entry.flags.clone().without(flag),
        ..entry.clone()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;

    fn loaded_at(cached_at: OffsetDateTime, ttl: u64) -> CacheEntry {
        CacheEntry {
            data: Some(json!({"id": 1})),
            cached_at: Some(cached_at),
            expires_in_seconds: ttl,
            ..Default::default()
        }
    }

    #[test]
    fn never_loaded_entry_never_expires() {
        let entry = CacheEntry {
            loading: true,
            ..Default::default()
        };
        let far_future = datetime!(2999-01-01 0:00 UTC);
        assert!(!is_expired(&entry, far_future));
        assert_eq!(strict(&entry, far_future), Invalidation::Retain);
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let t0 = datetime!(2024-05-01 12:00 UTC);
        let entry = loaded_at(t0, 60);

        assert!(!is_expired(&entry, t0 + Duration::seconds(59)));
        assert!(!is_expired(&entry, t0 + Duration::seconds(60)));
        assert!(is_expired(&entry, t0 + Duration::seconds(61)));
        assert_eq!(
            strict(&entry, t0 + Duration::seconds(61)),
            Invalidation::Evict
        );
    }

    #[test]
    fn unrepresentable_expiry_never_expires() {
        let t0 = datetime!(2024-05-01 12:00 UTC);
        let entry = loaded_at(t0, u64::MAX);
        assert_eq!(expires_at(&entry), None);
        assert!(!is_expired(&entry, datetime!(9999-01-01 0:00 UTC)));
    }

    #[test]
    fn reset_flag_leaves_data_untouched() {
        let t0 = datetime!(2024-05-01 12:00 UTC);
        let mut entry = loaded_at(t0, 120);
        entry.flags = entry.flags.clone().with("all_loaded");

        let reset = reset_flag(&entry, "all_loaded");
        assert!(!reset.has_flag("all_loaded"));
        assert_eq!(reset.data, entry.data);
        assert_eq!(reset.cached_at, entry.cached_at);
        assert_eq!(reset.expires_in_seconds, 120);
    }
}
