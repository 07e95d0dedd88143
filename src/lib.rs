//! Keyed request-lifecycle caches for dashboard data domains.
//!
//! Producers (the network layer) emit lifecycle events per cache key; the
//! stores in [`cache`] apply them through a pure transition function and
//! consumers read `(data, loading, error)` views back by key.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
