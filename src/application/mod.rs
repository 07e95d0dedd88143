//! Application services built on top of the cache layer.

pub mod error;
pub mod replay;
