//! Durable caching of activities and activity listings.
//!
//! This module provides a provider-agnostic cache that:
//! - Stores one record per activity with four independently-stamped sub-resources
//! - Merges writes per sub-resource so partial progress is never clobbered
//! - Judges completeness by fetch timestamps, never by payload contents
//! - Treats unreadable records as cache misses

mod entity;
mod layer;
mod storage;
mod traits;

pub use entity::{ActivityId, CachedEntity, CachedListSnapshot, ListWindow, OwnerId};
pub use layer::{CacheStats, EntityStore};
pub use storage::{CacheStorage, FileStorage, SqliteStorage};
pub use traits::{CacheResult, CacheSource, Provenance, ResourceKind, SubResource};
