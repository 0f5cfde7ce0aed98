//! Entity store: merge-on-write records over a durable key-value backend.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::entity::{ActivityId, CachedEntity, CachedListSnapshot, ListWindow, OwnerId};
use super::storage::CacheStorage;
use super::traits::{ResourceKind, SubResource};
use crate::error::{Error, Result};

const ENTITY_NAMESPACE: &str = "activity";
const LIST_NAMESPACE: &str = "activity_list";

/// Counts of cached activities by completeness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
  pub total: usize,
  pub complete: usize,
  pub partial: usize,
}

/// Durable store of cached activities and list snapshots.
///
/// Writes to the same activity id are serialized through a per-id lock so that
/// concurrent read-modify-write cycles never lose a sub-resource. Unreadable
/// records are reported as absent.
pub struct EntityStore {
  storage: Arc<dyn CacheStorage>,
  locks: Arc<Mutex<HashMap<ActivityId, Arc<Mutex<()>>>>>,
}

impl EntityStore {
  /// Create a new store over the given storage backend.
  pub fn new(storage: impl CacheStorage + 'static) -> Self {
    Self::from_shared(Arc::new(storage))
  }

  pub fn from_shared(storage: Arc<dyn CacheStorage>) -> Self {
    Self {
      storage,
      locks: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  fn id_lock(&self, id: ActivityId) -> Result<Arc<Mutex<()>>> {
    let mut locks = self
      .locks
      .lock()
      .map_err(|e| Error::StoreUnavailable(format!("lock poisoned: {}", e)))?;
    Ok(Arc::clone(locks.entry(id).or_default()))
  }

  /// Run `f` while holding the write lock for `id`.
  fn with_id_lock<T>(&self, id: ActivityId, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let lock = self.id_lock(id)?;
    let _guard = lock
      .lock()
      .map_err(|e| Error::StoreUnavailable(format!("lock poisoned: {}", e)))?;
    f()
  }

  /// Read a cached activity. Malformed records count as a miss.
  pub fn get(&self, id: ActivityId) -> Result<Option<CachedEntity>> {
    let key = id.to_string();
    let Some(data) = self.storage.get(ENTITY_NAMESPACE, &key)? else {
      return Ok(None);
    };

    match decode::<CachedEntity>(&key, &data) {
      Ok(entity) => Ok(Some(entity)),
      Err(e) => {
        warn!(activity_id = id, error = %e, "Treating unreadable cache record as a miss");
        Ok(None)
      }
    }
  }

  /// Read a cached activity, creating an empty record if none exists.
  pub fn get_or_create(&self, id: ActivityId, owner_id: OwnerId) -> Result<CachedEntity> {
    self.with_id_lock(id, || {
      if let Some(entity) = self.get(id)? {
        return Ok(entity);
      }
      let entity = CachedEntity::new(id, owner_id, Utc::now());
      self.write(&entity)?;
      debug!(activity_id = id, "Created empty cache record");
      Ok(entity)
    })
  }

  /// Write a single sub-resource, leaving the others untouched.
  pub fn upsert_sub_resource(
    &self,
    id: ActivityId,
    owner_id: OwnerId,
    resource: SubResource,
  ) -> Result<CachedEntity> {
    self.upsert_many(id, owner_id, vec![resource])
  }

  /// Write several sub-resources as one record update.
  pub fn upsert_many(
    &self,
    id: ActivityId,
    owner_id: OwnerId,
    resources: Vec<SubResource>,
  ) -> Result<CachedEntity> {
    self.with_id_lock(id, || {
      let now = Utc::now();
      let mut entity = self
        .get(id)?
        .unwrap_or_else(|| CachedEntity::new(id, owner_id, now));

      let kinds: Vec<ResourceKind> = resources.iter().map(SubResource::kind).collect();
      for resource in resources {
        entity.apply(resource, now);
      }
      entity.last_updated_at = now;

      self.write(&entity)?;
      debug!(activity_id = id, ?kinds, "Merged sub-resources into cache");
      Ok(entity)
    })
  }

  fn write(&self, entity: &CachedEntity) -> Result<()> {
    let data = serde_json::to_vec_pretty(entity)?;
    self
      .storage
      .put(ENTITY_NAMESPACE, &entity.id.to_string(), &data)
  }

  /// All cached activity ids, ascending.
  pub fn list_ids(&self) -> Result<Vec<ActivityId>> {
    let mut ids: Vec<ActivityId> = self
      .storage
      .list(ENTITY_NAMESPACE)?
      .iter()
      .filter_map(|key| key.parse().ok())
      .collect();
    ids.sort_unstable();
    Ok(ids)
  }

  /// Remove a cached activity. Returns whether it existed.
  pub fn delete(&self, id: ActivityId) -> Result<bool> {
    let removed = self.with_id_lock(id, || {
      self.storage.delete(ENTITY_NAMESPACE, &id.to_string())
    })?;
    // Drop the id's lock only if no other writer still holds a handle to it
    if let Ok(mut locks) = self.locks.lock() {
      if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
        locks.remove(&id);
      }
    }
    Ok(removed)
  }

  /// True iff every required kind has been fetched.
  pub fn is_complete(entity: &CachedEntity, required: &[ResourceKind]) -> bool {
    entity.is_complete(required)
  }

  /// Cached listing for an owner and window. Malformed snapshots count as a miss.
  pub fn get_list_snapshot(
    &self,
    owner_id: OwnerId,
    window: &ListWindow,
  ) -> Result<Option<CachedListSnapshot>> {
    let key = CachedListSnapshot::cache_key(owner_id, window);
    let Some(data) = self.storage.get(LIST_NAMESPACE, &key)? else {
      return Ok(None);
    };

    match decode::<CachedListSnapshot>(&key, &data) {
      Ok(snapshot) => Ok(Some(snapshot)),
      Err(e) => {
        warn!(owner_id, error = %e, "Treating unreadable list snapshot as a miss");
        Ok(None)
      }
    }
  }

  pub fn put_list_snapshot(&self, snapshot: &CachedListSnapshot) -> Result<()> {
    let key = CachedListSnapshot::cache_key(snapshot.owner_id, &snapshot.query);
    let data = serde_json::to_vec(snapshot)?;
    self.storage.put(LIST_NAMESPACE, &key, &data)
  }

  /// Remove every cached activity and list snapshot. Returns the number of
  /// activities removed.
  pub fn clear(&self) -> Result<usize> {
    let mut removed = 0;
    for id in self.list_ids()? {
      if self.delete(id)? {
        removed += 1;
      }
    }
    for key in self.storage.list(LIST_NAMESPACE)? {
      self.storage.delete(LIST_NAMESPACE, &key)?;
    }
    Ok(removed)
  }

  /// Completeness counts over every readable cached activity.
  pub fn stats(&self, required: &[ResourceKind]) -> Result<CacheStats> {
    let mut stats = CacheStats::default();
    for id in self.list_ids()? {
      if let Some(entity) = self.get(id)? {
        stats.total += 1;
        if entity.is_complete(required) {
          stats.complete += 1;
        } else {
          stats.partial += 1;
        }
      }
    }
    Ok(stats)
  }
}

fn decode<T: serde::de::DeserializeOwned>(key: &str, data: &[u8]) -> Result<T> {
  serde_json::from_slice(data).map_err(|e| Error::MalformedRecord {
    key: key.to_string(),
    reason: e.to_string(),
  })
}

impl Clone for EntityStore {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      locks: Arc::clone(&self.locks),
    }
  }
}
