//! Per-activity fetching: fetch only missing sub-resources, merge them into the
//! store, feed every response to the rate-limit tracker.

use chrono::Utc;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::{
  ActivityId, CacheResult, CacheSource, CachedEntity, CachedListSnapshot, EntityStore, ListWindow,
  OwnerId, Provenance, ResourceKind, SubResource,
};
use crate::error::{Error, Result};
use crate::ratelimit::RateLimitTracker;
use crate::remote::{ListQuery, RemoteResourceClient, RemoteResult};

/// Page size used when listing activities.
const LIST_PAGE_SIZE: u32 = 200;

/// A sub-resource that could not be fetched.
#[derive(Debug)]
pub struct KindFailure {
  pub kind: ResourceKind,
  pub error: Error,
}

/// Result of fetching one activity.
#[derive(Debug)]
pub struct FetchOutcome {
  /// The record after merging everything fetched in this call
  pub entity: CachedEntity,
  /// Where each successfully obtained kind came from
  pub provenance: BTreeMap<ResourceKind, Provenance>,
  /// Kinds whose fetch failed; the rest of the call's work is still persisted
  pub failures: Vec<KindFailure>,
}

impl FetchOutcome {
  pub fn is_success(&self) -> bool {
    self.failures.is_empty()
  }

  /// Whether any failure was the provider refusing for quota.
  pub fn rate_limited(&self) -> bool {
    self
      .failures
      .iter()
      .any(|f| matches!(f.error, Error::RateLimitExceeded))
  }

  pub fn source(&self) -> CacheSource {
    if !self.failures.is_empty() {
      CacheSource::Partial
    } else if self.provenance.values().any(|p| *p == Provenance::Fetched) {
      CacheSource::Network
    } else {
      CacheSource::Cache
    }
  }
}

/// Assembles activities from the store and the provider.
pub struct FetchOrchestrator<C> {
  client: Arc<C>,
  store: EntityStore,
  tracker: Arc<RateLimitTracker>,
}

impl<C: RemoteResourceClient> FetchOrchestrator<C> {
  pub fn new(client: Arc<C>, store: EntityStore, tracker: Arc<RateLimitTracker>) -> Self {
    Self {
      client,
      store,
      tracker,
    }
  }

  pub fn store(&self) -> &EntityStore {
    &self.store
  }

  pub fn tracker(&self) -> &Arc<RateLimitTracker> {
    &self.tracker
  }

  /// Make sure every required kind of `id` is cached, fetching only what is
  /// missing (or everything when `force_refresh`).
  ///
  /// Per-kind failures are reported in the outcome. Only a store failure makes
  /// the whole call fail.
  pub async fn fetch_entity(
    &self,
    id: ActivityId,
    owner_id: OwnerId,
    required: &[ResourceKind],
    force_refresh: bool,
  ) -> Result<FetchOutcome> {
    let existing = self.store.get_or_create(id, owner_id)?;

    let kinds: BTreeSet<ResourceKind> = required.iter().copied().collect();
    let mut provenance = BTreeMap::new();
    let mut to_fetch = Vec::new();
    for kind in kinds {
      if force_refresh || !existing.has(kind) {
        to_fetch.push(kind);
      } else {
        provenance.insert(kind, Provenance::FromCache);
      }
    }

    if to_fetch.is_empty() {
      debug!(activity_id = id, "All required kinds cached");
      return Ok(FetchOutcome {
        entity: existing,
        provenance,
        failures: Vec::new(),
      });
    }

    debug!(activity_id = id, kinds = ?to_fetch, "Fetching sub-resources");
    let results = join_all(to_fetch.iter().map(|kind| self.fetch_kind(id, *kind))).await;

    let mut fetched = Vec::new();
    let mut failures = Vec::new();
    for (kind, result) in to_fetch.into_iter().zip(results) {
      match result {
        Ok(resource) => {
          provenance.insert(kind, Provenance::Fetched);
          fetched.push(resource);
        }
        Err(error) => {
          warn!(activity_id = id, %kind, %error, "Sub-resource fetch failed");
          failures.push(KindFailure { kind, error });
        }
      }
    }

    // Persist whatever succeeded, even if siblings failed
    let entity = if fetched.is_empty() {
      existing
    } else {
      self.store.upsert_many(id, owner_id, fetched)?
    };

    Ok(FetchOutcome {
      entity,
      provenance,
      failures,
    })
  }

  async fn fetch_kind(&self, id: ActivityId, kind: ResourceKind) -> Result<SubResource> {
    let result: RemoteResult<SubResource> = match kind {
      ResourceKind::Details => self
        .client
        .fetch_details(id)
        .await
        .map(|r| r.map(SubResource::Details)),
      ResourceKind::Photos => self
        .client
        .fetch_photos(id)
        .await
        .map(|r| r.map(SubResource::Photos)),
      ResourceKind::Comments => self
        .client
        .fetch_comments(id)
        .await
        .map(|r| r.map(SubResource::Comments)),
      ResourceKind::Streams => self
        .client
        .fetch_streams_or_laps(id)
        .await
        .map(|r| r.map(SubResource::Streams)),
    };

    match result {
      Ok(response) => {
        self.tracker.observe(&response.metadata);
        Ok(response.payload)
      }
      Err(failure) => {
        self.tracker.observe(&failure.metadata);
        Err(failure.error)
      }
    }
  }

  /// List an owner's activities in a window, reusing a cached snapshot unless
  /// `refresh` is set.
  pub async fn list_entities(
    &self,
    owner_id: OwnerId,
    window: ListWindow,
    refresh: bool,
  ) -> Result<CacheResult<CachedListSnapshot>> {
    if !refresh {
      if let Some(snapshot) = self.store.get_list_snapshot(owner_id, &window)? {
        debug!(owner_id, count = snapshot.total_count, "Using cached activity list");
        return Ok(CacheResult::from_cache(snapshot));
      }
    }

    let mut entities = Vec::new();
    let mut page = 1;
    loop {
      let query = ListQuery {
        after: window.after,
        before: window.before,
        page,
        per_page: LIST_PAGE_SIZE,
      };
      let response = match self.client.fetch_list(owner_id, &query).await {
        Ok(response) => response,
        Err(failure) => {
          self.tracker.observe(&failure.metadata);
          return Err(failure.error);
        }
      };
      self.tracker.observe(&response.metadata);

      let count = response.payload.len();
      entities.extend(response.payload);
      if count < LIST_PAGE_SIZE as usize {
        break;
      }
      page += 1;
    }

    let snapshot = CachedListSnapshot {
      owner_id,
      query: window,
      total_count: entities.len(),
      entities,
      fetched_at: Utc::now(),
    };
    self.store.put_list_snapshot(&snapshot)?;
    info!(owner_id, count = snapshot.total_count, pages = page, "Listed activities");

    Ok(CacheResult::from_network(snapshot))
  }
}
