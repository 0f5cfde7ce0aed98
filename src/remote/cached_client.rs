//! Cached activity client: the public entry point for callers that need
//! activities without thinking about quota.

use std::sync::Arc;

use crate::batch::{BatchOptions, BatchOutcome, BatchScheduler};
use crate::cache::{
  ActivityId, CacheResult, CachedListSnapshot, EntityStore, ListWindow, OwnerId, ResourceKind,
};
use crate::error::Result;
use crate::orchestrator::{FetchOrchestrator, FetchOutcome};
use crate::ratelimit::{RateLimitState, RateLimitTracker};

use super::RemoteResourceClient;

/// Options for a single-activity lookup.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
  pub force_refresh: bool,
}

/// Provider client with transparent, quota-aware caching.
///
/// Wraps a `RemoteResourceClient` and exposes single lookups, batch fetches and
/// listings. The rate-limit tracker belongs to this instance, so separate
/// credentials never share quota state.
pub struct CachedActivityClient<C> {
  owner_id: OwnerId,
  orchestrator: Arc<FetchOrchestrator<C>>,
  scheduler: BatchScheduler<C>,
}

impl<C> Clone for CachedActivityClient<C> {
  fn clone(&self) -> Self {
    Self {
      owner_id: self.owner_id,
      orchestrator: Arc::clone(&self.orchestrator),
      scheduler: self.scheduler.clone(),
    }
  }
}

impl<C: RemoteResourceClient> CachedActivityClient<C> {
  pub fn new(
    client: C,
    store: EntityStore,
    tracker: Arc<RateLimitTracker>,
    owner_id: OwnerId,
  ) -> Self {
    let orchestrator = Arc::new(FetchOrchestrator::new(Arc::new(client), store, tracker));
    let scheduler = BatchScheduler::new(Arc::clone(&orchestrator));
    Self {
      owner_id,
      orchestrator,
      scheduler,
    }
  }

  pub fn owner_id(&self) -> OwnerId {
    self.owner_id
  }

  pub fn store(&self) -> &EntityStore {
    self.orchestrator.store()
  }

  /// One activity with the given kinds, fetching only what is missing.
  pub async fn get_entity(
    &self,
    id: ActivityId,
    kinds: &[ResourceKind],
    options: GetOptions,
  ) -> Result<FetchOutcome> {
    self
      .orchestrator
      .fetch_entity(id, self.owner_id, kinds, options.force_refresh)
      .await
  }

  /// Many activities, windowed under admission control.
  pub async fn batch_fetch(
    &self,
    ids: &[ActivityId],
    kinds: &[ResourceKind],
    options: &BatchOptions,
  ) -> BatchOutcome {
    self.scheduler.run(self.owner_id, ids, kinds, options).await
  }

  pub fn rate_limit_info(&self) -> RateLimitState {
    self.orchestrator.tracker().query()
  }

  /// Activity summaries in a window, from the snapshot cache when possible.
  pub async fn list_activities(
    &self,
    window: ListWindow,
    refresh: bool,
  ) -> Result<CacheResult<CachedListSnapshot>> {
    self
      .orchestrator
      .list_entities(self.owner_id, window, refresh)
      .await
  }

  /// List a window and fetch every listed activity.
  pub async fn sync(
    &self,
    window: ListWindow,
    kinds: &[ResourceKind],
    options: &BatchOptions,
  ) -> Result<BatchOutcome> {
    let listing = self.list_activities(window, options.force_refresh).await?;
    let ids = listing.data.ids();
    Ok(self.batch_fetch(&ids, kinds, options).await)
  }
}
