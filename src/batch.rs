//! Windowed batch fetching under admission control.
//!
//! A run partitions ids into already-complete and needing-work, then fetches
//! the latter in windows of `max_concurrency`. Every id in a window is fetched
//! concurrently and the window fully settles before the next starts. Between
//! windows the rate-limit tracker decides whether to continue; once it refuses,
//! the remaining ids are skipped and left for a later run. Completeness always
//! comes from the store, so rerunning the same ids resumes where it stopped.

use futures::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::cache::{ActivityId, CachedEntity, OwnerId, ResourceKind};
use crate::event::{BatchPhase, BatchProgress, ProgressSender};
use crate::orchestrator::FetchOrchestrator;
use crate::ratelimit::RateLimitState;
use crate::remote::RemoteResourceClient;

/// Options for one batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
  /// Ids fetched concurrently per window
  pub max_concurrency: usize,
  /// Stop between windows when the tracker refuses admission
  pub respect_rate_limits: bool,
  /// Refetch every required kind, even if cached
  pub force_refresh: bool,
  pub progress: Option<ProgressSender>,
}

impl Default for BatchOptions {
  fn default() -> Self {
    Self {
      max_concurrency: 5,
      respect_rate_limits: true,
      force_refresh: false,
      progress: None,
    }
  }
}

/// Aggregated result of a batch run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
  pub total: usize,
  pub from_cache: usize,
  pub fetched: usize,
  pub failed: usize,
  pub skipped_rate_limit: usize,
  pub entities: BTreeMap<ActivityId, CachedEntity>,
}

impl BatchOutcome {
  fn progress(&self, phase: BatchPhase, rate_limit_info: RateLimitState) -> BatchProgress {
    BatchProgress {
      phase,
      total: self.total,
      cached: self.from_cache,
      fetched: self.fetched,
      remaining: self
        .total
        .saturating_sub(self.from_cache + self.fetched + self.failed),
      rate_limit_info,
    }
  }
}

/// Drives the orchestrator across many ids.
pub struct BatchScheduler<C> {
  orchestrator: Arc<FetchOrchestrator<C>>,
}

impl<C> Clone for BatchScheduler<C> {
  fn clone(&self) -> Self {
    Self {
      orchestrator: Arc::clone(&self.orchestrator),
    }
  }
}

impl<C: RemoteResourceClient> BatchScheduler<C> {
  pub fn new(orchestrator: Arc<FetchOrchestrator<C>>) -> Self {
    Self { orchestrator }
  }

  /// Fetch every id's required kinds. Never fails: all problems are reported
  /// through the outcome counts.
  pub async fn run(
    &self,
    owner_id: OwnerId,
    ids: &[ActivityId],
    required: &[ResourceKind],
    options: &BatchOptions,
  ) -> BatchOutcome {
    let store = self.orchestrator.store();
    let tracker = self.orchestrator.tracker();

    let mut seen = HashSet::new();
    let ids: Vec<ActivityId> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

    let mut outcome = BatchOutcome {
      total: ids.len(),
      ..BatchOutcome::default()
    };

    let mut pending = Vec::new();
    for id in ids {
      match store.get(id) {
        Ok(Some(entity)) if !options.force_refresh && entity.is_complete(required) => {
          outcome.from_cache += 1;
          outcome.entities.insert(id, entity);
        }
        Ok(_) => pending.push(id),
        Err(e) => {
          warn!(activity_id = id, error = %e, "Could not read cache, scheduling fetch");
          pending.push(id);
        }
      }
    }

    info!(
      total = outcome.total,
      cached = outcome.from_cache,
      pending = pending.len(),
      "Starting batch"
    );
    emit(options, outcome.progress(BatchPhase::Starting, tracker.query()));

    let windows: Vec<&[ActivityId]> = pending.chunks(options.max_concurrency.max(1)).collect();
    // Set when the provider refused a call outright, headers or not
    let mut refused = false;
    for (index, window) in windows.iter().enumerate() {
      if index > 0 {
        if options.respect_rate_limits && (refused || !tracker.can_admit()) {
          outcome.skipped_rate_limit = windows[index..].iter().map(|w| w.len()).sum();
          let state = tracker.query();
          warn!(
            skipped = outcome.skipped_rate_limit,
            short_term_usage = state.short_term_usage,
            daily_usage = state.daily_usage,
            "Rate limit reached, stopping batch"
          );
          emit(options, outcome.progress(BatchPhase::RateLimited, state));
          return outcome;
        }

        let delay = tracker.recommended_delay();
        if !delay.is_zero() {
          tokio::time::sleep(delay).await;
        }
      }

      let results = join_all(window.iter().map(|id| {
        self
          .orchestrator
          .fetch_entity(*id, owner_id, required, options.force_refresh)
      }))
      .await;

      for (id, result) in window.iter().zip(results) {
        match result {
          Ok(fetch) => {
            refused |= fetch.rate_limited();
            if fetch.is_success() {
              outcome.fetched += 1;
            } else {
              outcome.failed += 1;
            }
            outcome.entities.insert(*id, fetch.entity);
          }
          Err(e) => {
            error!(activity_id = id, error = %e, "Fetch failed");
            outcome.failed += 1;
          }
        }
      }

      info!(
        window = index + 1,
        windows = windows.len(),
        fetched = outcome.fetched,
        failed = outcome.failed,
        "Window settled"
      );
      emit(options, outcome.progress(BatchPhase::Fetching, tracker.query()));
    }

    info!(
      fetched = outcome.fetched,
      failed = outcome.failed,
      cached = outcome.from_cache,
      "Batch complete"
    );
    emit(options, outcome.progress(BatchPhase::Complete, tracker.query()));
    outcome
  }
}

fn emit(options: &BatchOptions, progress: BatchProgress) {
  if let Some(tx) = &options.progress {
    // Ignore send errors - receiver may have been dropped
    let _ = tx.send(progress);
  }
}
