//! In-process provider double for orchestrator and scheduler tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{ListQuery, RemoteFailure, RemoteResourceClient, RemoteResponse, RemoteResult};
use crate::cache::{ActivityId, OwnerId, ResourceKind};
use crate::error::Error;
use crate::ratelimit::ResponseMetadata;

type HeaderScript = Box<dyn Fn(usize) -> ResponseMetadata + Send + Sync>;

/// Serves deterministic payloads, counts calls and fails on request.
pub(crate) struct ScriptedClient {
  calls: Mutex<Vec<(ActivityId, ResourceKind)>>,
  list_calls: AtomicUsize,
  failing: Mutex<HashSet<(ActivityId, ResourceKind)>>,
  failing_kinds: Mutex<HashSet<ResourceKind>>,
  refusing: AtomicBool,
  activities: Vec<Value>,
  headers: HeaderScript,
}

impl ScriptedClient {
  pub fn new() -> Self {
    Self {
      calls: Mutex::new(Vec::new()),
      list_calls: AtomicUsize::new(0),
      failing: Mutex::new(HashSet::new()),
      failing_kinds: Mutex::new(HashSet::new()),
      refusing: AtomicBool::new(false),
      activities: Vec::new(),
      headers: Box::new(|_| ResponseMetadata::new("1,1", "100,1000")),
    }
  }

  /// Rate-limit headers as a function of the 1-based call number.
  pub fn with_headers(
    mut self,
    script: impl Fn(usize) -> ResponseMetadata + Send + Sync + 'static,
  ) -> Self {
    self.headers = Box::new(script);
    self
  }

  /// Activity summaries served by `fetch_list`.
  pub fn with_activities(mut self, count: u64) -> Self {
    self.activities = (1..=count)
      .map(|id| json!({"id": id, "name": format!("Activity {}", id)}))
      .collect();
    self
  }

  pub fn fail(&self, id: ActivityId, kind: ResourceKind) {
    self.failing.lock().unwrap().insert((id, kind));
  }

  pub fn fail_kind(&self, kind: ResourceKind) {
    self.failing_kinds.lock().unwrap().insert(kind);
  }

  /// Answer every activity call with a quota refusal.
  pub fn refuse(&self) {
    self.refusing.store(true, Ordering::SeqCst);
  }

  pub fn heal(&self) {
    self.failing.lock().unwrap().clear();
    self.failing_kinds.lock().unwrap().clear();
  }

  pub fn call_count(&self) -> usize {
    self.calls.lock().unwrap().len()
  }

  pub fn calls_for(&self, id: ActivityId) -> Vec<ResourceKind> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(call_id, _)| *call_id == id)
      .map(|(_, kind)| *kind)
      .collect()
  }

  pub fn fetched_ids(&self) -> HashSet<ActivityId> {
    self.calls.lock().unwrap().iter().map(|(id, _)| *id).collect()
  }

  pub fn list_call_count(&self) -> usize {
    self.list_calls.load(Ordering::SeqCst)
  }

  fn respond<T>(&self, id: ActivityId, kind: ResourceKind, payload: T) -> RemoteResult<T> {
    let number = {
      let mut calls = self.calls.lock().unwrap();
      calls.push((id, kind));
      calls.len()
    };
    let metadata = (self.headers)(number);

    if self.refusing.load(Ordering::SeqCst) {
      return Err(RemoteFailure {
        error: Error::RateLimitExceeded,
        metadata,
      });
    }

    let failing = self.failing.lock().unwrap().contains(&(id, kind))
      || self.failing_kinds.lock().unwrap().contains(&kind);
    if failing {
      return Err(RemoteFailure {
        error: Error::Transient(format!("{} for {} unavailable", kind, id)),
        metadata,
      });
    }
    Ok(RemoteResponse::new(payload, metadata))
  }
}

#[async_trait]
impl RemoteResourceClient for ScriptedClient {
  async fn fetch_details(&self, id: ActivityId) -> RemoteResult<Value> {
    self.respond(
      id,
      ResourceKind::Details,
      json!({"id": id, "name": format!("Activity {}", id)}),
    )
  }

  async fn fetch_photos(&self, id: ActivityId) -> RemoteResult<Vec<Value>> {
    // Even ids have no photos
    let photos = if id % 2 == 0 {
      Vec::new()
    } else {
      vec![json!({"unique_id": format!("photo-{}", id)})]
    };
    self.respond(id, ResourceKind::Photos, photos)
  }

  async fn fetch_comments(&self, id: ActivityId) -> RemoteResult<Vec<Value>> {
    self.respond(
      id,
      ResourceKind::Comments,
      vec![json!({"id": id * 10, "text": "nice one"})],
    )
  }

  async fn fetch_streams_or_laps(&self, id: ActivityId) -> RemoteResult<Value> {
    self.respond(
      id,
      ResourceKind::Streams,
      json!({"time": {"data": [0, 1, 2]}}),
    )
  }

  async fn fetch_list(&self, _owner_id: OwnerId, query: &ListQuery) -> RemoteResult<Vec<Value>> {
    self.list_calls.fetch_add(1, Ordering::SeqCst);
    let per_page = query.per_page as usize;
    let start = (query.page.saturating_sub(1) as usize) * per_page;
    let page = self
      .activities
      .iter()
      .skip(start)
      .take(per_page)
      .cloned()
      .collect();
    Ok(RemoteResponse::new(page, (self.headers)(0)))
  }
}
