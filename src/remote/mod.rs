//! Remote activity provider: client contract, Strava implementation and the
//! cached facade built on top of it.

mod cached_client;
mod client;
#[cfg(test)]
pub(crate) mod testing;

pub use cached_client::{CachedActivityClient, GetOptions};
pub use client::StravaClient;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::{ActivityId, OwnerId};
use crate::error::Error;
use crate::ratelimit::ResponseMetadata;

/// A successful provider response.
#[derive(Debug, Clone)]
pub struct RemoteResponse<T> {
  pub payload: T,
  pub metadata: ResponseMetadata,
}

impl<T> RemoteResponse<T> {
  pub fn new(payload: T, metadata: ResponseMetadata) -> Self {
    Self { payload, metadata }
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RemoteResponse<U> {
    RemoteResponse {
      payload: f(self.payload),
      metadata: self.metadata,
    }
  }
}

/// A failed provider call. Carries whatever rate-limit headers came back, so a
/// 429 still updates the tracker.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RemoteFailure {
  pub error: Error,
  pub metadata: ResponseMetadata,
}

impl From<Error> for RemoteFailure {
  fn from(error: Error) -> Self {
    Self {
      error,
      metadata: ResponseMetadata::default(),
    }
  }
}

pub type RemoteResult<T> = std::result::Result<RemoteResponse<T>, RemoteFailure>;

/// Paging and window parameters for listing activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
  pub after: Option<i64>,
  pub before: Option<i64>,
  pub page: u32,
  pub per_page: u32,
}

/// The provider API. Every call returns the response's rate-limit headers.
#[async_trait]
pub trait RemoteResourceClient: Send + Sync {
  async fn fetch_details(&self, id: ActivityId) -> RemoteResult<Value>;

  async fn fetch_photos(&self, id: ActivityId) -> RemoteResult<Vec<Value>>;

  async fn fetch_comments(&self, id: ActivityId) -> RemoteResult<Vec<Value>>;

  /// Time-series streams, or the activity's laps when it has no streams.
  async fn fetch_streams_or_laps(&self, id: ActivityId) -> RemoteResult<Value>;

  /// One page of activity summaries for an owner.
  async fn fetch_list(&self, owner_id: OwnerId, query: &ListQuery) -> RemoteResult<Vec<Value>>;
}
