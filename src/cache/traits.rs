//! Core types for the caching system: sub-resource kinds and provenance.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// One of the four independently-fetched parts of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
  Details,
  Photos,
  Comments,
  Streams,
}

impl ResourceKind {
  pub const ALL: [ResourceKind; 4] = [
    ResourceKind::Details,
    ResourceKind::Photos,
    ResourceKind::Comments,
    ResourceKind::Streams,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      ResourceKind::Details => "details",
      ResourceKind::Photos => "photos",
      ResourceKind::Comments => "comments",
      ResourceKind::Streams => "streams",
    }
  }
}

impl fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ResourceKind {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "details" => Ok(ResourceKind::Details),
      "photos" => Ok(ResourceKind::Photos),
      "comments" => Ok(ResourceKind::Comments),
      // Laps are stored in the streams slot
      "streams" | "laps" => Ok(ResourceKind::Streams),
      other => Err(Error::Config(format!("unknown resource kind '{}'", other))),
    }
  }
}

/// A fetched sub-resource payload, tagged with its kind.
///
/// Payloads are opaque: photos and comments are arrays, details and streams are
/// single JSON documents.
#[derive(Debug, Clone, PartialEq)]
pub enum SubResource {
  Details(Value),
  Photos(Vec<Value>),
  Comments(Vec<Value>),
  Streams(Value),
}

impl SubResource {
  pub fn kind(&self) -> ResourceKind {
    match self {
      SubResource::Details(_) => ResourceKind::Details,
      SubResource::Photos(_) => ResourceKind::Photos,
      SubResource::Comments(_) => ResourceKind::Comments,
      SubResource::Streams(_) => ResourceKind::Streams,
    }
  }
}

/// Indicates where a sub-resource came from during one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
  /// Already present in the store, no remote call made
  FromCache,
  /// Fetched from the provider during this call
  Fetched,
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
    }
  }

  pub fn from_cache(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
    }
  }
}

/// Aggregate source of a cached result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
  /// At least one part was fetched from the network
  Network,
  /// Everything was served from the store
  Cache,
  /// Some required parts could not be obtained
  Partial,
}
