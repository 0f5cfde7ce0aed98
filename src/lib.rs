//! Quota-aware incremental cache for Strava activities.
//!
//! Activities are assembled from several independently fetched sub-resources
//! (details, photos, comments, streams). Each is persisted as soon as it
//! arrives, so an interrupted or rate-limited run resumes where it stopped.

pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod orchestrator;
pub mod ratelimit;
pub mod remote;

pub use batch::{BatchOptions, BatchOutcome, BatchScheduler};
pub use cache::{CachedEntity, EntityStore, ResourceKind};
pub use error::{Error, Result};
pub use orchestrator::{FetchOrchestrator, FetchOutcome};
pub use ratelimit::{RateLimitState, RateLimitTracker};
pub use remote::{CachedActivityClient, GetOptions, StravaClient};
