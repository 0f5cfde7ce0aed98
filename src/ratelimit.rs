//! Quota tracking from provider rate-limit headers.
//!
//! The provider reports two windows in every response: a short-term window
//! (15 minutes) and a daily window, each as a comma-separated pair such as
//! `X-RateLimit-Usage: 98,500` and `X-RateLimit-Limit: 100,1000`. The tracker
//! keeps the most recent observation and answers admission and pacing
//! questions. It never sleeps or blocks; callers decide what to do.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

pub const USAGE_HEADER: &str = "x-ratelimit-usage";
pub const LIMIT_HEADER: &str = "x-ratelimit-limit";

/// Provider's published read quota, assumed until a response says otherwise.
const DEFAULT_SHORT_TERM_LIMIT: u32 = 100;
const DEFAULT_DAILY_LIMIT: u32 = 1000;

/// Requests kept in reserve per window. One entity may cost four calls.
const SHORT_TERM_RESERVE: u32 = 5;
const DAILY_RESERVE: u32 = 1;

const NEAR_SHORT_TERM: u32 = 20;
const NEAR_DAILY: u32 = 100;

/// Raw rate-limit header values from one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
  pub usage: Option<String>,
  pub limit: Option<String>,
}

impl ResponseMetadata {
  pub fn new(usage: impl Into<String>, limit: impl Into<String>) -> Self {
    Self {
      usage: Some(usage.into()),
      limit: Some(limit.into()),
    }
  }

  /// Fill headers missing here from an earlier response.
  pub fn or(self, earlier: ResponseMetadata) -> Self {
    Self {
      usage: self.usage.or(earlier.usage),
      limit: self.limit.or(earlier.limit),
    }
  }
}

/// Snapshot of the tracked quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitState {
  pub short_term_usage: u32,
  pub short_term_limit: u32,
  pub daily_usage: u32,
  pub daily_limit: u32,
  pub last_updated: Option<DateTime<Utc>>,
}

impl Default for RateLimitState {
  fn default() -> Self {
    Self {
      short_term_usage: 0,
      short_term_limit: DEFAULT_SHORT_TERM_LIMIT,
      daily_usage: 0,
      daily_limit: DEFAULT_DAILY_LIMIT,
      last_updated: None,
    }
  }
}

impl RateLimitState {
  pub fn short_term_remaining(&self) -> u32 {
    self.short_term_limit.saturating_sub(self.short_term_usage)
  }

  pub fn daily_remaining(&self) -> u32 {
    self.daily_limit.saturating_sub(self.daily_usage)
  }
}

/// Which windows are close to exhaustion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NearLimit {
  pub near_short_term: bool,
  pub near_daily: bool,
}

/// Inter-window pacing delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Pacing {
  pub baseline_ms: u64,
  pub near_short_term_ms: u64,
  pub near_daily_ms: u64,
}

impl Default for Pacing {
  fn default() -> Self {
    Self {
      baseline_ms: 250,
      near_short_term_ms: 15_000,
      near_daily_ms: 60_000,
    }
  }
}

impl Pacing {
  /// No pacing at all.
  pub fn none() -> Self {
    Self {
      baseline_ms: 0,
      near_short_term_ms: 0,
      near_daily_ms: 0,
    }
  }
}

/// Tracks quota for one credential. Share it with `Arc`.
#[derive(Debug, Default)]
pub struct RateLimitTracker {
  state: RwLock<RateLimitState>,
  pacing: Pacing,
}

impl RateLimitTracker {
  pub fn new(pacing: Pacing) -> Self {
    Self {
      state: RwLock::new(RateLimitState::default()),
      pacing,
    }
  }

  /// Record the headers of the latest response. Last write wins; malformed
  /// headers are ignored.
  pub fn observe(&self, metadata: &ResponseMetadata) {
    let usage = metadata.usage.as_deref().and_then(|raw| parse_header(USAGE_HEADER, raw));
    let limit = metadata.limit.as_deref().and_then(|raw| parse_header(LIMIT_HEADER, raw));
    if usage.is_none() && limit.is_none() {
      return;
    }

    let mut state = match self.state.write() {
      Ok(state) => state,
      Err(poisoned) => poisoned.into_inner(),
    };
    if let Some((short_term, daily)) = usage {
      state.short_term_usage = short_term;
      state.daily_usage = daily;
    }
    if let Some((short_term, daily)) = limit {
      state.short_term_limit = short_term;
      state.daily_limit = daily;
    }
    state.last_updated = Some(Utc::now());

    debug!(
      short_term = state.short_term_usage,
      short_term_limit = state.short_term_limit,
      daily = state.daily_usage,
      daily_limit = state.daily_limit,
      "Observed rate limit"
    );
  }

  pub fn query(&self) -> RateLimitState {
    match self.state.read() {
      Ok(state) => *state,
      Err(poisoned) => *poisoned.into_inner(),
    }
  }

  /// Whether another entity fetch may start without exhausting either window.
  pub fn can_admit(&self) -> bool {
    let state = self.query();
    state.short_term_remaining() > SHORT_TERM_RESERVE && state.daily_remaining() > DAILY_RESERVE
  }

  pub fn is_near_limit(&self) -> NearLimit {
    let state = self.query();
    NearLimit {
      near_short_term: state.short_term_remaining() < NEAR_SHORT_TERM,
      near_daily: state.daily_remaining() < NEAR_DAILY,
    }
  }

  /// Suggested pause before the next burst of requests.
  pub fn recommended_delay(&self) -> Duration {
    let near = self.is_near_limit();
    let ms = if near.near_daily {
      self.pacing.near_daily_ms
    } else if near.near_short_term {
      self.pacing.near_short_term_ms
    } else {
      self.pacing.baseline_ms
    };
    Duration::from_millis(ms)
  }
}

fn parse_header(name: &str, raw: &str) -> Option<(u32, u32)> {
  let parsed = parse_pair(raw);
  if parsed.is_none() {
    warn!(header = name, value = raw, "Ignoring malformed rate limit header");
  }
  parsed
}

/// Parse `"short,daily"`.
fn parse_pair(raw: &str) -> Option<(u32, u32)> {
  let mut parts = raw.split(',').map(str::trim);
  let short_term = parts.next()?.parse().ok()?;
  let daily = parts.next()?.parse().ok()?;
  if parts.next().is_some() {
    return None;
  }
  Some((short_term, daily))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tracker_with(usage: &str, limit: &str) -> RateLimitTracker {
    let tracker = RateLimitTracker::new(Pacing::default());
    tracker.observe(&ResponseMetadata::new(usage, limit));
    tracker
  }

  #[test]
  fn test_parse_headers() {
    let tracker = tracker_with("98,500", "100,1000");
    let state = tracker.query();
    assert_eq!(state.short_term_usage, 98);
    assert_eq!(state.daily_usage, 500);
    assert_eq!(state.short_term_limit, 100);
    assert_eq!(state.daily_limit, 1000);
    assert!(state.last_updated.is_some());

    let near = tracker.is_near_limit();
    assert!(near.near_short_term);
    assert!(!near.near_daily);
  }

  #[test]
  fn test_defaults_admit() {
    let tracker = RateLimitTracker::default();
    assert!(tracker.can_admit());
    assert_eq!(tracker.query().short_term_limit, 100);
    assert_eq!(tracker.query().daily_limit, 1000);
    assert!(tracker.query().last_updated.is_none());
  }

  #[test]
  fn test_admission_short_term_exhausted() {
    assert!(!tracker_with("95,10", "100,1000").can_admit());
  }

  #[test]
  fn test_admission_daily_exhausted() {
    assert!(!tracker_with("10,999", "100,1000").can_admit());
  }

  #[test]
  fn test_admission_well_below() {
    assert!(tracker_with("10,200", "100,1000").can_admit());
  }

  #[test]
  fn test_usage_over_limit_does_not_underflow() {
    let tracker = tracker_with("120,1200", "100,1000");
    assert!(!tracker.can_admit());
    assert_eq!(tracker.query().short_term_remaining(), 0);
  }

  #[test]
  fn test_last_write_wins() {
    let tracker = tracker_with("90,900", "100,1000");
    tracker.observe(&ResponseMetadata::new("3,40", "100,1000"));
    let state = tracker.query();
    assert_eq!(state.short_term_usage, 3);
    assert_eq!(state.daily_usage, 40);
  }

  #[test]
  fn test_malformed_header_ignored() {
    let tracker = tracker_with("10,20", "100,1000");
    tracker.observe(&ResponseMetadata::new("lots", "100"));
    let state = tracker.query();
    assert_eq!(state.short_term_usage, 10);
    assert_eq!(state.daily_usage, 20);
  }

  #[test]
  fn test_missing_headers_leave_state() {
    let tracker = tracker_with("10,20", "100,1000");
    let before = tracker.query();
    tracker.observe(&ResponseMetadata::default());
    assert_eq!(tracker.query(), before);
  }

  #[test]
  fn test_parse_pair_shapes() {
    assert_eq!(parse_pair(" 7 , 8 "), Some((7, 8)));
    assert_eq!(parse_pair("7"), None);
    assert_eq!(parse_pair("7,8,9"), None);
    assert_eq!(parse_pair("-1,8"), None);
  }

  #[test]
  fn test_recommended_delay_tiers() {
    let pacing = Pacing::default();

    let relaxed = tracker_with("10,200", "100,1000");
    assert_eq!(
      relaxed.recommended_delay(),
      Duration::from_millis(pacing.baseline_ms)
    );

    let near_short = tracker_with("90,200", "100,1000");
    assert_eq!(
      near_short.recommended_delay(),
      Duration::from_millis(pacing.near_short_term_ms)
    );

    let near_daily = tracker_with("90,950", "100,1000");
    assert_eq!(
      near_daily.recommended_delay(),
      Duration::from_millis(pacing.near_daily_ms)
    );
    assert!(near_daily.recommended_delay() > near_short.recommended_delay());
    assert!(near_short.recommended_delay() > relaxed.recommended_delay());
  }
}
