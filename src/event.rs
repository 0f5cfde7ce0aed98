use serde::Serialize;
use tokio::sync::mpsc;

use crate::ratelimit::RateLimitState;

/// Stage of a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
  Starting,
  Fetching,
  RateLimited,
  Complete,
}

/// Progress report emitted by the batch scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
  pub phase: BatchPhase,
  pub total: usize,
  pub cached: usize,
  pub fetched: usize,
  pub remaining: usize,
  pub rate_limit_info: RateLimitState,
}

pub type ProgressSender = mpsc::UnboundedSender<BatchProgress>;
pub type ProgressReceiver = mpsc::UnboundedReceiver<BatchProgress>;

/// Create a progress channel for a batch run
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
  mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_progress_serializes_with_wire_names() {
    let progress = BatchProgress {
      phase: BatchPhase::RateLimited,
      total: 10,
      cached: 1,
      fetched: 2,
      remaining: 7,
      rate_limit_info: RateLimitState::default(),
    };
    let value = serde_json::to_value(&progress).unwrap();
    assert_eq!(value["phase"], "rate_limited");
    assert_eq!(value["remaining"], 7);
    assert_eq!(value["rateLimitInfo"]["shortTermLimit"], 100);
    assert_eq!(value["rateLimitInfo"]["dailyLimit"], 1000);
  }
}
