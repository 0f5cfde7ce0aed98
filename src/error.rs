//! Error taxonomy shared by the store, the remote client and the orchestrator.

/// Errors produced by the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// Network failure, timeout or 5xx from the provider. Retryable on a later run.
  #[error("transient fetch error: {0}")]
  Transient(String),

  /// The provider answered 429. Consumed by the scheduler as a stop signal.
  #[error("rate limit exceeded")]
  RateLimitExceeded,

  /// Any other non-success HTTP status.
  #[error("remote error {status}: {message}")]
  Remote { status: u16, message: String },

  /// A persisted record could not be decoded.
  #[error("malformed cache record {key}: {reason}")]
  MalformedRecord { key: String, reason: String },

  /// The persistence medium could not be reached.
  #[error("store unavailable: {0}")]
  StoreUnavailable(String),

  #[error("configuration error: {0}")]
  Config(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  /// Whether a later run could succeed where this one failed.
  pub fn is_retryable(&self) -> bool {
    matches!(self, Error::Transient(_) | Error::RateLimitExceeded)
  }
}

impl From<std::io::Error> for Error {
  fn from(e: std::io::Error) -> Self {
    Error::StoreUnavailable(e.to_string())
  }
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self {
    Error::StoreUnavailable(e.to_string())
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    match e.status() {
      Some(status) if status.as_u16() == 429 => Error::RateLimitExceeded,
      Some(status) if !status.is_server_error() => Error::Remote {
        status: status.as_u16(),
        message: e.to_string(),
      },
      _ => Error::Transient(e.to_string()),
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;
