use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ListQuery, RemoteFailure, RemoteResourceClient, RemoteResponse, RemoteResult};
use crate::cache::{ActivityId, OwnerId};
use crate::config::StravaConfig;
use crate::error::Error;
use crate::ratelimit::{ResponseMetadata, LIMIT_HEADER, USAGE_HEADER};

const STREAM_KEYS: &str =
  "time,distance,latlng,altitude,velocity_smooth,heartrate,cadence,watts,temp,moving,grade_smooth";

/// Strava v3 API client
#[derive(Clone)]
pub struct StravaClient {
  http: reqwest::Client,
  base_url: Url,
  token: String,
}

impl StravaClient {
  pub fn new(config: &StravaConfig, token: String) -> Result<Self, Error> {
    // Url::join drops the last path segment unless the base ends with '/'
    let mut base = config.base_url.clone();
    if !base.ends_with('/') {
      base.push('/');
    }
    let base_url = Url::parse(&base)
      .map_err(|e| Error::Config(format!("invalid base url {}: {}", config.base_url, e)))?;

    let http = reqwest::Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()
      .map_err(|e| Error::Config(format!("failed to create http client: {}", e)))?;

    Ok(Self {
      http,
      base_url,
      token,
    })
  }

  /// GET a JSON document, returning it with the response's rate-limit headers.
  async fn get_json<T: DeserializeOwned>(
    &self,
    path: &str,
    query: &[(&str, String)],
  ) -> RemoteResult<T> {
    let url = self
      .base_url
      .join(path)
      .map_err(|e| Error::Config(format!("invalid endpoint {}: {}", path, e)))?;

    debug!(%url, "GET");
    let response = self
      .http
      .get(url)
      .bearer_auth(&self.token)
      .query(query)
      .send()
      .await
      .map_err(Error::from)?;

    let metadata = metadata_from_headers(response.headers());
    let status = response.status();

    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(RemoteFailure {
        error: status_error(status, body),
        metadata,
      });
    }

    let bytes = match response.bytes().await {
      Ok(bytes) => bytes,
      Err(e) => {
        return Err(RemoteFailure {
          error: Error::from(e),
          metadata,
        })
      }
    };
    match serde_json::from_slice(&bytes) {
      Ok(payload) => Ok(RemoteResponse::new(payload, metadata)),
      Err(e) => Err(RemoteFailure {
        error: Error::Serialization(e),
        metadata,
      }),
    }
  }
}

fn status_error(status: StatusCode, body: String) -> Error {
  if status == StatusCode::TOO_MANY_REQUESTS {
    Error::RateLimitExceeded
  } else if status.is_server_error() {
    Error::Transient(format!("{}: {}", status, body))
  } else {
    Error::Remote {
      status: status.as_u16(),
      message: body,
    }
  }
}

/// Pull the rate-limit headers out of a response.
fn metadata_from_headers(headers: &HeaderMap) -> ResponseMetadata {
  let read = |name: &str| {
    headers
      .get(name)
      .and_then(|v| v.to_str().ok())
      .map(String::from)
  };
  ResponseMetadata {
    usage: read(USAGE_HEADER),
    limit: read(LIMIT_HEADER),
  }
}

#[async_trait]
impl RemoteResourceClient for StravaClient {
  async fn fetch_details(&self, id: ActivityId) -> RemoteResult<Value> {
    self
      .get_json(
        &format!("activities/{}", id),
        &[("include_all_efforts", "true".to_string())],
      )
      .await
  }

  async fn fetch_photos(&self, id: ActivityId) -> RemoteResult<Vec<Value>> {
    self
      .get_json(
        &format!("activities/{}/photos", id),
        &[
          ("size", "2048".to_string()),
          ("photo_sources", "true".to_string()),
        ],
      )
      .await
  }

  async fn fetch_comments(&self, id: ActivityId) -> RemoteResult<Vec<Value>> {
    self
      .get_json(
        &format!("activities/{}/comments", id),
        &[("per_page", "200".to_string())],
      )
      .await
  }

  async fn fetch_streams_or_laps(&self, id: ActivityId) -> RemoteResult<Value> {
    let streams = self
      .get_json::<Value>(
        &format!("activities/{}/streams", id),
        &[
          ("keys", STREAM_KEYS.to_string()),
          ("key_by_type", "true".to_string()),
        ],
      )
      .await;

    match streams {
      // Manual and indoor activities have no streams; keep their laps instead
      Err(RemoteFailure {
        error: Error::Remote { status: 404, .. },
        metadata: streams_metadata,
      }) => {
        debug!(activity_id = id, "No streams, falling back to laps");
        // The 404 still counted against the quota; carry its headers along
        match self
          .get_json::<Vec<Value>>(&format!("activities/{}/laps", id), &[])
          .await
        {
          Ok(laps) => Ok(RemoteResponse::new(
            json!({ "laps": laps.payload }),
            laps.metadata.or(streams_metadata),
          )),
          Err(failure) => Err(RemoteFailure {
            error: failure.error,
            metadata: failure.metadata.or(streams_metadata),
          }),
        }
      }
      other => other,
    }
  }

  async fn fetch_list(&self, _owner_id: OwnerId, query: &ListQuery) -> RemoteResult<Vec<Value>> {
    // The token identifies the athlete; owner id only keys the cache
    let mut params = vec![
      ("page", query.page.to_string()),
      ("per_page", query.per_page.to_string()),
    ];
    if let Some(after) = query.after {
      params.push(("after", after.to_string()));
    }
    if let Some(before) = query.before {
      params.push(("before", before.to_string()));
    }
    self.get_json("athlete/activities", &params).await
  }
}
