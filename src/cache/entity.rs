//! At-rest record shapes for cached activities and list snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::traits::{ResourceKind, SubResource};

pub type ActivityId = u64;
pub type OwnerId = u64;

/// A cached activity assembled from up to four sub-resources.
///
/// A `*_fetched_at` timestamp is `None` until that sub-resource has been fetched
/// successfully. Completeness is judged only by these timestamps: an activity
/// with zero photos still has `photos_fetched_at` set once photos were fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedEntity {
  pub id: ActivityId,
  pub owner_id: OwnerId,
  pub details: Option<Value>,
  pub details_fetched_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "deserialize_null_as_empty")]
  pub photos: Vec<Value>,
  pub photos_fetched_at: Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "deserialize_null_as_empty")]
  pub comments: Vec<Value>,
  pub comments_fetched_at: Option<DateTime<Utc>>,
  pub streams: Option<Value>,
  pub streams_fetched_at: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub last_updated_at: DateTime<Utc>,
}

fn deserialize_null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
  D: Deserializer<'de>,
{
  let v: Option<Vec<Value>> = Option::deserialize(deserializer)?;
  Ok(v.unwrap_or_default())
}

impl CachedEntity {
  /// A fresh record with every sub-resource unfetched.
  pub fn new(id: ActivityId, owner_id: OwnerId, now: DateTime<Utc>) -> Self {
    Self {
      id,
      owner_id,
      details: None,
      details_fetched_at: None,
      photos: Vec::new(),
      photos_fetched_at: None,
      comments: Vec::new(),
      comments_fetched_at: None,
      streams: None,
      streams_fetched_at: None,
      created_at: now,
      last_updated_at: now,
    }
  }

  pub fn fetched_at(&self, kind: ResourceKind) -> Option<DateTime<Utc>> {
    match kind {
      ResourceKind::Details => self.details_fetched_at,
      ResourceKind::Photos => self.photos_fetched_at,
      ResourceKind::Comments => self.comments_fetched_at,
      ResourceKind::Streams => self.streams_fetched_at,
    }
  }

  pub fn has(&self, kind: ResourceKind) -> bool {
    self.fetched_at(kind).is_some()
  }

  /// True iff every required kind has been fetched at least once.
  pub fn is_complete(&self, required: &[ResourceKind]) -> bool {
    required.iter().all(|kind| self.has(*kind))
  }

  /// Required kinds that have never been fetched.
  pub fn missing(&self, required: &[ResourceKind]) -> Vec<ResourceKind> {
    required.iter().copied().filter(|k| !self.has(*k)).collect()
  }

  /// The cached payload for `kind`, if it has been fetched.
  pub fn sub_resource(&self, kind: ResourceKind) -> Option<SubResource> {
    if !self.has(kind) {
      return None;
    }
    Some(match kind {
      ResourceKind::Details => SubResource::Details(self.details.clone().unwrap_or(Value::Null)),
      ResourceKind::Photos => SubResource::Photos(self.photos.clone()),
      ResourceKind::Comments => SubResource::Comments(self.comments.clone()),
      ResourceKind::Streams => SubResource::Streams(self.streams.clone().unwrap_or(Value::Null)),
    })
  }

  /// Replace one sub-resource and stamp it. Other slots are left untouched.
  pub fn apply(&mut self, resource: SubResource, now: DateTime<Utc>) {
    match resource {
      SubResource::Details(v) => {
        self.details = Some(v);
        self.details_fetched_at = Some(now);
      }
      SubResource::Photos(v) => {
        self.photos = v;
        self.photos_fetched_at = Some(now);
      }
      SubResource::Comments(v) => {
        self.comments = v;
        self.comments_fetched_at = Some(now);
      }
      SubResource::Streams(v) => {
        self.streams = Some(v);
        self.streams_fetched_at = Some(now);
      }
    }
    self.last_updated_at = now;
  }
}

/// Time window of a list query, as epoch seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListWindow {
  pub after: Option<i64>,
  pub before: Option<i64>,
}

/// A cached listing of activity summaries for one owner and window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedListSnapshot {
  pub owner_id: OwnerId,
  pub query: ListWindow,
  pub entities: Vec<Value>,
  pub fetched_at: DateTime<Utc>,
  pub total_count: usize,
}

impl CachedListSnapshot {
  /// Stable storage key for an (owner, window) pair.
  pub fn cache_key(owner_id: OwnerId, window: &ListWindow) -> String {
    let input = format!(
      "list:{}:{}:{}",
      owner_id,
      window.after.map(|t| t.to_string()).unwrap_or_default(),
      window.before.map(|t| t.to_string()).unwrap_or_default()
    );

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Activity ids of the summaries, in listing order. Summaries without a
  /// numeric `id` are skipped.
  pub fn ids(&self) -> Vec<ActivityId> {
    self
      .entities
      .iter()
      .filter_map(|s| s.get("id").and_then(Value::as_u64))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_new_record_serializes_all_fields() {
    let now = Utc::now();
    let entity = CachedEntity::new(42, 7, now);
    let value = serde_json::to_value(&entity).unwrap();
    let obj = value.as_object().unwrap();

    for field in [
      "id",
      "ownerId",
      "details",
      "detailsFetchedAt",
      "photos",
      "photosFetchedAt",
      "comments",
      "commentsFetchedAt",
      "streams",
      "streamsFetchedAt",
      "createdAt",
      "lastUpdatedAt",
    ] {
      assert!(obj.contains_key(field), "missing field {}", field);
    }
    assert_eq!(obj.len(), 12);
    assert_eq!(value["details"], Value::Null);
    assert_eq!(value["detailsFetchedAt"], Value::Null);
    assert_eq!(value["photos"], json!([]));
    assert_eq!(value["comments"], json!([]));
    assert_eq!(value["streams"], Value::Null);
  }

  #[test]
  fn test_empty_payload_counts_as_fetched() {
    let now = Utc::now();
    let mut entity = CachedEntity::new(1, 1, now);
    entity.apply(SubResource::Photos(vec![]), now);

    assert!(entity.is_complete(&[ResourceKind::Photos]));
    assert!(!entity.is_complete(&[ResourceKind::Photos, ResourceKind::Comments]));
    assert_eq!(
      entity.missing(&ResourceKind::ALL),
      vec![
        ResourceKind::Details,
        ResourceKind::Comments,
        ResourceKind::Streams
      ]
    );
  }

  #[test]
  fn test_non_empty_payload_without_timestamp_is_incomplete() {
    let mut entity = CachedEntity::new(1, 1, Utc::now());
    entity.comments = vec![json!({"text": "nice"})];

    assert!(!entity.is_complete(&[ResourceKind::Comments]));
    assert!(entity.sub_resource(ResourceKind::Comments).is_none());
  }

  #[test]
  fn test_apply_leaves_other_slots() {
    let created = Utc::now();
    let mut entity = CachedEntity::new(1, 1, created);
    entity.apply(SubResource::Details(json!({"name": "Morning Run"})), created);

    let later = created + chrono::Duration::seconds(5);
    entity.apply(SubResource::Comments(vec![json!({"id": 3})]), later);

    assert_eq!(entity.details_fetched_at, Some(created));
    assert_eq!(entity.comments_fetched_at, Some(later));
    assert_eq!(entity.last_updated_at, later);
    assert_eq!(entity.created_at, created);
  }

  #[test]
  fn test_null_arrays_read_as_empty() {
    let raw = json!({
      "id": 5,
      "ownerId": 9,
      "details": null,
      "detailsFetchedAt": null,
      "photos": null,
      "photosFetchedAt": null,
      "comments": null,
      "commentsFetchedAt": "2024-05-01T10:00:00Z",
      "streams": null,
      "streamsFetchedAt": null,
      "createdAt": "2024-05-01T10:00:00Z",
      "lastUpdatedAt": "2024-05-01T10:00:00Z"
    });
    let entity: CachedEntity = serde_json::from_value(raw).unwrap();
    assert!(entity.photos.is_empty());
    assert!(entity.has(ResourceKind::Comments));
  }

  #[test]
  fn test_snapshot_key_depends_on_window() {
    let a = CachedListSnapshot::cache_key(1, &ListWindow::default());
    let b = CachedListSnapshot::cache_key(
      1,
      &ListWindow {
        after: Some(100),
        before: None,
      },
    );
    assert_ne!(a, b);
    assert_eq!(a, CachedListSnapshot::cache_key(1, &ListWindow::default()));
    assert_eq!(a.len(), 64);
  }

  #[test]
  fn test_snapshot_ids() {
    let snapshot = CachedListSnapshot {
      owner_id: 1,
      query: ListWindow::default(),
      entities: vec![json!({"id": 10}), json!({"name": "no id"}), json!({"id": 11})],
      fetched_at: Utc::now(),
      total_count: 3,
    };
    assert_eq!(snapshot.ids(), vec![10, 11]);
  }
}
