//! Cache storage trait with file and SQLite implementations.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Trait for durable key-value backends.
///
/// Keys are grouped by namespace (e.g. "activity", "activity_list"). Values are
/// opaque bytes; decoding is the caller's concern.
pub trait CacheStorage: Send + Sync {
  /// Read a value. `Ok(None)` when the key is absent.
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>>;

  /// Write a value, replacing any previous one.
  fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<()>;

  /// Remove a value. Returns whether it existed.
  fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

  /// All keys in a namespace.
  fn list(&self, namespace: &str) -> Result<Vec<String>>;
}

/// One JSON file per record under `<root>/<namespace>/<key>.json`.
pub struct FileStorage {
  root: PathBuf,
}

impl FileStorage {
  /// Open (creating if needed) a file store rooted at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
    let root = root.into();
    fs::create_dir_all(&root).map_err(|e| {
      Error::StoreUnavailable(format!(
        "failed to create cache directory {}: {}",
        root.display(),
        e
      ))
    })?;
    Ok(Self { root })
  }

  fn namespace_dir(&self, namespace: &str) -> PathBuf {
    self.root.join(sanitize(namespace))
  }

  fn path_for(&self, namespace: &str, key: &str) -> PathBuf {
    self
      .namespace_dir(namespace)
      .join(format!("{}.json", sanitize(key)))
  }
}

/// Keep keys filesystem-safe. Ids and hashes pass through unchanged.
fn sanitize(s: &str) -> String {
  s.chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
        c
      } else {
        '_'
      }
    })
    .collect()
}

impl CacheStorage for FileStorage {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
    match fs::read(self.path_for(namespace, key)) {
      Ok(data) => Ok(Some(data)),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<()> {
    let dir = self.namespace_dir(namespace);
    fs::create_dir_all(&dir)?;

    // Write to a sibling temp file then rename, so readers never see a torn record
    let path = self.path_for(namespace, key);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, &path)?;
    Ok(())
  }

  fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
    match fs::remove_file(self.path_for(namespace, key)) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
      Err(e) => Err(e.into()),
    }
  }

  fn list(&self, namespace: &str) -> Result<Vec<String>> {
    let entries = match fs::read_dir(self.namespace_dir(namespace)) {
      Ok(entries) => entries,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(e.into()),
    };

    let mut keys = Vec::new();
    for entry in entries {
      let path = entry?.path();
      if path.extension().and_then(|e| e.to_str()) != Some("json") {
        continue;
      }
      if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        keys.push(stem.to_string());
      }
    }
    keys.sort();
    Ok(keys)
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (creating if needed) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).map_err(|e| {
        Error::StoreUnavailable(format!("failed to create cache directory: {}", e))
      })?;
    }

    let conn = Connection::open(path).map_err(|e| {
      Error::StoreUnavailable(format!(
        "failed to open cache database at {}: {}",
        path.display(),
        e
      ))
    })?;

    Self::with_connection(conn)
  }

  /// A private in-memory database, gone when dropped.
  pub fn open_in_memory() -> Result<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| Error::StoreUnavailable(format!("lock poisoned: {}", e)))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| Error::StoreUnavailable(format!("failed to run cache migrations: {}", e)))?;
    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    key TEXT NOT NULL,
    data BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
);
"#;

impl CacheStorage for SqliteStorage {
  fn get(&self, namespace: &str, key: &str) -> Result<Option<Vec<u8>>> {
    let conn = self.lock()?;
    let data = conn
      .query_row(
        "SELECT data FROM cache_entries WHERE namespace = ? AND key = ?",
        params![namespace, key],
        |row| row.get::<_, Vec<u8>>(0),
      )
      .optional()?;
    Ok(data)
  }

  fn put(&self, namespace: &str, key: &str, data: &[u8]) -> Result<()> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR REPLACE INTO cache_entries (namespace, key, data, updated_at)
       VALUES (?, ?, ?, ?)",
      params![namespace, key, data, Utc::now().to_rfc3339()],
    )?;
    Ok(())
  }

  fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM cache_entries WHERE namespace = ? AND key = ?",
      params![namespace, key],
    )?;
    Ok(removed > 0)
  }

  fn list(&self, namespace: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT key FROM cache_entries WHERE namespace = ? ORDER BY key")?;
    let keys = stmt
      .query_map(params![namespace], |row| row.get::<_, String>(0))?
      .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(keys)
  }
}
