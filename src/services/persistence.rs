//! Key/value persistence service.
//!
//! Entities are JSON objects grouped by entity name (a table) and keyed by
//! `id`.  Every entity is stamped with `id`, `owner_id`, `created_at` and
//! `updated_at`; reads and writes are scoped to the calling owner, so one
//! owner can never see or touch another's rows.
//!
//! - [`PersistenceService::Memory`] — process-lifetime tables.
//! - [`PersistenceService::File`] — same tables, written to a JSON file after
//!   every mutation and reloaded on open.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::services::ServiceError;

/// A stored record.
pub type Entity = Map<String, Value>;

type Tables = HashMap<String, BTreeMap<String, Entity>>;

const RESERVED: [&str; 4] = ["id", "owner_id", "created_at", "updated_at"];

// ── Service enum ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum PersistenceService {
    Memory(MemoryStore),
    File(FileStore),
}

impl PersistenceService {
    pub fn memory() -> Self {
        PersistenceService::Memory(MemoryStore::default())
    }

    /// Open (or create) a file-backed store at `path`.
    pub fn open_file(path: &Path) -> Result<Self, ServiceError> {
        Ok(PersistenceService::File(FileStore::open(path)?))
    }

    fn tables(&self) -> &Arc<RwLock<Tables>> {
        match self {
            PersistenceService::Memory(s) => &s.tables,
            PersistenceService::File(s) => &s.inner.tables,
        }
    }

    async fn flush(&self) -> Result<(), ServiceError> {
        match self {
            PersistenceService::Memory(_) => Ok(()),
            PersistenceService::File(s) => s.flush().await,
        }
    }

    pub async fn get(&self, entity: &str, id: &str, owner_id: &str) -> Result<Option<Entity>, ServiceError> {
        let tables = self.tables().read().await;
        Ok(tables
            .get(entity)
            .and_then(|t| t.get(id))
            .filter(|e| owned_by(e, owner_id))
            .cloned())
    }

    /// All of `owner_id`'s entities, newest first; when `filter` is given,
    /// only those with a string field containing it (case-insensitive).
    pub async fn list(&self, entity: &str, owner_id: &str, filter: Option<&str>) -> Result<Vec<Entity>, ServiceError> {
        let needle = filter.map(str::to_lowercase).filter(|f| !f.is_empty());
        let tables = self.tables().read().await;
        let mut rows: Vec<Entity> = tables
            .get(entity)
            .map(|t| {
                t.values()
                    .filter(|e| owned_by(e, owner_id))
                    .filter(|e| needle.as_deref().is_none_or(|n| matches_text(e, n)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| timestamp(b).cmp(timestamp(a)));
        Ok(rows)
    }

    pub async fn create(&self, entity: &str, fields: Entity, owner_id: &str) -> Result<Entity, ServiceError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let mut row = strip_reserved(fields);
        row.insert("id".into(), Value::String(id.clone()));
        row.insert("owner_id".into(), Value::String(owner_id.to_string()));
        row.insert("created_at".into(), Value::String(now.clone()));
        row.insert("updated_at".into(), Value::String(now));

        {
            let mut tables = self.tables().write().await;
            tables.entry(entity.to_string()).or_default().insert(id.clone(), row.clone());
        }
        debug!(%entity, %id, "entity created");
        self.flush().await?;
        Ok(row)
    }

    /// Merge `fields` into an existing entity.  `None` if absent or not owned.
    pub async fn update(&self, entity: &str, id: &str, fields: Entity, owner_id: &str) -> Result<Option<Entity>, ServiceError> {
        let updated = {
            let mut tables = self.tables().write().await;
            match tables.get_mut(entity).and_then(|t| t.get_mut(id)) {
                Some(row) if owned_by(row, owner_id) => {
                    for (k, v) in strip_reserved(fields) {
                        row.insert(k, v);
                    }
                    row.insert("updated_at".into(), Value::String(Utc::now().to_rfc3339()));
                    Some(row.clone())
                }
                _ => None,
            }
        };
        if updated.is_some() {
            debug!(%entity, %id, "entity updated");
            self.flush().await?;
        }
        Ok(updated)
    }

    /// Remove an entity.  `false` if absent or not owned.
    pub async fn delete(&self, entity: &str, id: &str, owner_id: &str) -> Result<bool, ServiceError> {
        let removed = {
            let mut tables = self.tables().write().await;
            match tables.get_mut(entity) {
                Some(t) if t.get(id).is_some_and(|e| owned_by(e, owner_id)) => t.remove(id).is_some(),
                _ => false,
            }
        };
        if removed {
            debug!(%entity, %id, "entity deleted");
            self.flush().await?;
        }
        Ok(removed)
    }
}

fn owned_by(entity: &Entity, owner_id: &str) -> bool {
    entity.get("owner_id").and_then(Value::as_str) == Some(owner_id)
}

fn timestamp(entity: &Entity) -> &str {
    entity.get("created_at").and_then(Value::as_str).unwrap_or_default()
}

fn matches_text(entity: &Entity, needle: &str) -> bool {
    entity
        .iter()
        .filter(|(k, _)| !RESERVED.contains(&k.as_str()))
        .any(|(_, v)| match v {
            Value::String(s) => s.to_lowercase().contains(needle),
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .any(|s| s.to_lowercase().contains(needle)),
            _ => false,
        })
}

fn strip_reserved(mut fields: Entity) -> Entity {
    for key in RESERVED {
        fields.remove(key);
    }
    fields
}

// ── Backends ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

#[derive(Debug)]
struct FileInner {
    path: PathBuf,
    tables: Arc<RwLock<Tables>>,
    write_lock: tokio::sync::Mutex<()>,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    inner: Arc<FileInner>,
}

impl FileStore {
    /// Load `path` if it exists; an absent file starts empty.
    pub fn open(path: &Path) -> Result<Self, ServiceError> {
        let tables: Tables = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ServiceError::Storage(format!("cannot read {}: {e}", path.display())))?;
            if raw.trim().is_empty() {
                Tables::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| ServiceError::Storage(format!("corrupt store {}: {e}", path.display())))?
            }
        } else {
            Tables::new()
        };
        info!(path = %path.display(), tables = tables.len(), "file store opened");
        Ok(Self {
            inner: Arc::new(FileInner {
                path: path.to_path_buf(),
                tables: Arc::new(RwLock::new(tables)),
                write_lock: tokio::sync::Mutex::new(()),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    async fn flush(&self) -> Result<(), ServiceError> {
        let _serialised = self.inner.write_lock.lock().await;
        let json = {
            let tables = self.inner.tables.read().await;
            serde_json::to_string_pretty(&*tables)
                .map_err(|e| ServiceError::Storage(format!("serialise store: {e}")))?
        };
        if let Some(parent) = self.inner.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| ServiceError::Storage(format!("create {}: {e}", parent.display())))?;
            }
        }
        tokio::fs::write(&self.inner.path, json)
            .await
            .map_err(|e| ServiceError::Storage(format!("write {}: {e}", self.inner.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(v: Value) -> Entity {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn create_stamps_metadata() {
        let store = PersistenceService::memory();
        let row = store
            .create("notes", fields(json!({ "title": "hello", "id": "forged" })), "u1")
            .await
            .unwrap();
        assert_ne!(row["id"], "forged");
        assert_eq!(row["owner_id"], "u1");
        assert!(row.contains_key("created_at"));
        assert!(row.contains_key("updated_at"));
    }

    #[tokio::test]
    async fn owners_are_isolated() {
        let store = PersistenceService::memory();
        let row = store.create("notes", fields(json!({ "title": "mine" })), "u1").await.unwrap();
        let id = row["id"].as_str().unwrap();

        assert!(store.get("notes", id, "u2").await.unwrap().is_none());
        assert!(store.list("notes", "u2", None).await.unwrap().is_empty());
        assert!(store.update("notes", id, fields(json!({ "title": "x" })), "u2").await.unwrap().is_none());
        assert!(!store.delete("notes", id, "u2").await.unwrap());
        assert!(store.get("notes", id, "u1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_filters_case_insensitively() {
        let store = PersistenceService::memory();
        store.create("notes", fields(json!({ "title": "Rust ownership" })), "u1").await.unwrap();
        store.create("notes", fields(json!({ "title": "Go channels", "tags": ["RUST-adjacent"] })), "u1").await.unwrap();
        store.create("notes", fields(json!({ "title": "Python" })), "u1").await.unwrap();

        assert_eq!(store.list("notes", "u1", Some("rust")).await.unwrap().len(), 2);
        assert_eq!(store.list("notes", "u1", None).await.unwrap().len(), 3);
        assert_eq!(store.list("notes", "u1", Some("")).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn update_merges_and_delete_removes() {
        let store = PersistenceService::memory();
        let row = store.create("notes", fields(json!({ "title": "a", "body": "b" })), "u1").await.unwrap();
        let id = row["id"].as_str().unwrap().to_string();

        let updated = store
            .update("notes", &id, fields(json!({ "title": "a2", "owner_id": "u9" })), "u1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["title"], "a2");
        assert_eq!(updated["body"], "b");
        assert_eq!(updated["owner_id"], "u1");

        assert!(store.delete("notes", &id, "u1").await.unwrap());
        assert!(store.get("notes", &id, "u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = PersistenceService::open_file(&path).unwrap();
        let row = store.create("notes", fields(json!({ "title": "persisted" })), "u1").await.unwrap();
        let id = row["id"].as_str().unwrap().to_string();
        drop(store);

        let reopened = PersistenceService::open_file(&path).unwrap();
        let got = reopened.get("notes", &id, "u1").await.unwrap().unwrap();
        assert_eq!(got["title"], "persisted");
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = PersistenceService::open_file(&path).unwrap_err();
        assert!(err.to_string().contains("corrupt store"));
    }
}
