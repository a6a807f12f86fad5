//! In-process store backed by one Tokio `watch` channel per key.

use std::{
    collections::HashMap,
    io,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use dashmap::{DashMap, mapref::one::RefMut};
use futures::{StreamExt, future::BoxFuture};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::info;

use super::{SharedStore, StorePath, Subscription};
use crate::dao::{
    models::Fields,
    storage::{StorageError, StorageResult},
};

/// Errors raised while seeding the memory store from disk.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file `{path}`")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse seed file `{path}`")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
#[error("memory store switched offline")]
struct Offline;

/// Shape of the optional seed file loaded at startup.
#[derive(Debug, Default, Deserialize)]
struct SeedFile {
    #[serde(default)]
    admin: Option<Value>,
    #[serde(default)]
    teams: HashMap<String, Value>,
}

#[derive(Clone, Default, Debug)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

#[derive(Debug)]
struct MemoryInner {
    entries: DashMap<StorePath, watch::Sender<Option<Value>>>,
    writes: AtomicUsize,
    available: AtomicBool,
}

impl Default for MemoryInner {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            writes: AtomicUsize::new(0),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated from a JSON seed file (`{"admin": {..}, "teams": {..}}`).
    pub async fn from_seed_file(path: &Path) -> Result<Self, SeedError> {
        let shown = path.display().to_string();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SeedError::Read {
                path: shown.clone(),
                source,
            })?;
        let seed: SeedFile =
            serde_json::from_str(&contents).map_err(|source| SeedError::Parse {
                path: shown.clone(),
                source,
            })?;

        let store = Self::new();
        if let Some(admin) = seed.admin {
            store.put(StorePath::Admin, admin);
        }
        let teams = seed.teams.len();
        for (team_id, record) in seed.teams {
            store.put(StorePath::Team(team_id), record);
        }
        info!(path = %shown, teams, "seeded memory store");
        Ok(store)
    }

    /// Overwrite the whole value at `path`. Not counted as a write.
    pub fn put(&self, path: StorePath, value: Value) {
        self.sender(path).send_replace(Some(value));
    }

    /// Read the value at `path` regardless of availability.
    pub fn snapshot(&self, path: &StorePath) -> Option<Value> {
        self.inner
            .entries
            .get(path)
            .and_then(|sender| sender.borrow().clone())
    }

    /// Number of merge writes accepted so far.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Toggle availability; while offline every operation fails.
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// End every live subscription while keeping stored values, as a dropped
    /// connection would.
    pub fn drop_subscribers(&self) {
        for mut entry in self.inner.entries.iter_mut() {
            let current = entry.borrow().clone();
            *entry = watch::channel(current).0;
        }
    }

    fn sender(&self, path: StorePath) -> RefMut<'_, StorePath, watch::Sender<Option<Value>>> {
        self.inner
            .entries
            .entry(path)
            .or_insert_with(|| watch::channel(None).0)
    }

    fn ensure_available(&self, path: &StorePath) -> StorageResult<()> {
        if self.inner.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable(
                format!("memory store offline while accessing `{path}`"),
                Offline,
            ))
        }
    }

    fn merge(&self, path: StorePath, fields: Fields) {
        self.sender(path).send_modify(|slot| match slot {
            Some(Value::Object(existing)) => existing.extend(fields),
            other => *other = Some(Value::Object(fields)),
        });
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, path: StorePath) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_available(&path)?;
            Ok(store.snapshot(&path))
        })
    }

    fn update(&self, path: StorePath, fields: Fields) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_available(&path)?;
            store.merge(path, fields);
            Ok(())
        })
    }

    fn subscribe(&self, path: StorePath) -> BoxFuture<'static, StorageResult<Subscription>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_available(&path)?;
            let receiver = store.sender(path.clone()).subscribe();
            Ok(Subscription::new(path, WatchStream::new(receiver).map(Ok)))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_available(&StorePath::Admin) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.health_check()
    }
}
