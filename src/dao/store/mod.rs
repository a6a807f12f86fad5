#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::fmt;

use futures::{
    Stream,
    future::BoxFuture,
    stream::{BoxStream, StreamExt},
};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::dao::{models::Fields, storage::StorageResult};

/// Key-addressed location inside the shared state store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorePath {
    /// Singleton round document written by the admin controller.
    Admin,
    /// Record of a single team.
    Team(String),
}

impl StorePath {
    /// Path of the record owned by `team_id`.
    pub fn team(team_id: impl Into<String>) -> Self {
        StorePath::Team(team_id.into())
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorePath::Admin => f.write_str("admin"),
            StorePath::Team(id) => write!(f, "teams/{id}"),
        }
    }
}

/// Abstraction over the shared state store: point reads, partial merges and
/// per-key change subscriptions.
pub trait SharedStore: Send + Sync {
    /// Read the value stored at `path`, `None` when absent.
    fn get(&self, path: StorePath) -> BoxFuture<'static, StorageResult<Option<Value>>>;
    /// Merge `fields` into the object at `path` without touching sibling fields.
    fn update(&self, path: StorePath, fields: Fields) -> BoxFuture<'static, StorageResult<()>>;
    /// Subscribe to `path`: the current value is delivered first, then every change.
    fn subscribe(&self, path: StorePath) -> BoxFuture<'static, StorageResult<Subscription>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Handle over a live subscription. Dropping it (or calling [`Subscription::cancel`])
/// stops delivery.
pub struct Subscription {
    id: Uuid,
    path: StorePath,
    updates: BoxStream<'static, StorageResult<Option<Value>>>,
}

impl Subscription {
    /// Wrap a backend stream of values for `path`.
    pub fn new<S>(path: StorePath, updates: S) -> Self
    where
        S: Stream<Item = StorageResult<Option<Value>>> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            path,
            updates: updates.boxed(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &StorePath {
        &self.path
    }

    /// Wait for the next value. `None` means the backend closed the feed.
    pub async fn next(&mut self) -> Option<StorageResult<Option<Value>>> {
        self.updates.next().await
    }

    /// Explicitly tear the subscription down.
    pub fn cancel(self) {
        debug!(id = %self.id, path = %self.path, "subscription cancelled");
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_render_like_store_keys() {
        assert_eq!(StorePath::Admin.to_string(), "admin");
        assert_eq!(StorePath::team("T1").to_string(), "teams/T1");
    }
}
