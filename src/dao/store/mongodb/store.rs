use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection,
    bson::{Document, doc},
    change_stream::event::OperationType,
    options::FullDocumentType,
};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{doc_id, document_to_json, set_fields},
};
use crate::dao::{
    models::Fields,
    storage::{StorageError, StorageResult},
    store::{SharedStore, StorePath, Subscription},
};

#[derive(Clone)]
pub struct MongoStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    collection: Collection<Document>,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.client.database(&self.config.database_name)
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, collection) = establish_connection(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.collection = collection;
        Ok(())
    }
}

impl MongoStore {
    /// Establish a connection to MongoDB.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, collection) = establish_connection(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, collection }),
            config,
        });

        Ok(Self { inner })
    }

    async fn collection(&self) -> Collection<Document> {
        let guard = self.inner.state.read().await;
        guard.collection.clone()
    }

    async fn find(&self, path: &StorePath) -> MongoResult<Option<Value>> {
        let collection = self.collection().await;
        let document = collection
            .find_one(doc_id(path))
            .await
            .map_err(|source| MongoDaoError::Read {
                path: path.to_string(),
                source,
            })?;
        Ok(document.map(document_to_json))
    }

    async fn merge(&self, path: &StorePath, fields: &Fields) -> MongoResult<()> {
        let collection = self.collection().await;
        collection
            .update_one(doc_id(path), set_fields(fields))
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::Write {
                path: path.to_string(),
                source,
            })?;
        Ok(())
    }
}

impl SharedStore for MongoStore {
    fn get(&self, path: StorePath) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        Box::pin(async move { store.find(&path).await.map_err(Into::into) })
    }

    fn update(&self, path: StorePath, fields: Fields) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.merge(&path, &fields).await.map_err(Into::into) })
    }

    fn subscribe(&self, path: StorePath) -> BoxFuture<'static, StorageResult<Subscription>> {
        let store = self.clone();
        Box::pin(async move {
            let collection = store.collection().await;
            // Open the change stream before the initial read so no write is missed.
            let mut changes = collection
                .watch()
                .pipeline([doc! { "$match": { "documentKey._id": path.to_string() } }])
                .full_document(FullDocumentType::UpdateLookup)
                .await
                .map_err(|source| MongoDaoError::Watch {
                    path: path.to_string(),
                    source,
                })?;
            let initial = store.find(&path).await?;

            let key = path.to_string();
            let updates = async_stream::stream! {
                yield Ok(initial);
                loop {
                    match changes.try_next().await {
                        Ok(Some(event)) => match event.operation_type {
                            OperationType::Delete => yield Ok(None),
                            _ => {
                                if let Some(document) = event.full_document {
                                    yield Ok(Some(document_to_json(document)));
                                }
                            }
                        },
                        Ok(None) => break,
                        Err(source) => {
                            warn!(path = %key, error = %source, "MongoDB change stream failed");
                            yield Err(StorageError::from(MongoDaoError::Watch {
                                path: key.clone(),
                                source,
                            }));
                            break;
                        }
                    }
                }
            };

            Ok(Subscription::new(path, updates))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.reconnect().await.map_err(Into::into) })
    }
}
