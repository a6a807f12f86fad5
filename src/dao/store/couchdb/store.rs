use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::dao::{
    models::Fields,
    storage::{StorageError, StorageResult},
    store::{SharedStore, StorePath, Subscription},
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        ChangesFilter, ChangesResponse, DatabaseInfo, doc_id, seq_param, strip_metadata,
    },
};

type Document = Map<String, Value>;

/// Outcome of a revision-checked document write.
enum PutOutcome {
    Written,
    Conflict,
}

#[derive(Clone)]
pub struct CouchStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
    changes_timeout: Duration,
    max_merge_attempts: u32,
}

impl CouchStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
            changes_timeout: config.changes_timeout,
            max_merge_attempts: config.max_merge_attempts.max(1),
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.database_url(), path);
        self.authorize(self.client.request(method, url))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn decode<T>(response: reqwest::Response, path: &str) -> CouchResult<T>
    where
        T: DeserializeOwned,
    {
        response
            .json::<T>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: path.to_string(),
                source,
            })
    }

    async fn get_document(&self, doc_id: &str) -> CouchResult<Option<Document>> {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Self::decode(response, doc_id).await.map(Some),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document(&self, doc_id: &str, document: &Document) -> CouchResult<PutOutcome> {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(PutOutcome::Conflict),
            status if status.is_success() => Ok(PutOutcome::Written),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    /// Read-modify-write the document, retrying when another writer bumped the revision.
    async fn merge_document(&self, doc_id: &str, fields: Fields) -> CouchResult<()> {
        for attempt in 1..=self.max_merge_attempts {
            // The fetched document carries `_rev`, which CouchDB checks on PUT.
            let mut document = self.get_document(doc_id).await?.unwrap_or_default();
            document.extend(fields.clone());

            match self.put_document(doc_id, &document).await? {
                PutOutcome::Written => return Ok(()),
                PutOutcome::Conflict => {
                    debug!(doc_id, attempt, "revision conflict while merging; retrying");
                }
            }
        }

        Err(CouchDaoError::MergeConflict {
            path: doc_id.to_string(),
            attempts: self.max_merge_attempts,
        })
    }

    async fn current_seq(&self) -> CouchResult<Value> {
        let url = self.database_url();
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: url.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: url,
                status: response.status(),
            });
        }

        let info: DatabaseInfo = Self::decode(response, &url).await?;
        Ok(info.update_seq)
    }

    async fn poll_changes(&self, doc_id: &str, since: &Value) -> CouchResult<ChangesResponse> {
        const CHANGES: &str = "_changes";
        let timeout_ms = self.changes_timeout.as_millis().to_string();
        let query = [
            ("feed", "longpoll".to_string()),
            ("filter", "_doc_ids".to_string()),
            ("include_docs", "true".to_string()),
            ("since", seq_param(since)),
            ("timeout", timeout_ms),
        ];

        let response = self
            .request(Method::POST, CHANGES)
            .query(&query)
            .json(&ChangesFilter { doc_ids: [doc_id] })
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: CHANGES.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            });
        }

        Self::decode(response, CHANGES).await
    }
}

impl SharedStore for CouchStore {
    fn get(&self, path: StorePath) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.get_document(&doc_id(&path)).await?;
            Ok(document.map(strip_metadata))
        })
    }

    fn update(&self, path: StorePath, fields: Fields) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .merge_document(&doc_id(&path), fields)
                .await
                .map_err(Into::into)
        })
    }

    fn subscribe(&self, path: StorePath) -> BoxFuture<'static, StorageResult<Subscription>> {
        let store = self.clone();
        Box::pin(async move {
            let id = doc_id(&path);
            // Capture the sequence before reading so no change slips between the
            // initial read and the first long-poll.
            let mut since = store.current_seq().await?;
            let initial = store.get_document(&id).await?.map(strip_metadata);

            let updates = async_stream::stream! {
                yield Ok(initial);
                loop {
                    match store.poll_changes(&id, &since).await {
                        Ok(changes) => {
                            for row in changes.results {
                                if row.deleted {
                                    yield Ok(None);
                                } else if let Some(document) = row.doc {
                                    yield Ok(Some(strip_metadata(document)));
                                }
                            }
                            since = changes.last_seq;
                        }
                        Err(err) => {
                            warn!(doc_id = %id, error = %err, "CouchDB change feed failed");
                            yield Err(StorageError::from(err));
                            break;
                        }
                    }
                }
            };

            Ok(Subscription::new(path, updates))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.current_seq().await?;
            Ok(())
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
