pub mod clock;
pub mod quiz;
pub mod screen;
pub mod state_machine;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, watch};

use crate::{
    config::AppConfig,
    dao::{content::ContentLoader, store::SharedStore},
    error::ServiceError,
    services::{admin_service::AdminController, session_service::SessionHandle},
};

pub use self::state_machine::PlanError;

pub type SharedState = Arc<AppState>;

/// Central application state: store handle, content source and live sessions.
pub struct AppState {
    store: RwLock<Option<Arc<dyn SharedStore>>>,
    content: Arc<dyn ContentLoader>,
    config: AppConfig,
    sessions: DashMap<String, SessionHandle>,
    admin: RwLock<Option<AdminController>>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig, content: Arc<dyn ContentLoader>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            content,
            config,
            sessions: DashMap::new(),
            admin: RwLock::new(None),
            degraded: degraded_tx,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn content(&self) -> Arc<dyn ContentLoader> {
        self.content.clone()
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn SharedStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store or [`ServiceError::Degraded`].
    pub async fn require_store(&self) -> Result<Arc<dyn SharedStore>, ServiceError> {
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a store implementation and leave degraded mode.
    pub async fn set_store(&self, store: Arc<dyn SharedStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store.clone());
        }
        {
            let mut admin = self.admin.write().await;
            *admin = Some(AdminController::new(
                store,
                self.config.session().timer_mode,
                self.config.session().question_duration,
            ));
        }
        self.update_degraded(false).await;
    }

    /// Reference admin controller bound to the installed store.
    pub async fn admin(&self) -> Result<AdminController, ServiceError> {
        let guard = self.admin.read().await;
        guard.clone().ok_or(ServiceError::Degraded)
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Registry of live sessions keyed by team id.
    pub fn sessions(&self) -> &DashMap<String, SessionHandle> {
        &self.sessions
    }
}
