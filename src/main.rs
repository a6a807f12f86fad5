//! Quiz room binary entrypoint wiring REST, SSE and the shared store.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use futures::future::BoxFuture;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quiz_room::{
    config::{AppConfig, StoreBackend},
    dao::{
        content::FileContentLoader,
        storage::StorageResult,
        store::{SharedStore, memory::MemoryStore},
    },
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let content = Arc::new(FileContentLoader::new(config.content_directory()));
    let backend = config.backend().clone();
    let seed_file = config.seed_file().cloned();
    let app_state = AppState::new(config, content);

    match backend {
        StoreBackend::Memory => {
            let store = match seed_file {
                Some(path) => MemoryStore::from_seed_file(&path)
                    .await
                    .with_context(|| format!("seeding memory store from {}", path.display()))?,
                None => {
                    warn!("memory store started empty; create teams through the admin routes");
                    MemoryStore::new()
                }
            };
            spawn_supervisor(
                app_state.clone(),
                move || -> BoxFuture<'static, StorageResult<Arc<dyn SharedStore>>> {
                    let store = store.clone();
                    Box::pin(async move { Ok(Arc::new(store) as Arc<dyn SharedStore>) })
                },
            );
        }
        StoreBackend::Couch => spawn_supervisor(app_state.clone(), connect_couch),
        StoreBackend::Mongo => spawn_supervisor(app_state.clone(), connect_mongo),
    }

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

fn spawn_supervisor<F>(state: SharedState, connect: F)
where
    F: FnMut() -> BoxFuture<'static, StorageResult<Arc<dyn SharedStore>>> + Send + 'static,
{
    tokio::spawn(storage_supervisor::run(state, connect));
}

#[cfg(feature = "couch-store")]
fn connect_couch() -> BoxFuture<'static, StorageResult<Arc<dyn SharedStore>>> {
    use quiz_room::dao::store::couchdb::{CouchConfig, CouchStore};

    Box::pin(async {
        let config = CouchConfig::from_env()?;
        let store = CouchStore::connect(config).await?;
        Ok(Arc::new(store) as Arc<dyn SharedStore>)
    })
}

#[cfg(not(feature = "couch-store"))]
fn connect_couch() -> BoxFuture<'static, StorageResult<Arc<dyn SharedStore>>> {
    Box::pin(async { Err(backend_disabled("couch-store")) })
}

#[cfg(feature = "mongo-store")]
fn connect_mongo() -> BoxFuture<'static, StorageResult<Arc<dyn SharedStore>>> {
    use quiz_room::dao::store::mongodb::{MongoConfig, MongoStore};

    Box::pin(async {
        let config = MongoConfig::from_env().await?;
        let store = MongoStore::connect(config).await?;
        Ok(Arc::new(store) as Arc<dyn SharedStore>)
    })
}

#[cfg(not(feature = "mongo-store"))]
fn connect_mongo() -> BoxFuture<'static, StorageResult<Arc<dyn SharedStore>>> {
    Box::pin(async { Err(backend_disabled("mongo-store")) })
}

#[cfg(any(not(feature = "couch-store"), not(feature = "mongo-store")))]
fn backend_disabled(feature: &'static str) -> quiz_room::dao::storage::StorageError {
    quiz_room::dao::storage::StorageError::unavailable(
        format!("store backend not compiled in; enable the `{feature}` feature"),
        std::io::Error::from(std::io::ErrorKind::Unsupported),
    )
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
