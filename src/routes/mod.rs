use axum::Router;
use tracing::warn;

use crate::state::SharedState;

pub mod admin;
pub mod docs;
pub mod health;
pub mod session;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let mut api_router = health::router().merge(session::router());

    if state.config().admin_token().is_some() {
        api_router = api_router.merge(admin::router(state.clone()));
    } else {
        warn!("no admin token configured; admin routes disabled");
    }

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
