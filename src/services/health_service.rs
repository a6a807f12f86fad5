use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report store connectivity and the number of live sessions.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let reachable = match state.store().await {
        Some(store) => match store.health_check().await {
            Ok(()) => !state.is_degraded(),
            Err(err) => {
                warn!(error = %err, "shared store health check failed");
                false
            }
        },
        None => {
            warn!("no shared store installed");
            false
        }
    };

    let sessions = state.sessions().len();
    if reachable {
        HealthResponse::ok(sessions)
    } else {
        HealthResponse::degraded(sessions)
    }
}
