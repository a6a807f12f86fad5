use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::{
    dto::{
        session::SessionView,
        sse::{Handshake, ServerEvent},
    },
    error::ServiceError,
    services::session_service,
    state::SharedState,
};

const HANDSHAKE_EVENT: &str = "handshake";
const VIEW_EVENT: &str = "session";
const CLOSED_EVENT: &str = "closed";

/// Subscribe to the published views of the session owned by `team_id`.
pub fn subscribe_session(
    state: &SharedState,
    team_id: &str,
) -> Result<(watch::Receiver<SessionView>, Handshake), ServiceError> {
    let handle = session_service::session(state, team_id)?;
    let handshake = Handshake {
        team_id: handle.team_id().to_string(),
        degraded: state.is_degraded(),
    };
    Ok((handle.watch(), handshake))
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

fn view_event(view: &SessionView) -> Option<Event> {
    match ServerEvent::json(Some(VIEW_EVENT.to_string()), view) {
        Ok(payload) => Some(to_event(payload)),
        Err(err) => {
            warn!(error = %err, "failed to encode session view");
            None
        }
    }
}

/// Forward every published view as an SSE event, starting with a handshake
/// and the current view, until the client or the session goes away.
pub fn to_sse_stream(
    mut receiver: watch::Receiver<SessionView>,
    handshake: Handshake,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    tokio::spawn(async move {
        let team_id = handshake.team_id.clone();
        if let Ok(payload) = ServerEvent::json(Some(HANDSHAKE_EVENT.to_string()), &handshake)
            && tx.send(Ok(to_event(payload))).await.is_err()
        {
            return;
        }

        let current = receiver.borrow_and_update().clone();
        if let Some(event) = view_event(&current)
            && tx.send(Ok(event)).await.is_err()
        {
            return;
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                changed = receiver.changed() => {
                    if changed.is_err() {
                        debug!(team_id, "session stopped; closing stream");
                        let closed = Event::default().event(CLOSED_EVENT).data(team_id.clone());
                        let _ = tx.send(Ok(closed)).await;
                        break;
                    }
                    let view = receiver.borrow_and_update().clone();
                    if let Some(event) = view_event(&view)
                        && tx.send(Ok(event)).await.is_err()
                    {
                        break;
                    }
                }
            }
        }

        info!(team_id, "session SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
