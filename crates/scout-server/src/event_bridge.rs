use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};

use scout_core::events::OrchestrationEvent;
use scout_core::ids::SessionId;
use scout_engine::event_bus::EventBus;

use crate::server::AppState;

/// One SSE message per orchestration event: `data: <json>`.
pub fn to_sse(event: &OrchestrationEvent) -> Event {
    Event::default().data(event.to_wire())
}

/// Drains a session's queue as SSE messages. Ends after `DONE`.
pub fn session_events(
    bus: &Arc<EventBus>,
    session_id: &SessionId,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    bus.subscribe(session_id).map(|event| Ok(to_sse(&event)))
}

/// `GET /api/stream/{session_id}`.
///
/// Attaching creates the session if no producer has yet, so a subscriber
/// that connects before `start` still sees every event.
pub async fn stream_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = SessionId::from_raw(session_id);
    tracing::debug!(session_id = %session_id, "stream subscriber attached");
    Sse::new(session_events(&state.bus, &session_id))
        .keep_alive(KeepAlive::new().interval(state.keep_alive))
}
