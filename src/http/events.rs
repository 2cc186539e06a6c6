//! `/events` endpoint (§6): server-sent events tailing the `EventBus`
//! (C11) verbatim, one `SignetEvent` per SSE message.

use super::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

pub async fn stream(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.bus.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        let event = item.ok()?;
        Some(Ok(Event::default().json_data(&event).unwrap_or_else(|_| Event::default())))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
