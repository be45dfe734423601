//! Server-sent change stream.
//!
//! `GET /events` opens a long-lived SSE stream of committed changes, one
//! `update` event per changed key. A `?key=` query parameter narrows the
//! stream to a single key; without it the stream carries every commit.
//!
//! The hub delivers through a bounded synchronous channel; a dedicated
//! bridge thread forwards into the async stream. When the client
//! disconnects the async side drops, the bridge send fails, the thread
//! exits, and the hub prunes the subscriber on its next publish.

use crate::state::AppState;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::debug;

#[derive(Deserialize, Debug)]
pub struct EventsParams {
    /// Restrict the stream to one key.
    key: Option<String>,
}

pub async fn events_handler(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = match &params.key {
        Some(key) => state.db.subscribe(key),
        None => state.db.subscribe_all(),
    };
    debug!(key = ?params.key, "subscriber connected");

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    std::thread::spawn(move || {
        while let Ok(change) = receiver.recv() {
            let data = serde_json::json!({ "key": change.key });
            let event = Event::default().event("update").data(data.to_string());
            if tx.send(Ok(event)).is_err() {
                break; // client went away
            }
        }
    });

    Sse::new(UnboundedReceiverStream::new(rx)).keep_alive(KeepAlive::default())
}
