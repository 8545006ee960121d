use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Router,
};
use futures::stream::{self, Stream};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use super::method_fallback;
use crate::store::{ChangeEvent, Direction, ItemQuery, SortField};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/watchItems", get(watch_items).fallback(method_fallback))
}

async fn snapshot_event(state: &AppState) -> Event {
    let query = ItemQuery::ordered(SortField::CreatedAt, Direction::Desc);

    let items = match state.store.list(&query).await {
        Ok(items) => items,
        Err(e) => {
            tracing::error!("watchItems snapshot failed: {}", e);
            return Event::default().event("error").data("Internal error");
        }
    };

    match Event::default().event("snapshot").json_data(&items) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!("watchItems snapshot encoding failed: {}", e);
            Event::default().event("error").data("Internal error")
        }
    }
}

/// Wait for the next change. Bursts of queued changes collapse into one.
/// Returns false once the store stops publishing.
async fn next_change(changes: &mut broadcast::Receiver<ChangeEvent>) -> bool {
    match changes.recv().await {
        Ok(_) => {}
        Err(RecvError::Lagged(skipped)) => {
            tracing::debug!("watchItems lagged behind {} changes", skipped);
        }
        Err(RecvError::Closed) => return false,
    }

    loop {
        match changes.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Closed) => return false,
        }
    }
}

/// GET /watchItems: a `snapshot` event with every item (newest first) on
/// connect and again after each change to the collection.
async fn watch_items(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before the first snapshot so no change slips between them
    let changes = state.store.subscribe();
    tracing::debug!("watchItems subscriber connected");

    let stream = stream::unfold(
        (state, changes, true),
        |(state, mut changes, first)| async move {
            if !first && !next_change(&mut changes).await {
                return None;
            }
            let event = snapshot_event(&state).await;
            Some((Ok(event), (state, changes, false)))
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}
