use async_trait::async_trait;
use axum::{
    extract::{Path, Query},
    response::{
        sse::{Event, KeepAlive},
        Sse,
    },
    routing::get,
};
use futures_util::Stream;
use parking_lot::Mutex;
use serde::Deserialize;
use std::{
    collections::{HashMap, VecDeque},
    convert::Infallible,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    task::{Context, Poll, Waker},
};

use encore_collab::{session_topic, PublishError, Publisher};

use crate::{
    context::ServerContext,
    errors::{ServerError, ServerResult},
    Router,
};

type ConnectionId = u64;

/// Manages server sent event connections, keyed by the topic they
/// subscribed to. Doubles as the publisher the collab system fans its
/// session events out through.
pub struct SseBroker {
    me: Weak<Self>,
    next_id: AtomicU64,
    connections: Mutex<HashMap<String, Vec<Connection>>>,
}

struct Connection {
    id: ConnectionId,
    pending_messages: Arc<Mutex<VecDeque<serde_json::Value>>>,
    waker: Arc<Mutex<Option<Waker>>>,
}

pub struct ConnectionHandle {
    id: ConnectionId,
    topic: String,
    /// A reference to [Connection]'s pending messages
    pending_messages: Arc<Mutex<VecDeque<serde_json::Value>>>,
    /// A reference to [Connection]'s stored [Waker]
    waker: Arc<Mutex<Option<Waker>>>,
    /// Required to remove connection when dropped
    broker: Weak<SseBroker>,
}

impl SseBroker {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            next_id: AtomicU64::new(0),
            connections: Default::default(),
        })
    }

    pub fn subscribe(&self, topic: &str) -> ConnectionHandle {
        let connection = Connection::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = connection.handle(topic, self.me.clone());

        self.connections
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(connection);

        handle
    }

    fn send_to_topic(&self, topic: &str, payload: serde_json::Value) {
        let connections = self.connections.lock();

        if let Some(subscribers) = connections.get(topic) {
            for connection in subscribers {
                connection.send(payload.clone())
            }
        }
    }

    fn disconnect(&self, topic: &str, id: ConnectionId) {
        let mut connections = self.connections.lock();

        if let Some(subscribers) = connections.get_mut(topic) {
            subscribers.retain(|c| c.id != id);

            if subscribers.is_empty() {
                connections.remove(topic);
            }
        }
    }
}

#[async_trait]
impl Publisher for SseBroker {
    async fn publish(&self, topic: &str, payload: serde_json::Value) -> Result<(), PublishError> {
        self.send_to_topic(topic, payload);
        Ok(())
    }
}

impl Connection {
    fn new(id: ConnectionId) -> Self {
        Self {
            id,
            pending_messages: Default::default(),
            waker: Default::default(),
        }
    }

    fn send(&self, message: serde_json::Value) {
        self.pending_messages.lock().push_back(message);

        if let Some(waker) = self.waker.lock().take() {
            waker.wake()
        }
    }

    fn handle(&self, topic: &str, broker: Weak<SseBroker>) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id,
            topic: topic.to_string(),
            pending_messages: self.pending_messages.clone(),
            waker: self.waker.clone(),
            broker,
        }
    }
}

impl Stream for ConnectionHandle {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut pending_messages = self.pending_messages.lock();

        // Pop from the front so events arrive in publish order
        if let Some(message) = pending_messages.pop_front() {
            return Poll::Ready(Some(Ok(Event::default().data(message.to_string()))));
        }

        *self.waker.lock() = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Some(broker) = self.broker.upgrade() {
            broker.disconnect(&self.topic, self.id)
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventStreamQuery {
    token: String,
}

#[utoipa::path(
    get,
    path = "/v1/sessions/{code}/events",
    tag = "sessions",
    params(
        ("token" = String, Query, description = "A realtime capability token scoped to this session")
    ),
    responses(
        (
            status = 200,
            content_type = "text/event-stream",
            description = "A stream of this session's events"
        ),
        (status = 401, description = "The token is invalid or scoped to another session")
    )
)]
pub(crate) async fn event_stream(
    context: ServerContext,
    Path(code): Path<String>,
    Query(query): Query<EventStreamQuery>,
) -> ServerResult<Sse<ConnectionHandle>> {
    let claims = context.encore.tokens.verify(&query.token)?;
    let topic = session_topic(&code);

    // A token only opens the stream it was scoped to
    if claims.topic != topic {
        return Err(ServerError::InvalidToken);
    }

    Ok(Sse::new(context.sse.subscribe(&topic)).keep_alive(KeepAlive::default()))
}

pub fn router() -> Router {
    Router::new().route("/:code/events", get(event_stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{FutureExt, StreamExt};
    use serde_json::json;

    #[tokio::test]
    async fn delivers_published_payloads_in_order() {
        let broker = SseBroker::new();
        let mut handle = broker.subscribe("session/ABCD1234");

        broker
            .publish("session/ABCD1234", json!({ "event": "first" }))
            .await
            .unwrap();
        broker
            .publish("session/ABCD1234", json!({ "event": "second" }))
            .await
            .unwrap();

        let first = handle.next().await.unwrap().unwrap();
        let second = handle.next().await.unwrap().unwrap();

        assert!(format!("{:?}", first).contains("first"));
        assert!(format!("{:?}", second).contains("second"));
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let broker = SseBroker::new();
        let mut handle = broker.subscribe("session/ABCD1234");

        broker
            .publish("session/OTHER123", json!({ "event": "elsewhere" }))
            .await
            .unwrap();

        // Nothing arrives on the unrelated topic
        assert!(handle.next().now_or_never().is_none());
    }

    #[tokio::test]
    async fn dropped_handles_are_removed() {
        let broker = SseBroker::new();

        let handle = broker.subscribe("session/ABCD1234");
        assert_eq!(broker.connections.lock().len(), 1);

        drop(handle);
        assert!(broker.connections.lock().is_empty());

        // Publishing into the void is fine
        broker
            .publish("session/ABCD1234", json!({ "event": "noop" }))
            .await
            .unwrap();
    }
}
