use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::error::{ClientError, Result};
use crate::message::{Envelope, OutboundMessage};
use crate::transport::{Connector, FrameSink, FrameStream};

/// Callback invoked for server-originated events of a registered type.
pub type EventHandler = Box<dyn Fn(&Envelope) + Send + Sync>;

/// Async message socket over a framed transport.
///
/// Assigns outbound correlation ids, keeps the in-flight table, and routes
/// each inbound frame to either its pending request (by id) or the
/// registered event listeners (by type).
pub struct MessageSocket {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    sink: Mutex<Option<FrameSink>>,
    in_flight: DashMap<i64, PendingRequest>,
    listeners: DashMap<String, Vec<EventHandler>>,
    next_id: AtomicI64,
    open: AtomicBool,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

struct PendingRequest {
    request_type: String,
    tx: oneshot::Sender<Result<String>>,
}

impl MessageSocket {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SocketInner {
                sink: Mutex::new(None),
                in_flight: DashMap::new(),
                listeners: DashMap::new(),
                next_id: AtomicI64::new(0),
                open: AtomicBool::new(false),
                reader: std::sync::Mutex::new(None),
            }),
        }
    }

    /// Establish the transport. Resolves once the connection is open.
    pub async fn open(&self, connector: &dyn Connector, server: &str) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        let (sink, stream) =
            connector
                .connect(server)
                .await
                .map_err(|failure| ClientError::Connection {
                    server: server.to_string(),
                    reason: failure.to_string(),
                })?;
        *self.inner.sink.lock().await = Some(sink);
        self.inner.open.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(read_loop(Arc::clone(&self.inner), stream));
        *self.inner.reader.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Close the transport. Closing an already-closed socket is a no-op.
    pub async fn close(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            if let Err(failure) = sink.close().await {
                trace!(error = %failure, "transport close reported an error");
            }
        }
        if let Some(handle) = self.inner.reader.lock().unwrap().take() {
            handle.abort();
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Send a request and await its correlated response frame.
    ///
    /// Assigns the correlation id (monotone, starting at 0) unless the
    /// message carries one, records the pending request, writes the
    /// envelope, and resolves with the raw response string.
    pub async fn send(&self, message: OutboundMessage) -> Result<String> {
        if !self.is_open() {
            return Err(ClientError::ClosedSocket {
                request_type: message.kind,
            });
        }
        let id = message
            .message_id
            .unwrap_or_else(|| self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let envelope = Envelope {
            kind: message.kind,
            params: message.params,
            message_id: id,
        };
        let frame =
            serde_json::to_string(&envelope).map_err(|err| ClientError::Codec(err.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.inner.in_flight.insert(
            id,
            PendingRequest {
                request_type: envelope.kind.clone(),
                tx,
            },
        );

        {
            let mut sink = self.inner.sink.lock().await;
            let Some(sink) = sink.as_mut() else {
                self.inner.in_flight.remove(&id);
                return Err(ClientError::ClosedSocket {
                    request_type: envelope.kind,
                });
            };
            if let Err(failure) = sink.send(frame).await {
                self.inner.in_flight.remove(&id);
                return Err(ClientError::Transport(failure.to_string()));
            }
        }

        match rx.await {
            Ok(result) => result,
            // The entry was dropped by reset_in_flight.
            Err(_) => Err(ClientError::Transport(
                "pending request dropped without a response".to_string(),
            )),
        }
    }

    /// Append a listener for server-originated events of the given type.
    /// Listeners fire in registration order.
    pub fn set_event_callback(&self, event_type: &str, handler: EventHandler) {
        self.inner
            .listeners
            .entry(event_type.to_string())
            .or_default()
            .push(handler);
    }

    /// Drop the in-flight table. Callers still awaiting a response observe a
    /// transport error describing the reset.
    pub fn reset_in_flight(&self) {
        self.inner.in_flight.clear();
    }

    /// Reject every in-flight request with the given error.
    pub fn reject_all(&self, error: &ClientError) {
        self.inner.reject_all(error);
    }

    /// Correlation id and request type of every in-flight request.
    pub fn pending_snapshot(&self) -> Vec<(i64, String)> {
        self.inner
            .in_flight
            .iter()
            .map(|entry| (*entry.key(), entry.value().request_type.clone()))
            .collect()
    }
}

impl Default for MessageSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketInner {
    fn reject_all(&self, error: &ClientError) {
        let ids: Vec<i64> = self.in_flight.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, pending)) = self.in_flight.remove(&id) {
                let _ = pending.tx.send(Err(error.clone()));
            }
        }
    }

    /// Decision rule: correlation-id lookup first, type fan-out second,
    /// silent drop last. The in-flight entry is removed before its
    /// resolver is consumed.
    fn dispatch(&self, raw: &str) {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "discarding malformed frame");
                return;
            }
        };

        if let Some((_, pending)) = self.in_flight.remove(&envelope.message_id) {
            if pending.tx.send(Ok(raw.to_string())).is_err() {
                trace!(
                    message_id = envelope.message_id,
                    "response arrived after its requester went away"
                );
            }
            return;
        }

        if let Some(handlers) = self.listeners.get(&envelope.kind) {
            for handler in handlers.iter() {
                handler(&envelope);
            }
            return;
        }

        trace!(
            kind = %envelope.kind,
            message_id = envelope.message_id,
            "dropping uncorrelated frame"
        );
    }
}

async fn read_loop(inner: Arc<SocketInner>, mut stream: FrameStream) {
    while let Some(item) = stream.next().await {
        match item {
            Ok(frame) => inner.dispatch(&frame),
            Err(failure) => {
                if inner.in_flight.is_empty() {
                    warn!(error = %failure, "transport error with no requests in flight");
                } else {
                    inner.reject_all(&ClientError::Transport(failure.to_string()));
                }
            }
        }
    }
    // A closed transport rejects nothing by itself; the next send observes
    // the closed state.
    inner.open.store(false, Ordering::SeqCst);
}
