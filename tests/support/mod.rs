//! Shared test support: a scripted fake relay behind the transport seam.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use rig_client::message::Envelope;
use rig_client::transport::{Connector, FrameSink, FrameStream, TransportFailure};
use rig_client::{Client, SessionConfig};

/// Connector handing out one prepared channel-backed link, refusing after
/// that (there is no reconnect in this protocol).
pub struct FakeConnector {
    endpoints: StdMutex<Option<(FrameSink, FrameStream)>>,
    connects: Arc<AtomicUsize>,
}

impl FakeConnector {
    /// A connector with no link at all; every connect is refused.
    pub fn refusing() -> Self {
        Self {
            endpoints: StdMutex::new(None),
            connects: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _server: &str,
    ) -> std::result::Result<(FrameSink, FrameStream), TransportFailure> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.endpoints
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TransportFailure::new("connection refused"))
    }
}

/// The relay's end of the link: observe frames the client sent, push
/// responses and events, and inject faults.
pub struct Relay {
    outbound: Mutex<mpsc::UnboundedReceiver<String>>,
    inbound: mpsc::UnboundedSender<std::result::Result<String, TransportFailure>>,
    send_failure: Arc<StdMutex<Option<String>>>,
    connects: Arc<AtomicUsize>,
}

/// Build a connector/relay pair joined by in-memory channels.
pub fn fake_link() -> (FakeConnector, Relay) {
    let (out_tx, out_rx) = mpsc::unbounded::<String>();
    let (in_tx, in_rx) = mpsc::unbounded::<std::result::Result<String, TransportFailure>>();
    let send_failure = Arc::new(StdMutex::new(None::<String>));

    let failure = Arc::clone(&send_failure);
    let sink: FrameSink = Box::pin(futures::sink::unfold(
        out_tx,
        move |tx: mpsc::UnboundedSender<String>, frame: String| {
            let failure = Arc::clone(&failure);
            async move {
                if let Some(reason) = failure.lock().unwrap().clone() {
                    return Err(TransportFailure::new(reason));
                }
                tx.unbounded_send(frame)
                    .map_err(|err| TransportFailure::new(err.to_string()))?;
                Ok::<_, TransportFailure>(tx)
            }
        },
    ));
    let stream: FrameStream = Box::pin(in_rx);

    let connects = Arc::new(AtomicUsize::new(0));
    (
        FakeConnector {
            endpoints: StdMutex::new(Some((sink, stream))),
            connects: Arc::clone(&connects),
        },
        Relay {
            outbound: Mutex::new(out_rx),
            inbound: in_tx,
            send_failure,
            connects,
        },
    )
}

impl Relay {
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Next frame the client wrote, parsed.
    pub async fn recv(&self) -> Envelope {
        let frame = self.recv_raw().await;
        serde_json::from_str(&frame).expect("client sent a malformed frame")
    }

    pub async fn recv_raw(&self) -> String {
        self.outbound
            .lock()
            .await
            .next()
            .await
            .expect("client transport closed")
    }

    /// `None` when the client writes nothing within the window, including
    /// after its write half has gone away. Under the paused test clock this
    /// advances time, so a window just past the probe interval either
    /// captures the probe or proves no timer was pending.
    pub async fn try_recv_within(&self, window: Duration) -> Option<Envelope> {
        let next = async { self.outbound.lock().await.next().await };
        match tokio::time::timeout(window, next).await {
            Ok(Some(frame)) => {
                Some(serde_json::from_str(&frame).expect("client sent a malformed frame"))
            }
            Ok(None) | Err(_) => None,
        }
    }

    pub fn respond(&self, kind: &str, params: Value, message_id: i64) {
        let frame = json!({ "type": kind, "params": params, "messageId": message_id }).to_string();
        self.inbound
            .unbounded_send(Ok(frame))
            .expect("client reader closed");
    }

    pub fn emit_event(&self, kind: &str, params: Value, message_id: i64) {
        self.respond(kind, params, message_id);
    }

    pub fn send_raw(&self, frame: &str) {
        self.inbound
            .unbounded_send(Ok(frame.to_string()))
            .expect("client reader closed");
    }

    /// Surface a transport error on the client's read half.
    pub fn fail_transport(&self, reason: &str) {
        self.inbound
            .unbounded_send(Err(TransportFailure::new(reason)))
            .expect("client reader closed");
    }

    /// Make every subsequent client write fail with the given reason.
    pub fn fail_sends(&self, reason: &str) {
        *self.send_failure.lock().unwrap() = Some(reason.to_string());
    }

    /// End the client's read stream, as a peer close would.
    pub fn drop_connection(&self) {
        self.inbound.close_channel();
    }
}

pub fn session_config(session_id: &str, debug_synchronization_ms: u64) -> SessionConfig {
    SessionConfig {
        server: "ws://localhost:8099".to_string(),
        session_id: session_id.to_string(),
        debug_synchronization_ms,
    }
}

/// Spin on the cooperative scheduler until the predicate holds.
pub async fn wait_until(predicate: impl Fn() -> bool) {
    for _ in 0..1000 {
        if predicate() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

/// Drive a full connect + login + appConnected exchange.
pub async fn connected_client(debug_synchronization_ms: u64) -> (Client, Relay) {
    let (connector, relay) = fake_link();
    let client = Client::new(
        session_config("test-session", debug_synchronization_ms),
        Box::new(connector),
    );
    let connecting = tokio::spawn({
        let client = client.clone();
        async move { client.connect().await }
    });
    let login = relay.recv().await;
    assert_eq!(login.kind, "login");
    relay.respond("loginSuccess", json!({}), login.message_id);
    connecting
        .await
        .expect("connect task panicked")
        .expect("connect failed");
    relay.emit_event("appConnected", json!({}), -1);
    wait_until(|| client.is_connected()).await;
    (client, relay)
}
