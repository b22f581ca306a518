use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde_json::Value;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::actions::{Action, ActionKind};
use crate::config::SessionConfig;
use crate::error::{ClientError, Result};
use crate::message::Envelope;
use crate::socket::MessageSocket;
use crate::transport::Connector;

/// Callback invoked with the event params when the application is reported
/// nonresponsive.
pub type NonresponsiveHandler = Box<dyn Fn(&Value) + Send + Sync>;

/// Tester-side RPC client.
///
/// Owns one [`MessageSocket`], drives the login handshake, dispatches typed
/// actions with response verification, and runs the `currentStatus`
/// liveness probe whenever the application is slow to answer.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: SessionConfig,
    connector: Box<dyn Connector>,
    socket: MessageSocket,
    app_connected: AtomicBool,
    app_crashing: AtomicBool,
    pending_crash: std::sync::Mutex<Option<ClientError>>,
    nonresponsive: std::sync::Mutex<Option<NonresponsiveHandler>>,
    probe: ProbeScheduler,
}

impl Client {
    pub fn new(config: SessionConfig, connector: Box<dyn Connector>) -> Self {
        let interval = Duration::from_millis(config.debug_synchronization_ms);
        Self {
            inner: Arc::new(ClientInner {
                config,
                connector,
                socket: MessageSocket::new(),
                app_connected: AtomicBool::new(false),
                app_crashing: AtomicBool::new(false),
                pending_crash: std::sync::Mutex::new(None),
                nonresponsive: std::sync::Mutex::new(None),
                probe: ProbeScheduler::new(interval),
            }),
        }
    }

    /// Client over the production WebSocket transport.
    pub fn with_websocket(config: SessionConfig) -> Self {
        Self::new(config, Box::new(crate::transport::WsConnector))
    }

    /// Socket open and an `appConnected` event received since the last
    /// [`connect`](Self::connect).
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Open the socket, register the event hooks and run the login
    /// handshake. The login exchange never schedules a liveness probe.
    pub async fn connect(&self) -> Result<()> {
        let inner = &self.inner;
        inner
            .config
            .validate()
            .map_err(|err| ClientError::Connection {
                server: inner.config.server.clone(),
                reason: err.to_string(),
            })?;
        inner.app_connected.store(false, Ordering::SeqCst);
        inner
            .socket
            .open(inner.connector.as_ref(), &inner.config.server)
            .await?;
        inner.register_event_hooks();
        inner
            .dispatch(Action::login(&inner.config.session_id), false)
            .await?;
        Ok(())
    }

    /// Send an action and await its verified response.
    ///
    /// Arms the liveness probe for the duration of the exchange; the timer
    /// is cancelled on every exit path, including synchronous send
    /// failures.
    pub async fn send_action(&self, action: Action) -> Result<Value> {
        if !self.inner.is_connected() {
            return Err(ClientError::NotConnected);
        }
        self.inner.dispatch(action, true).await
    }

    pub async fn wait_until_ready(&self) -> Result<()> {
        self.send_action(Action::is_ready()).await.map(drop)
    }

    pub async fn reload_react_native(&self) -> Result<()> {
        self.send_action(Action::reload_react_native()).await.map(drop)
    }

    pub async fn deliver_payload(&self, params: Value) -> Result<()> {
        self.send_action(Action::deliver_payload(params)).await.map(drop)
    }

    pub async fn set_sync_settings(&self, params: Value) -> Result<()> {
        self.send_action(Action::set_sync_settings(params)).await.map(drop)
    }

    pub async fn shake(&self) -> Result<()> {
        self.send_action(Action::shake()).await.map(drop)
    }

    pub async fn set_orientation(&self, params: Value) -> Result<()> {
        self.send_action(Action::set_orientation(params)).await.map(drop)
    }

    pub async fn start_instruments_recording(&self, params: Value) -> Result<()> {
        self.send_action(Action::set_recording_state(params)).await.map(drop)
    }

    pub async fn stop_instruments_recording(&self) -> Result<()> {
        self.send_action(Action::set_recording_state(serde_json::json!({})))
            .await
            .map(drop)
    }

    pub async fn capture_view_hierarchy(&self, params: Value) -> Result<Value> {
        self.send_action(Action::capture_view_hierarchy(params)).await
    }

    pub async fn wait_for_background(&self) -> Result<()> {
        self.send_action(Action::wait_for_background()).await.map(drop)
    }

    pub async fn wait_for_active(&self) -> Result<()> {
        self.send_action(Action::wait_for_active()).await.map(drop)
    }

    /// Query the application for what it is currently busy with.
    ///
    /// Serialised through the probe-flight token so at most one
    /// `currentStatus` request is outstanding at any time, scheduled or
    /// manual.
    pub async fn current_status(&self) -> Result<Value> {
        if !self.inner.is_connected() {
            return Err(ClientError::NotConnected);
        }
        let _flight = self.inner.probe.flight.lock().await;
        self.inner.dispatch(Action::current_status(), false).await
    }

    /// Register the callback invoked with the event params when an
    /// `AppNonresponsiveDetected` event arrives.
    pub fn set_nonresponsiveness_listener(&self, handler: NonresponsiveHandler) {
        *self.inner.nonresponsive.lock().unwrap() = Some(handler);
    }

    /// Warn about requests still awaiting a response and drop them.
    ///
    /// Outstanding `currentStatus` probes alone are not worth reporting.
    pub fn dump_pending_requests(&self, test_name: Option<&str>) {
        let pending = self.inner.socket.pending_snapshot();
        let blocking: Vec<String> = pending
            .iter()
            .filter(|(_, request_type)| {
                request_type.as_str() != ActionKind::CurrentStatus.request_type()
            })
            .map(|(id, request_type)| format!("#{id} {request_type}"))
            .collect();
        if blocking.is_empty() {
            return;
        }
        let summary = blocking.join(", ");
        match test_name {
            Some(name) => warn!(test = name, pending = %summary, "requests still waiting for a response"),
            None => warn!(pending = %summary, "requests still waiting for a response"),
        }
        self.inner.socket.reset_in_flight();
    }

    /// Return and clear the stored crash error, if the application reported
    /// one since the last poll.
    pub fn get_pending_crash_and_reset(&self) -> Option<ClientError> {
        self.inner.pending_crash.lock().unwrap().take()
    }

    /// Cancel the probe timer, send the terminal `cleanup` action unless the
    /// app is unreachable or crashing, and close the socket.
    pub async fn cleanup(&self, stop_runner: bool) {
        self.inner.probe.cancel();
        if self.inner.is_connected() && !self.inner.app_crashing.load(Ordering::SeqCst) {
            if let Err(error) = self.inner.dispatch(Action::cleanup(stop_runner), false).await {
                warn!(%error, "cleanup action failed");
            }
        }
        self.inner.app_connected.store(false, Ordering::SeqCst);
        self.inner.socket.close().await;
    }
}

impl ClientInner {
    fn is_connected(&self) -> bool {
        self.socket.is_open() && self.app_connected.load(Ordering::SeqCst)
    }

    fn register_event_hooks(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.socket.set_event_callback(
            "appConnected",
            Box::new(move |_envelope| {
                if let Some(inner) = weak.upgrade() {
                    inner.app_connected.store(true, Ordering::SeqCst);
                }
            }),
        );

        let weak = Arc::downgrade(self);
        self.socket.set_event_callback(
            "appDisconnected",
            Box::new(move |_envelope| {
                if let Some(inner) = weak.upgrade() {
                    inner.app_connected.store(false, Ordering::SeqCst);
                }
            }),
        );

        let weak = Arc::downgrade(self);
        self.socket.set_event_callback(
            "AppWillTerminateWithError",
            Box::new(move |envelope| {
                if let Some(inner) = weak.upgrade() {
                    let message = crash_message(&envelope.params);
                    inner.app_crashing.store(true, Ordering::SeqCst);
                    *inner.pending_crash.lock().unwrap() =
                        Some(ClientError::AppCrash { message });
                }
            }),
        );

        let weak = Arc::downgrade(self);
        self.socket.set_event_callback(
            "AppNonresponsiveDetected",
            Box::new(move |envelope| {
                if let Some(inner) = weak.upgrade() {
                    if let Some(handler) = inner.nonresponsive.lock().unwrap().as_ref() {
                        handler(&envelope.params);
                    }
                }
            }),
        );
    }

    /// Write the action, await the correlated response and verify it.
    ///
    /// With `arm_probe`, a drop-guard owns the liveness timer for the
    /// duration of the exchange; `currentStatus` never arms a probe for
    /// itself.
    async fn dispatch(self: &Arc<Self>, action: Action, arm_probe: bool) -> Result<Value> {
        let _probe = if arm_probe && action.kind != ActionKind::CurrentStatus {
            self.probe.arm(Arc::clone(self))
        } else {
            ProbeGuard::disarmed()
        };

        let raw = self.socket.send(action.request()).await?;
        let response: Envelope =
            serde_json::from_str(&raw).map_err(|err| ClientError::Codec(err.to_string()))?;

        if let Some(message) = response.error_message() {
            return Err(ClientError::Server { message });
        }
        if !action.accepts(&response.kind) {
            return Err(ClientError::UnexpectedResponse {
                received: response.kind,
                expected: action.kind.expected_responses().join(", "),
            });
        }
        action.handle(response)
    }
}

fn crash_message(params: &Value) -> String {
    if let Some(text) = params.get("errorDetails").and_then(Value::as_str) {
        return text.to_string();
    }
    if let Some(value) = params.get("error") {
        if let Some(text) = value.as_str() {
            return text.to_string();
        }
        if let Some(message) = value.get("message").and_then(Value::as_str) {
            return message.to_string();
        }
    }
    "the app terminated without details".to_string()
}

/// Liveness-probe scheduler.
///
/// One timer slot for the whole client. Arming spawns a probe task and
/// replaces whatever occupied the slot; the per-action guard cancels only
/// the timer it armed (generation tag), so a later action's timer survives
/// an earlier action completing. The flight token keeps the global
/// at-most-one-probe invariant.
struct ProbeScheduler {
    interval: Duration,
    flight: tokio::sync::Mutex<()>,
    timer: std::sync::Mutex<Option<ProbeTimer>>,
    generations: AtomicU64,
}

struct ProbeTimer {
    generation: u64,
    handle: AbortHandle,
}

impl ProbeScheduler {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            flight: tokio::sync::Mutex::new(()),
            timer: std::sync::Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    fn arm(&self, inner: Arc<ClientInner>) -> ProbeGuard<'_> {
        if self.interval.is_zero() {
            return ProbeGuard::disarmed();
        }
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(probe_loop(inner)).abort_handle();
        let mut slot = self.timer.lock().unwrap();
        if let Some(previous) = slot.replace(ProbeTimer { generation, handle }) {
            previous.handle.abort();
        }
        drop(slot);
        ProbeGuard {
            scheduler: Some(self),
            generation,
        }
    }

    fn disarm(&self, generation: u64) {
        let mut slot = self.timer.lock().unwrap();
        if slot
            .as_ref()
            .is_some_and(|timer| timer.generation == generation)
        {
            if let Some(timer) = slot.take() {
                timer.handle.abort();
            }
        }
    }

    /// Cancel whatever is armed, regardless of owner. Idempotent.
    fn cancel(&self) {
        if let Some(timer) = self.timer.lock().unwrap().take() {
            timer.handle.abort();
        }
    }
}

/// Cancels the armed timer when the originating action resolves or rejects.
struct ProbeGuard<'a> {
    scheduler: Option<&'a ProbeScheduler>,
    generation: u64,
}

impl ProbeGuard<'_> {
    fn disarmed() -> Self {
        Self {
            scheduler: None,
            generation: 0,
        }
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if let Some(scheduler) = self.scheduler {
            scheduler.disarm(self.generation);
        }
    }
}

/// Timer body: sleep, probe, and re-arm by looping while the originating
/// action is still pending. Resolution of that action aborts this task; an
/// abort mid-probe releases the flight token at the await point.
async fn probe_loop(inner: Arc<ClientInner>) {
    loop {
        tokio::time::sleep(inner.probe.interval).await;
        // Another status query already in flight: skip this firing and
        // retry at the next interval.
        let Ok(_flight) = inner.probe.flight.try_lock() else {
            continue;
        };
        match inner.dispatch(Action::current_status(), false).boxed().await {
            Ok(status) => debug!(?status, "application status while a response is pending"),
            Err(error) => {
                debug!(%error, "status probe failed");
                return;
            }
        }
    }
}
