//! The connection engine: handshake, receive loop, keep-alive, and the
//! reconnection policy. See module-level docs on [`TunnelClient`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use tungo_protocol::{ClientHello, Frame, ServerHello};

use crate::error::{Result, TunnelError};
use crate::events::Events;
use crate::multiplexer;
use crate::options::{Options, TunnelInfo};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A ping is emitted on this cadence while connected.
const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

enum StreamEvent {
    Data(Vec<u8>),
    End,
}

struct StreamHandle {
    tx: mpsc::Sender<StreamEvent>,
    task: JoinHandle<()>,
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    options: StdMutex<Options>,
    events: Events,
    http: reqwest::Client,
    state: StdRwLock<EngineState>,
    info: StdMutex<Option<TunnelInfo>>,
    reconnect_attempts: AtomicU32,
    supervisor: TokioMutex<Option<Supervisor>>,
}

impl Inner {
    fn set_state(&self, state: EngineState) {
        *self.state.write().unwrap() = state;
    }

    fn set_info(&self, info: Option<TunnelInfo>) {
        *self.info.lock().unwrap() = info;
    }
}

/// The client-side tunnel engine: owns the control connection's lifecycle
/// (handshake, keep-alive, reconnection) and the per-stream multiplexer.
///
/// Cloning is cheap (an `Arc` internally) and every clone refers to the same
/// running engine; this is what lets `start()` hand a copy into the
/// supervisor task it spawns.
#[derive(Clone)]
pub struct TunnelClient {
    inner: Arc<Inner>,
}

impl TunnelClient {
    pub fn new(options: Options, events: Events) -> Result<Self> {
        options.validate()?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| TunnelError::ConfigInvalid(format!("failed to build http client: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                options: StdMutex::new(options),
                events,
                http,
                state: StdRwLock::new(EngineState::Idle),
                info: StdMutex::new(None),
                reconnect_attempts: AtomicU32::new(0),
                supervisor: TokioMutex::new(None),
            }),
        })
    }

    /// Dial the rendezvous server, perform the hello handshake, and spawn the
    /// background receive/keep-alive/reconnection tasks. Rejects with
    /// [`TunnelError::AlreadyRunning`] if a session is already active or
    /// reconnecting.
    pub async fn start(&self) -> Result<TunnelInfo> {
        {
            let state = *self.inner.state.read().unwrap();
            if matches!(state, EngineState::Connecting | EngineState::Connected | EngineState::Reconnecting) {
                return Err(TunnelError::AlreadyRunning);
            }
        }

        self.inner.set_state(EngineState::Connecting);
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);

        match establish(&self.inner).await {
            Ok((ws, info)) => {
                self.inner.set_info(Some(info.clone()));
                self.inner.set_state(EngineState::Connected);
                self.inner.events.fire_connect(info.clone());
                self.inner.events.fire_status("connected");

                let cancel = CancellationToken::new();
                let supervisor_inner = self.inner.clone();
                let supervisor_cancel = cancel.clone();
                let handle = tokio::spawn(async move {
                    run_supervisor(supervisor_inner, ws, supervisor_cancel).await;
                });
                *self.inner.supervisor.lock().await = Some(Supervisor { cancel, handle });

                Ok(info)
            }
            Err(e) => {
                self.inner.set_state(EngineState::Idle);
                Err(e)
            }
        }
    }

    /// Idempotent. Cancels every task the engine owns and releases all
    /// resources. Safe to call from any state, including mid-reconnect.
    pub async fn stop(&self) {
        {
            let state = *self.inner.state.read().unwrap();
            if state == EngineState::Stopped {
                return;
            }
        }

        if let Some(supervisor) = self.inner.supervisor.lock().await.take() {
            supervisor.cancel.cancel();
            let _ = supervisor.handle.await;
        }

        self.inner.set_info(None);
        self.inner.reconnect_attempts.store(0, Ordering::SeqCst);
        self.inner.set_state(EngineState::Stopped);
        self.inner.events.fire_status("stopped");
    }

    pub fn get_info(&self) -> Option<TunnelInfo> {
        self.inner.info.lock().unwrap().clone()
    }

    pub fn is_active(&self) -> bool {
        matches!(*self.inner.state.read().unwrap(), EngineState::Connected)
    }
}

/// Dial the control channel and run the hello handshake, bounded end-to-end
/// by `connect_timeout`. On success, the server-assigned subdomain is
/// persisted into `Options` so the next reconnect requests the same one.
async fn establish(inner: &Arc<Inner>) -> Result<(WsStream, TunnelInfo)> {
    let (url, secret_key, requested_subdomain, connect_timeout) = {
        let opts = inner.options.lock().unwrap();
        (
            opts.websocket_url(),
            opts.secret_key.clone(),
            opts.subdomain.clone(),
            Duration::from_secs(opts.connect_timeout_secs),
        )
    };

    tracing::info!(url = %url, "dialing tunnel server");

    let (mut ws, _response) = match tokio::time::timeout(connect_timeout, connect_async(&url)).await {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => return Err(TunnelError::DialFailed(e.to_string())),
        Err(_) => return Err(TunnelError::DialTimeout),
    };

    let hello = ClientHello::new(requested_subdomain.as_deref(), secret_key.as_deref());
    let hello_text = hello.encode()?;
    ws.send(Message::Text(hello_text.into()))
        .await
        .map_err(|e| TunnelError::DialFailed(e.to_string()))?;

    let server_hello = match tokio::time::timeout(connect_timeout, ws.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => ServerHello::decode(&text)?,
        Ok(Some(Ok(_other))) => {
            return Err(TunnelError::HandshakeRejected("unexpected message type from server".into()))
        }
        Ok(Some(Err(e))) => return Err(TunnelError::DialFailed(e.to_string())),
        Ok(None) => {
            return Err(TunnelError::HandshakeRejected("connection closed before server hello".into()))
        }
        Err(_) => return Err(TunnelError::HandshakeTimeout),
    };

    if !server_hello.is_success() {
        return Err(TunnelError::HandshakeRejected(server_hello.diagnostic()));
    }

    let subdomain = server_hello.sub_domain.clone().unwrap_or_default();
    if !subdomain.is_empty() {
        inner.options.lock().unwrap().subdomain = Some(subdomain.clone());
    }

    let info = TunnelInfo {
        url: server_hello.resolved_url().unwrap_or_default(),
        subdomain,
    };
    tracing::info!(url = %info.url, "tunnel established");
    Ok((ws, info))
}

/// Drives one control connection to completion, then (unless cancelled) runs
/// the reconnection policy as a loop, not recursion, so stack depth stays
/// constant across arbitrarily long outages.
async fn run_supervisor(inner: Arc<Inner>, initial_ws: WsStream, cancel: CancellationToken) {
    let mut ws = initial_ws;
    loop {
        let disconnect_reason = run_session(&inner, ws, &cancel).await;

        if cancel.is_cancelled() {
            return;
        }

        let reason = disconnect_reason.unwrap_or_else(|| "connection closed".to_string());
        inner.set_state(EngineState::Reconnecting);
        inner.events.fire_disconnect(reason);

        match reconnect_loop(&inner, &cancel).await {
            Some(new_ws) => ws = new_ws,
            None => return,
        }
    }
}

/// Runs the receive loop, writer loop, and keep-alive loop for one
/// connection. Returns `None` if cancelled (engine stopping), `Some(reason)`
/// if the channel was lost and should trigger a reconnect.
async fn run_session(inner: &Arc<Inner>, ws: WsStream, cancel: &CancellationToken) -> Option<String> {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Frame>(64);

    // Single writer task: every other task only ever holds a `Sender` clone,
    // so writes to the sink are always serialized.
    let writer_cancel = cancel.clone();
    let writer_handle: JoinHandle<()> = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    let text = match frame.encode() {
                        Ok(text) => text,
                        Err(e) => { tracing::warn!(error = %e, "failed to encode outbound frame"); continue; }
                    };
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    let ping_tx = tx.clone();
    let ping_cancel = cancel.clone();
    let ping_handle: JoinHandle<()> = tokio::spawn(async move {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        interval.tick().await; // the first tick fires immediately; skip it
        loop {
            tokio::select! {
                _ = ping_cancel.cancelled() => break,
                _ = interval.tick() => {
                    if ping_tx.send(Frame::Ping).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut streams: HashMap<String, StreamHandle> = HashMap::new();

    let result = 'session: loop {
        tokio::select! {
            _ = cancel.cancelled() => break 'session None,
            incoming = stream.next() => {
                match incoming {
                    None => {
                        let err = TunnelError::ChannelLost("connection closed".into());
                        break 'session Some(err.to_string());
                    }
                    Some(Err(e)) => {
                        let err = TunnelError::ChannelLost(format!("websocket error: {e}"));
                        inner.events.fire_error(err.to_string());
                        break 'session Some(err.to_string());
                    }
                    Some(Ok(Message::Close(_))) => {
                        let err = TunnelError::ChannelLost("server closed connection".into());
                        break 'session Some(err.to_string());
                    }
                    Some(Ok(Message::Text(text))) => {
                        match Frame::decode(&text) {
                            Ok(frame) => dispatch_frame(inner, frame, &tx, &mut streams).await,
                            Err(e) => {
                                let err = TunnelError::FrameMalformed(e.to_string());
                                tracing::debug!(error = %err, "malformed frame, ignoring");
                            }
                        }
                    }
                    Some(Ok(_other)) => {}
                }
            }
        }
    };

    ping_handle.abort();
    writer_handle.abort();
    for (_, handle) in streams.drain() {
        handle.task.abort();
    }

    result
}

/// `init` creates a stream handler; `data` forwards accumulated bytes to it;
/// `end` hands off the final event and drops the bookkeeping record; `ping`
/// is answered with `pong`; anything else is logged and ignored.
async fn dispatch_frame(
    inner: &Arc<Inner>,
    frame: Frame,
    tx: &mpsc::Sender<Frame>,
    streams: &mut HashMap<String, StreamHandle>,
) {
    match frame {
        Frame::Init { stream_id, .. } => {
            if let Some(previous) = streams.remove(&stream_id) {
                previous.task.abort();
            }

            let (etx, erx) = mpsc::channel(16);
            let writer = tx.clone();
            let http = inner.http.clone();
            let (local_host, local_port) = {
                let opts = inner.options.lock().unwrap();
                (opts.local_host.clone(), opts.local_port)
            };
            let sid = stream_id.clone();
            let task = tokio::spawn(async move {
                run_stream(sid, erx, writer, http, local_host, local_port).await;
            });
            streams.insert(stream_id, StreamHandle { tx: etx, task });
        }
        Frame::Data { ref stream_id, .. } => {
            let bytes = frame.decoded_data().unwrap_or_default();
            if let Some(handle) = streams.get(stream_id) {
                let _ = handle.tx.send(StreamEvent::Data(bytes)).await;
            }
            // A stream_id with no prior INIT is discarded, per invariant.
        }
        Frame::End { stream_id } => {
            if let Some(handle) = streams.remove(&stream_id) {
                let _ = handle.tx.send(StreamEvent::End).await;
            }
        }
        Frame::Ping => {
            let _ = tx.send(Frame::Pong).await;
        }
        Frame::Pong => {}
        Frame::Unknown { kind, .. } => {
            tracing::debug!(kind = %kind, "unknown frame type, ignoring");
        }
    }
}

/// Accumulates `DATA` payloads until `END`, then dispatches to the local
/// origin and replies with exactly one `DATA` + `END` pair, success or
/// failure alike.
async fn run_stream(
    stream_id: String,
    mut rx: mpsc::Receiver<StreamEvent>,
    writer: mpsc::Sender<Frame>,
    http: reqwest::Client,
    local_host: String,
    local_port: u16,
) {
    let mut buffer = BytesMut::new();
    loop {
        match rx.recv().await {
            Some(StreamEvent::Data(bytes)) => buffer.extend_from_slice(&bytes),
            Some(StreamEvent::End) | None => break,
        }
    }

    match multiplexer::handle_request(&http, &local_host, local_port, &buffer).await {
        Ok(response_bytes) => {
            let _ = writer.send(Frame::data(&stream_id, &response_bytes)).await;
        }
        Err(e) => {
            let err = TunnelError::StreamFailed(e.to_string());
            tracing::warn!(stream_id = %stream_id, error = %err, "stream failed");
        }
    }
    let _ = writer.send(Frame::end(&stream_id)).await;
}

/// The reconnection policy, expressed as a loop: emit `on_reconnect`/
/// `on_status`, sleep, redial, and on failure loop back around rather than
/// recursing. Returns `None` only when cancelled.
async fn reconnect_loop(inner: &Arc<Inner>, cancel: &CancellationToken) -> Option<WsStream> {
    loop {
        if cancel.is_cancelled() {
            return None;
        }

        let (max_retries, retry_interval_secs) = {
            let opts = inner.options.lock().unwrap();
            (opts.max_retries, opts.retry_interval_secs)
        };

        let attempts = inner.reconnect_attempts.load(Ordering::SeqCst);
        if attempts >= max_retries {
            // Reset before the cooldown, not after: the next attempt below
            // reports on_reconnect(1) rather than on_reconnect(max_retries + 1).
            // Kept for behavioral parity with the reference client.
            inner.reconnect_attempts.store(0, Ordering::SeqCst);
            let cooldown = Duration::from_secs(retry_interval_secs.saturating_mul(6).min(30));
            tracing::warn!(max_retries, "max retry attempts reached, continuing with extended delay");
            if sleep_or_cancelled(cooldown, cancel).await {
                return None;
            }
        }

        let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        inner.events.fire_reconnect(attempt);
        inner.events.fire_status("reconnecting");
        tracing::info!(attempt, max_retries, "reconnecting");

        if sleep_or_cancelled(Duration::from_secs(retry_interval_secs), cancel).await {
            return None;
        }

        match establish(inner).await {
            Ok((ws, info)) => {
                inner.set_info(Some(info.clone()));
                inner.set_state(EngineState::Connected);
                inner.events.fire_connect(info);
                inner.events.fire_status("connected");
                return Some(ws);
            }
            Err(e) => {
                tracing::warn!(error = %e, "reconnect attempt failed");
            }
        }
    }
}

async fn sleep_or_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancel.cancelled() => true,
    }
}
