//! Connection lifecycle: ephemeral credential fetch, WebSocket transport,
//! and the state machine that dispatches server events to subscribers.
//!
//! The long-lived credential never touches this process. A short-lived
//! secret is fetched from a broker endpoint per connection and used once in
//! the WebSocket handshake.

use crate::error::{VoiceError, VoiceResult};
use crate::protocol::{ClientEvent, ServerEvent, SessionConfig};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// How many recent server events the manager retains for inspection.
const EVENT_RING_CAPACITY: usize = 50;

/// Connection lifecycle states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed(String),
}

/// Short-lived secret minted by the credential broker.
#[derive(Debug, Clone)]
pub struct EphemeralCredential {
    pub secret: String,
    /// Unix timestamp; 0 means the broker did not report one.
    pub expires_at: i64,
}

impl EphemeralCredential {
    pub fn is_expired(&self) -> bool {
        self.expires_at != 0 && chrono::Utc::now().timestamp() >= self.expires_at
    }
}

/// Mints ephemeral credentials for the realtime endpoint.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> VoiceResult<EphemeralCredential>;
}

#[derive(Debug, Deserialize)]
struct CredentialResponse {
    client_secret: ClientSecret,
    #[serde(default)]
    expires_at: i64,
}

#[derive(Debug, Deserialize)]
struct ClientSecret {
    value: String,
}

/// Fetches credentials from an HTTP broker that proxies the provider's
/// session-mint endpoint.
pub struct HttpCredentialProvider {
    url: String,
    client: reqwest::Client,
}

impl HttpCredentialProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(&self) -> VoiceResult<EphemeralCredential> {
        debug!("Fetching ephemeral credential from {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| VoiceError::Credential(format!("credential request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(VoiceError::Credential(format!(
                "credential broker returned {}",
                response.status()
            )));
        }

        let body: CredentialResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Credential(format!("malformed credential response: {}", e)))?;

        Ok(EphemeralCredential {
            secret: body.client_secret.value,
            expires_at: body.expires_at,
        })
    }
}

/// Bidirectional text-frame pipe to the endpoint. Dropping `outbound`
/// closes the transport; `inbound` yields raw JSON frames until the socket
/// closes.
pub struct TransportPipe {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens a transport to the realtime endpoint with an ephemeral credential.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn open(&self, credential: &EphemeralCredential) -> VoiceResult<TransportPipe>;
}

/// WebSocket transport via tokio-tungstenite.
pub struct WsTransport {
    endpoint: String,
}

impl WsTransport {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl RealtimeTransport for WsTransport {
    async fn open(&self, credential: &EphemeralCredential) -> VoiceResult<TransportPipe> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::Transport(format!("invalid endpoint: {}", e)))?;

        let bearer = HeaderValue::from_str(&format!("Bearer {}", credential.secret))
            .map_err(|e| VoiceError::Transport(format!("invalid credential header: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        request.headers_mut().insert(
            "OpenAI-Beta",
            HeaderValue::from_static("realtime=v1"),
        );

        info!("Connecting WebSocket to {}", self.endpoint);
        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| VoiceError::Transport(format!("websocket handshake failed: {}", e)))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = out_rx.recv() => {
                        match frame {
                            Some(text) => {
                                if let Err(e) = ws_tx.send(Message::Text(text)).await {
                                    warn!("WebSocket send failed: {}", e);
                                    break;
                                }
                            }
                            None => {
                                let _ = ws_tx.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                    incoming = ws_rx.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                if in_tx.send(text).is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("WebSocket closed by peer");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("WebSocket receive failed: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(TransportPipe {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

type Subscriber = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

struct ManagerInner {
    state: Mutex<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    subscribers: Mutex<Vec<(u64, Subscriber)>>,
    next_subscriber_id: AtomicU64,
    // Bumped per connect so a stale dispatch task cannot touch the state
    // of a newer connection.
    epoch: AtomicU64,
    recent_events: Mutex<VecDeque<String>>,
    last_error: Mutex<Option<String>>,
}

/// Owns the connection state machine. One dispatch task per connection
/// parses inbound frames and fans them out to subscribers in registration
/// order; a panicking subscriber is isolated and does not tear down the
/// session.
pub struct ConnectionManager {
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn RealtimeTransport>,
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn RealtimeTransport>,
    ) -> Self {
        Self {
            credentials,
            transport,
            inner: Arc::new(ManagerInner {
                state: Mutex::new(ConnectionState::Idle),
                outbound: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber_id: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                recent_events: Mutex::new(VecDeque::with_capacity(EVENT_RING_CAPACITY)),
                last_error: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner
            .state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(ConnectionState::Failed("state lock poisoned".to_string()))
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().ok().and_then(|g| g.clone())
    }

    /// Raw JSON of the most recent server frames, oldest first.
    pub fn recent_events(&self) -> Vec<String> {
        self.inner
            .recent_events
            .lock()
            .map(|g| g.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Register a server-event callback. Callbacks run on the dispatch task
    /// in registration order. Returns an id for `unsubscribe`.
    pub fn subscribe(&self, callback: Subscriber) -> u64 {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut subs) = self.inner.subscribers.lock() {
            subs.push((id, callback));
        }
        id
    }

    pub fn unsubscribe(&self, id: u64) {
        if let Ok(mut subs) = self.inner.subscribers.lock() {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    fn set_state(&self, state: ConnectionState) {
        if let Ok(mut guard) = self.inner.state.lock() {
            debug!("Connection state: {:?} -> {:?}", *guard, state);
            *guard = state;
        }
    }

    /// Fetch a credential, open the transport, and push the session
    /// configuration. Rejected unless the connection is Idle, Closed, or
    /// Failed. On failure the state is `Failed(reason)` and the error is
    /// returned.
    pub async fn connect(&self, session: &SessionConfig) -> VoiceResult<()> {
        match self.state() {
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Failed(_) => {}
            other => {
                return Err(VoiceError::Config(format!(
                    "connect called while {:?}",
                    other
                )));
            }
        }
        self.set_state(ConnectionState::Connecting);

        let credential = match self.credentials.fetch().await {
            Ok(c) => c,
            Err(e) => {
                error!("Credential fetch failed: {}", e);
                self.set_state(ConnectionState::Failed(e.to_string()));
                return Err(e);
            }
        };
        if credential.is_expired() {
            warn!("Credential broker returned an already-expired secret");
        }

        let pipe = match self.transport.open(&credential).await {
            Ok(p) => p,
            Err(e) => {
                error!("Transport open failed: {}", e);
                self.set_state(ConnectionState::Failed(e.to_string()));
                return Err(e);
            }
        };

        let TransportPipe {
            outbound,
            mut inbound,
        } = pipe;

        let config_frame = serde_json::to_string(&ClientEvent::SessionUpdate {
            session: session.clone(),
        })
        .map_err(|e| VoiceError::Transport(format!("session config did not serialize: {}", e)))?;
        if outbound.send(config_frame).is_err() {
            let e = VoiceError::Transport("transport closed before configuration".to_string());
            self.set_state(ConnectionState::Failed(e.to_string()));
            return Err(e);
        }

        if let Ok(mut guard) = self.inner.outbound.lock() {
            *guard = Some(outbound);
        }
        self.set_state(ConnectionState::Open);
        info!("Realtime session open");

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                dispatch_frame(&inner, &frame);
            }
            if inner.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            // Peer closed. A deliberate disconnect already moved the state
            // past Open; only an unexpected close lands here.
            if let Ok(mut guard) = inner.state.lock() {
                if matches!(*guard, ConnectionState::Open | ConnectionState::Connecting) {
                    info!("Transport closed by peer");
                    *guard = ConnectionState::Closed;
                }
            }
            if let Ok(mut guard) = inner.outbound.lock() {
                guard.take();
            }
        });

        Ok(())
    }

    /// Serialize and send one client event. A warning no-op unless Open.
    pub fn send(&self, event: &ClientEvent) -> VoiceResult<()> {
        if self.state() != ConnectionState::Open {
            warn!("Dropping client event: connection is not open");
            return Ok(());
        }
        let frame = serde_json::to_string(event)
            .map_err(|e| VoiceError::Transport(format!("client event did not serialize: {}", e)))?;
        let guard = self
            .inner
            .outbound
            .lock()
            .map_err(|_| VoiceError::Transport("outbound lock poisoned".to_string()))?;
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    warn!("Dropping client event: transport pipe closed");
                }
                Ok(())
            }
            None => {
                warn!("Dropping client event: transport already torn down");
                Ok(())
            }
        }
    }

    /// Orderly teardown: stop sending, close the transport, return to Idle.
    pub fn disconnect(&self) {
        self.set_state(ConnectionState::Closing);
        if let Ok(mut guard) = self.inner.outbound.lock() {
            guard.take();
        }
        self.set_state(ConnectionState::Idle);
        info!("Realtime session disconnected");
    }
}

fn dispatch_frame(inner: &Arc<ManagerInner>, frame: &str) {
    if let Ok(mut ring) = inner.recent_events.lock() {
        if ring.len() == EVENT_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(frame.to_string());
    }

    let event = match serde_json::from_str::<ServerEvent>(frame) {
        Ok(e) => e,
        Err(e) => {
            warn!("Unparseable server frame ({}): {}", e, frame);
            return;
        }
    };

    if let ServerEvent::Error { error } = &event {
        warn!("Server error event: {}", error.message);
        if let Ok(mut guard) = inner.last_error.lock() {
            *guard = Some(error.message.clone());
        }
    }

    if matches!(event, ServerEvent::Unknown) {
        return;
    }

    let subscribers: Vec<Subscriber> = match inner.subscribers.lock() {
        Ok(subs) => subs.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
        Err(_) => return,
    };
    for callback in subscribers {
        if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
            error!("Event subscriber panicked; continuing dispatch");
        }
    }
}
