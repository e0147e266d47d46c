//! ## Upstream Session
//!
//! The single connection to the pool. [`session::UpstreamSession`] owns the socket and drives the
//! connect, subscribe, serve and reconnect cycle. Everything else talks to the pool through an
//! [`UpstreamHandle`], which correlates requests with responses and fails them as soon as the
//! connection is lost.
use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_channel::Sender;
use tokio::{
    sync::{broadcast, oneshot, watch},
    time::sleep,
};
use tracing::{debug, info, warn};
use v1::{
    client_to_server::{Authorize, Submit},
    json_rpc::{JsonRpcError, Message, Response},
    server_to_client::Notify,
    utils::{HexBytes, HexU32Be},
};

use crate::{
    error::{ProxyError, ProxyResult},
    utils::Mutex,
    work::{codec::ValidatedShare, job::SessionParams},
    worker_registry::Credentials,
};

pub mod message_handler;
pub mod session;
pub mod socks;

/// Product string sent to the pool and answered to `client.get_version`.
pub const USER_AGENT: &str = concat!("stratum-proxy/", env!("CARGO_PKG_VERSION"));

/// Lifecycle of the pool session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Subscribed,
    /// Entered only on shutdown.
    Disconnected,
}

/// Broadcast to listeners as the pool session changes.
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    Connected(SessionParams),
    Disconnected,
    Notify(Notify),
    SetDifficulty(f64),
}

/// Pool verdict on a forwarded share.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Accepted,
    Rejected(Option<JsonRpcError>),
}

/// Host and port of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub host: String,
    pub port: u16,
}

impl UpstreamTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for UpstreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

const RETRIES_PER_UPSTREAM: u8 = 3;

/// Resolves the pool address, retrying a few times before giving up.
pub async fn resolve_upstream(target: &UpstreamTarget) -> ProxyResult<SocketAddr> {
    let mut last_error = String::new();
    for attempt in 1..=RETRIES_PER_UPSTREAM {
        match tokio::net::lookup_host((target.host.as_str(), target.port)).await {
            Ok(mut addrs) => {
                if let Some(addr) = addrs.next() {
                    debug!("Resolved upstream {target} to {addr}");
                    return Ok(addr);
                }
                last_error = "no address returned".into();
            }
            Err(e) => last_error = e.to_string(),
        }
        warn!("Cannot resolve {target}: {last_error}. Retry {attempt}/{RETRIES_PER_UPSTREAM}...");
        if attempt < RETRIES_PER_UPSTREAM {
            sleep(Duration::from_secs(5)).await;
        }
    }
    Err(ProxyError::Resolve(format!("{target}: {last_error}")))
}

#[derive(Debug)]
struct HandleInner {
    state: watch::Sender<SessionState>,
    events: broadcast::Sender<UpstreamEvent>,
    outbound: Mutex<Option<Sender<Message>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Response>>>,
    next_id: AtomicU64,
    request_timeout: Duration,
}

/// Shared access to the pool session.
#[derive(Debug, Clone)]
pub struct UpstreamHandle {
    inner: Arc<HandleInner>,
}

impl UpstreamHandle {
    /// Requests not answered within `request_timeout` fail with
    /// [`ProxyError::UpstreamUnavailable`].
    pub fn new(request_timeout: Duration) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(HandleInner {
                state,
                events,
                outbound: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                request_timeout,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn is_subscribed(&self) -> bool {
        self.state() == SessionState::Subscribed
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            info!("Upstream session {previous:?} -> {state:?}");
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<UpstreamEvent> {
        self.inner.events.subscribe()
    }

    pub(crate) fn emit(&self, event: UpstreamEvent) {
        // no receivers is fine, listeners come and go
        let _ = self.inner.events.send(event);
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Routes outbound messages into a freshly opened connection.
    pub(crate) fn attach(&self, sender: Sender<Message>) {
        self.inner
            .outbound
            .super_safe_lock(|outbound| *outbound = Some(sender));
    }

    /// Cuts the connection off. Every request still waiting for an answer fails.
    pub(crate) fn detach(&self) {
        self.inner.outbound.super_safe_lock(|outbound| {
            if let Some(sender) = outbound.take() {
                sender.close();
            }
        });
        let dropped = self
            .inner
            .pending
            .super_safe_lock(|pending| std::mem::take(pending));
        if !dropped.is_empty() {
            debug!("Failing {} in-flight upstream requests", dropped.len());
        }
    }

    /// Hands a pool response to the request waiting for it. `false` when nobody was waiting.
    pub(crate) fn resolve(&self, response: Response) -> bool {
        match self
            .inner
            .pending
            .super_safe_lock(|pending| pending.remove(&response.id))
        {
            Some(tx) => tx.send(response).is_ok(),
            None => false,
        }
    }

    /// Sends a message that expects no answer.
    pub(crate) async fn send(&self, msg: Message) -> ProxyResult<()> {
        let outbound = self
            .inner
            .outbound
            .super_safe_lock(|outbound| outbound.clone())
            .ok_or(ProxyError::UpstreamUnavailable)?;
        outbound
            .send(msg)
            .await
            .map_err(|_| ProxyError::UpstreamUnavailable)
    }

    /// Sends the request built by `build` with a fresh id and waits for its response.
    pub(crate) async fn call(&self, build: impl FnOnce(u64) -> Message) -> ProxyResult<Response> {
        if !self.is_subscribed() {
            return Err(ProxyError::UpstreamUnavailable);
        }
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        // registered before the message leaves so a detach in between drops it
        self.inner
            .pending
            .super_safe_lock(|pending| pending.insert(id, tx));
        if let Err(e) = self.send(build(id)).await {
            self.inner
                .pending
                .super_safe_lock(|pending| pending.remove(&id));
            return Err(e);
        }
        match tokio::time::timeout(self.inner.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ProxyError::UpstreamUnavailable),
            Err(_) => {
                self.inner
                    .pending
                    .super_safe_lock(|pending| pending.remove(&id));
                warn!("Upstream request {id} timed out");
                Err(ProxyError::UpstreamUnavailable)
            }
        }
    }

    /// Authorizes `credentials` with the pool.
    pub async fn authorize(&self, credentials: &Credentials) -> ProxyResult<bool> {
        let response = self
            .call(
                |id| {
                    Authorize {
                        id,
                        name: credentials.username.clone(),
                        password: credentials.password.clone(),
                    }
                    .into()
                },
            )
            .await?;
        if let Some(e) = &response.error {
            info!("Pool refused worker {}: {e}", credentials.username);
        }
        Ok(response.is_accepted())
    }

    /// Forwards a validated share under `credentials`.
    pub async fn submit(
        &self,
        credentials: &Credentials,
        share: &ValidatedShare,
    ) -> ProxyResult<SubmitOutcome> {
        let response = self
            .call(
                |id| {
                    Submit {
                        id,
                        user_name: credentials.username.clone(),
                        job_id: share.job_id.clone(),
                        extra_nonce2: HexBytes(share.extranonce2.clone()),
                        time: HexU32Be(share.ntime),
                        nonce: HexU32Be(share.nonce),
                        version_bits: None,
                    }
                    .into()
                },
            )
            .await?;
        if response.is_accepted() {
            Ok(SubmitOutcome::Accepted)
        } else {
            Ok(SubmitOutcome::Rejected(response.error))
        }
    }
}

/// A stand-in pool for unit tests: answers every request on the handle with `answer`.
#[cfg(test)]
pub(crate) fn attach_test_pool<F>(handle: &UpstreamHandle, answer: F) -> async_channel::Receiver<Message>
where
    F: Fn(&v1::json_rpc::StandardRequest) -> Option<Response> + Send + 'static,
{
    let (tx, rx) = async_channel::unbounded();
    let (seen_tx, seen_rx) = async_channel::unbounded();
    handle.attach(tx);
    handle.set_state(SessionState::Subscribed);
    let handle = handle.clone();
    tokio::spawn(async move {
        while let Ok(msg) = rx.recv().await {
            if let Message::StandardRequest(req) = &msg {
                if let Some(response) = answer(req) {
                    handle.resolve(response);
                }
            }
            let _ = seen_tx.send(msg).await;
        }
    });
    seen_rx
}
