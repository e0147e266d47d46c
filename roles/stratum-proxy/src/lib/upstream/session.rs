use std::{sync::Arc, time::Duration};

use rand::Rng;
use tokio::{
    sync::{broadcast, mpsc},
    time::{sleep, timeout},
};
use tracing::{debug, error, info, warn};
use v1::{
    client_to_server::Subscribe,
    json_rpc::Message,
    server_to_client::{Reconnect, SubscribeResult},
};

use super::{
    socks, SessionState, UpstreamEvent, UpstreamHandle, UpstreamTarget, USER_AGENT,
};
use crate::{
    config::ProxyConfig,
    connection::StratumConnection,
    error::{ProxyError, ProxyResult},
    job_registry::JobRegistry,
    task_manager::TaskManager,
    utils::ShutdownMessage,
    work::job::SessionParams,
    worker_registry::WorkerRegistry,
};

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_JITTER_MS: u64 = 500;

/// Delay before the next attempt and the backoff for the one after. `jitter_ms` is added on
/// top of `backoff` and must stay below [`MAX_JITTER_MS`].
fn next_backoff(backoff: Duration, jitter_ms: u64) -> (Duration, Duration) {
    let wait = backoff + Duration::from_millis(jitter_ms.min(MAX_JITTER_MS - 1));
    (wait, (backoff * 2).clamp(MIN_BACKOFF, MAX_BACKOFF))
}

/// Drives the pool connection: Connecting -> Subscribed -> Connecting ... -> Disconnected.
///
/// Transport errors and handshake failures are retried with exponential backoff, they never end
/// the task. Every successful connection runs the full subscribe sequence, nothing from a
/// previous session is reused.
pub struct UpstreamSession {
    target: UpstreamTarget,
    socks_proxy: Option<String>,
    inactivity_timeout: Duration,
    pub(super) block_notify: Option<String>,
    pub(super) handle: UpstreamHandle,
    pub(super) jobs: Arc<JobRegistry>,
    workers: Arc<WorkerRegistry>,
}

impl UpstreamSession {
    pub fn new(
        target: UpstreamTarget,
        config: &ProxyConfig,
        handle: UpstreamHandle,
        jobs: Arc<JobRegistry>,
        workers: Arc<WorkerRegistry>,
    ) -> Self {
        Self {
            target,
            socks_proxy: config.socks_proxy.clone(),
            inactivity_timeout: config.upstream_timeout(),
            block_notify: config.block_notify.clone(),
            handle,
            jobs,
            workers,
        }
    }

    /// Runs until [`ShutdownMessage::ShutdownAll`].
    pub async fn run(
        mut self,
        notify_shutdown: broadcast::Sender<ShutdownMessage>,
        shutdown_complete_tx: mpsc::Sender<()>,
        task_manager: Arc<TaskManager>,
    ) {
        let mut shutdown_rx = notify_shutdown.subscribe();
        let mut backoff = MIN_BACKOFF;
        loop {
            self.handle.set_state(SessionState::Connecting);
            let mut subscribed = false;
            let end = tokio::select! {
                end = self.connect_and_serve(&task_manager, &mut subscribed) => end,
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
            };
            self.on_connection_lost();

            if subscribed {
                backoff = MIN_BACKOFF;
            }
            let wait = match end {
                Ok(reconnect) => {
                    if let Some(host) = reconnect.host {
                        self.target.host = host;
                    }
                    if let Some(port) = reconnect.port {
                        self.target.port = port;
                    }
                    backoff = MIN_BACKOFF;
                    Duration::from_secs(reconnect.wait.unwrap_or(0))
                }
                Err(e) => {
                    warn!("Upstream {} lost: {e}", self.target);
                    let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
                    let (wait, next) = next_backoff(backoff, jitter);
                    backoff = next;
                    wait
                }
            };
            info!("Reconnecting to {} in {wait:?}", self.target);
            tokio::select! {
                _ = sleep(wait) => {}
                _ = wait_for_shutdown(&mut shutdown_rx) => break,
            }
        }

        self.on_connection_lost();
        self.handle.set_state(SessionState::Disconnected);
        info!("Upstream session stopped");
        drop(shutdown_complete_tx);
    }

    /// Returns the pool's reconnect request, or the error that ended the connection.
    async fn connect_and_serve(
        &mut self,
        task_manager: &TaskManager,
        subscribed: &mut bool,
    ) -> ProxyResult<Reconnect> {
        info!("Connecting to upstream {}", self.target);
        let stream = socks::connect(&self.target, self.socks_proxy.as_deref()).await?;
        let conn = StratumConnection::new(stream);
        self.handle.attach(conn.sender());

        let (params, early) = self.handshake(&conn).await?;
        info!(
            "Subscribed to {}: extranonce1={} extranonce2_size={}",
            self.target,
            hex::encode(&params.extranonce1),
            params.extranonce2_size
        );
        // a fresh session, nothing authorized on the previous one carries over
        self.workers.clear_authorizations();
        self.jobs.set_session(params.clone());
        self.handle.set_state(SessionState::Subscribed);
        *subscribed = true;
        self.handle.emit(UpstreamEvent::Connected(params));

        let workers = self.workers.clone();
        let handle = self.handle.clone();
        task_manager.spawn("upstream-authorize", async move {
            workers.on_connected(&handle).await;
        });

        for msg in early {
            if let Some(reconnect) = self.handle_message(msg).await {
                return Ok(reconnect);
            }
        }
        loop {
            let msg = timeout(self.inactivity_timeout, conn.receive())
                .await?
                .ok_or(ProxyError::ConnectionClosed)?;
            if let Some(reconnect) = self.handle_message(msg).await {
                return Ok(reconnect);
            }
        }
    }

    /// Sends `mining.subscribe` and waits for its result. Pushes that arrive first are kept
    /// and applied once the session parameters are installed.
    async fn handshake(
        &self,
        conn: &StratumConnection,
    ) -> ProxyResult<(SessionParams, Vec<Message>)> {
        let id = self.handle.next_id();
        let subscribe = Subscribe {
            id,
            agent_signature: Some(USER_AGENT.to_string()),
            extranonce1: None,
        };
        if !conn.send(subscribe.into()).await {
            return Err(ProxyError::ConnectionClosed);
        }
        let mut early = Vec::new();
        loop {
            let msg = timeout(HANDSHAKE_TIMEOUT, conn.receive())
                .await?
                .ok_or(ProxyError::ConnectionClosed)?;
            match msg {
                Message::Response(response) if response.id == id => {
                    if let Some(e) = response.error {
                        error!("Pool refused subscription: {e}");
                        return Err(ProxyError::PoolRejected(e));
                    }
                    let result = SubscribeResult::try_from(&response)?;
                    return Ok((
                        SessionParams::new(result.extra_nonce1.0, result.extra_nonce2_size),
                        early,
                    ));
                }
                other => {
                    debug!("Holding pool message until subscribed: {other}");
                    early.push(other);
                }
            }
        }
    }

    /// Applies the loss of the connection: new requests fail at once, in-flight ones are
    /// failed, authorizations are dropped and the last job starts its grace period.
    fn on_connection_lost(&self) {
        let was_subscribed = self.handle.is_subscribed();
        if was_subscribed {
            self.handle.set_state(SessionState::Connecting);
        }
        self.handle.detach();
        self.workers.clear_authorizations();
        if was_subscribed {
            self.jobs.mark_disconnected();
            self.handle.emit(UpstreamEvent::Disconnected);
        }
    }
}

async fn wait_for_shutdown(rx: &mut broadcast::Receiver<ShutdownMessage>) {
    loop {
        match rx.recv().await {
            Ok(ShutdownMessage::ShutdownAll) | Err(broadcast::error::RecvError::Closed) => return,
            _ => {}
        }
    }
}
