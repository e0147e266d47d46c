use std::{collections::HashMap, sync::Arc};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use v1::{
    client_to_server::{Authorize, Submit, Subscribe},
    json_rpc::{error_codes, JsonRpcError, Message, Response},
    methods::MethodError,
    server_to_client::{Notify, SetDifficulty},
    utils::HexBytes,
    Client2Server,
};

use super::extranonce::{ExtranonceTail, TailAllocator};
use crate::{
    connection::StratumConnection,
    error::{ProxyError, ProxyResult},
    job_registry::JobRegistry,
    status::{handle_error, StatusSender},
    upstream::{SubmitOutcome, UpstreamEvent, UpstreamHandle},
    utils::{Mutex, ShutdownMessage},
    work::codec::SubmittedShare,
    worker_registry::{Credentials, WorkerRegistry},
};

/// Shared collaborators every push miner connection needs.
#[derive(Debug, Clone)]
pub struct DownstreamContext {
    pub jobs: Arc<JobRegistry>,
    pub workers: Arc<WorkerRegistry>,
    pub upstream: UpstreamHandle,
    pub tails: TailAllocator,
}

#[derive(Debug, Default)]
struct DownstreamData {
    tail: Option<ExtranonceTail>,
    /// Usernames this miner authorized, with the password it used.
    authorized: HashMap<String, Credentials>,
}

/// One push miner connection.
///
/// Requests from the miner are handled one at a time, in arrival order. Pool pushes are relayed
/// concurrently, so a submission waiting on the pool never delays a new job.
#[derive(Debug)]
pub struct Downstream {
    pub downstream_id: u32,
    connection: StratumConnection,
    ctx: DownstreamContext,
    data: Mutex<DownstreamData>,
}

enum Exit {
    Closed,
    UpstreamLost,
    Shutdown,
}

impl Downstream {
    pub fn new(downstream_id: u32, connection: StratumConnection, ctx: DownstreamContext) -> Self {
        Self {
            downstream_id,
            connection,
            ctx,
            data: Mutex::new(DownstreamData::default()),
        }
    }

    /// Serves the miner until it disconnects, the pool session is lost, or shutdown.
    pub async fn run(
        self: Arc<Self>,
        notify_shutdown: broadcast::Sender<ShutdownMessage>,
        shutdown_complete_tx: mpsc::Sender<()>,
        status_sender: StatusSender,
    ) {
        let downstream_id = self.downstream_id;
        let mut shutdown_rx = notify_shutdown.subscribe();
        let mut events = self.ctx.upstream.subscribe_events();

        let exit = tokio::select! {
            res = self.handle_miner_messages() => match res {
                Ok(()) | Err(ProxyError::ConnectionClosed) => Exit::Closed,
                Err(e) => {
                    handle_error(&status_sender, e).await;
                    Exit::Closed
                }
            },
            exit = self.relay_upstream_events(&mut events) => exit,
            exit = Self::wait_for_shutdown(downstream_id, &mut shutdown_rx) => exit,
        };
        match exit {
            Exit::Closed => info!("Downstream {downstream_id}: miner disconnected"),
            Exit::UpstreamLost => info!("Downstream {downstream_id}: dropped with the pool session"),
            Exit::Shutdown => debug!("Downstream {downstream_id}: shutdown"),
        }
        self.connection.close();
        // releases the extranonce tail
        self.data.super_safe_lock(|d| d.tail = None);
        drop(shutdown_complete_tx);
    }

    async fn wait_for_shutdown(
        downstream_id: u32,
        shutdown_rx: &mut broadcast::Receiver<ShutdownMessage>,
    ) -> Exit {
        loop {
            match shutdown_rx.recv().await {
                Ok(ShutdownMessage::ShutdownAll) => {
                    return Exit::Shutdown
                }
                Ok(ShutdownMessage::DownstreamShutdown(id)) if id == downstream_id => {
                    return Exit::Shutdown
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Exit::Shutdown,
            }
        }
    }

    async fn handle_miner_messages(&self) -> ProxyResult<()> {
        while let Some(msg) = self.connection.receive().await {
            let request_id = match &msg {
                Message::StandardRequest(r) => Some(r.id),
                _ => None,
            };
            let response = match Client2Server::try_from(msg) {
                Ok(Client2Server::Subscribe(subscribe)) => self.handle_subscribe(subscribe).await,
                Ok(Client2Server::Authorize(authorize)) => self.handle_authorize(authorize).await,
                Ok(Client2Server::ExtranonceSubscribe(m)) => {
                    Some(Response::ok(m.id, serde_json::Value::Bool(true)))
                }
                Ok(Client2Server::Submit(submit)) => Some(self.handle_submit(submit).await),
                Ok(Client2Server::GetTransactions(m)) => {
                    Some(Response::ok(m.id, serde_json::Value::Array(vec![])))
                }
                Err(MethodError::NotARequest(_)) => None,
                Err(MethodError::MethodNotFound(method)) => {
                    debug!("Downstream {}: unknown method {method}", self.downstream_id);
                    request_id.map(|id| {
                        Response::error(
                            id,
                            JsonRpcError::new(error_codes::METHOD_NOT_FOUND, "Method not found"),
                        )
                    })
                }
                Err(e) => {
                    warn!("Downstream {}: bad request: {e:?}", self.downstream_id);
                    request_id.map(|id| {
                        Response::error(id, JsonRpcError::new(error_codes::OTHER, "Bad request"))
                    })
                }
            };
            if let Some(response) = response {
                if !self.connection.send(Message::Response(response)).await {
                    return Err(ProxyError::ConnectionClosed);
                }
            }
        }
        Ok(())
    }

    async fn handle_subscribe(&self, subscribe: Subscribe) -> Option<Response> {
        let session = match self.ctx.jobs.session() {
            Some(session) if self.ctx.upstream.is_subscribed() => session,
            _ => {
                return Some(Response::error(
                    subscribe.id,
                    ProxyError::UpstreamUnavailable.to_json_rpc_error(),
                ))
            }
        };
        let tail = match self.ctx.tails.allocate(session.tail_len()) {
            Ok(tail) => tail,
            Err(e) => {
                warn!("Downstream {}: {e}", self.downstream_id);
                return Some(Response::error(subscribe.id, e.to_json_rpc_error()));
            }
        };
        let mut extranonce1 = session.extranonce1.clone();
        extranonce1.extend_from_slice(tail.bytes());
        let subscription_id = format!("{:08x}", self.downstream_id);
        let response = subscribe.respond(
            vec![
                ("mining.set_difficulty".into(), subscription_id.clone()),
                ("mining.notify".into(), subscription_id),
            ],
            HexBytes(extranonce1),
            session.miner_extranonce2_size(),
        );
        info!(
            "Downstream {}: subscribed ({}) with tail {}",
            self.downstream_id,
            subscribe.agent_signature.as_deref().unwrap_or("unknown agent"),
            hex::encode(tail.bytes())
        );
        self.data.super_safe_lock(|d| d.tail = Some(tail));

        // the subscribe result must reach the miner before any push
        if !self.connection.send(Message::Response(response)).await {
            return None;
        }
        let difficulty = SetDifficulty {
            value: self.ctx.jobs.difficulty(),
        };
        self.connection.send(difficulty.into()).await;
        if let Some(job) = self.ctx.jobs.current_job() {
            let mut notify = Notify::from(job.as_ref());
            notify.clean_jobs = true;
            self.connection.send(notify.into()).await;
        }
        None
    }

    async fn handle_authorize(&self, authorize: Authorize) -> Option<Response> {
        let credentials = Credentials::new(authorize.name.clone(), authorize.password.clone());
        match self
            .ctx
            .workers
            .authorize(&self.ctx.upstream, credentials.clone())
            .await
        {
            Ok(ok) => {
                if ok {
                    self.data.super_safe_lock(|d| {
                        d.authorized.insert(authorize.name.clone(), credentials)
                    });
                }
                Some(authorize.respond(ok))
            }
            Err(e) => Some(Response::error(authorize.id, e.to_json_rpc_error())),
        }
    }

    async fn handle_submit(&self, submit: Submit) -> Response {
        let id = submit.id;
        match self.forward_submit(&submit).await {
            Ok(SubmitOutcome::Accepted) => submit.respond(true),
            Ok(SubmitOutcome::Rejected(Some(e))) => Response::error(id, e),
            Ok(SubmitOutcome::Rejected(None)) => submit.respond(false),
            Err(e) => {
                debug!("Downstream {}: share rejected: {e}", self.downstream_id);
                Response::error(id, e.to_json_rpc_error())
            }
        }
    }

    async fn forward_submit(&self, submit: &Submit) -> ProxyResult<SubmitOutcome> {
        let (credentials, tail) = self.data.super_safe_lock(|d| {
            (
                d.authorized.get(&submit.user_name).cloned(),
                d.tail.as_ref().map(|t| t.bytes().to_vec()),
            )
        });
        let credentials = credentials.ok_or(ProxyError::Unauthorized)?;
        if !self.ctx.workers.is_authorized(&credentials) {
            return Err(ProxyError::Unauthorized);
        }
        let mut extranonce2 = tail.ok_or(ProxyError::UpstreamUnavailable)?;
        extranonce2.extend_from_slice(submit.extra_nonce2.as_ref());

        let share = SubmittedShare {
            job_id: submit.job_id.clone(),
            extranonce2,
            ntime: submit.time.0,
            nonce: submit.nonce.0,
            merkle_root: None,
        };
        let validated = self.ctx.jobs.submit(&share)?;
        if !validated.meets_pool_target() {
            self.ctx.workers.record_submission(&credentials, false);
            return Ok(SubmitOutcome::Rejected(Some(JsonRpcError::new(
                error_codes::LOW_DIFFICULTY,
                "Low difficulty share",
            ))));
        }
        if validated.is_block_candidate() {
            info!(
                "Downstream {}: block candidate {} (difficulty {:.0}) from {}",
                self.downstream_id,
                validated.hash_display(),
                validated.achieved_difficulty(),
                submit.user_name
            );
        }

        let identity = self.ctx.workers.upstream_identity(&credentials);
        let outcome = self.ctx.upstream.submit(&identity, &validated).await?;
        let accepted = outcome == SubmitOutcome::Accepted;
        self.ctx.workers.record_submission(&credentials, accepted);
        info!(
            "Downstream {}: share from {} {}",
            self.downstream_id,
            submit.user_name,
            if accepted { "accepted" } else { "rejected" }
        );
        Ok(outcome)
    }

    async fn relay_upstream_events(
        &self,
        events: &mut broadcast::Receiver<UpstreamEvent>,
    ) -> Exit {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Downstream {}: skipped {n} pool events", self.downstream_id);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Exit::UpstreamLost,
            };
            let subscribed = self.data.super_safe_lock(|d| d.tail.is_some());
            let msg: Message = match event {
                UpstreamEvent::Disconnected | UpstreamEvent::Connected(_) if subscribed => {
                    return Exit::UpstreamLost
                }
                _ if !subscribed => continue,
                UpstreamEvent::Notify(notify) => notify.into(),
                UpstreamEvent::SetDifficulty(value) => SetDifficulty { value }.into(),
                UpstreamEvent::Disconnected | UpstreamEvent::Connected(_) => continue,
            };
            if !self.connection.send(msg).await {
                return Exit::Closed;
            }
        }
    }
}
