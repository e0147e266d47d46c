//! ## Stratum Proxy
//!
//! Serves legacy getwork miners and Stratum V1 miners from one Stratum V1 pool connection.
//!
//! [`StratumProxy`] wires the components together: the upstream session keeps the pool
//! subscription alive and feeds the job registry, the getwork and Stratum listeners build work
//! from that registry and forward solutions through the shared upstream handle, and the worker
//! registry decides which identity the pool sees.
use std::{net::SocketAddr, sync::Arc};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::{
    config::ProxyConfig,
    discovery::{DiscoveryAdvert, DiscoveryResponder},
    error::{ProxyError, ProxyResult},
    getwork::{autodetect, GetworkContext, GetworkServer, GetworkSettings},
    job_registry::JobRegistry,
    status::{State, Status, StatusSender},
    sv1::{DownstreamContext, Sv1Server, TailAllocator},
    task_manager::TaskManager,
    upstream::{resolve_upstream, session::UpstreamSession, UpstreamHandle, UpstreamTarget},
    utils::ShutdownMessage,
    worker_registry::WorkerRegistry,
};

pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod getwork;
pub mod job_registry;
pub mod logging;
pub mod status;
pub mod sv1;
mod task_manager;
pub mod upstream;
pub mod utils;
pub mod work;
pub mod worker_registry;

/// Port pools conventionally use for Stratum. Any other configured port is probed as getwork.
const STRATUM_DEFAULT_PORT: u16 = 3333;

/// The main struct that runs the proxy.
#[derive(Clone, Debug)]
pub struct StratumProxy {
    config: ProxyConfig,
}

impl StratumProxy {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    /// Runs the proxy until Ctrl+C.
    ///
    /// Fails only on unrecoverable startup problems: an invalid configuration, an upstream
    /// address that cannot be resolved, or a listener that cannot bind.
    pub async fn start(self) -> ProxyResult<()> {
        info!("Starting Stratum proxy...");
        self.config.validate()?;
        let config = &self.config;

        let target = self.upstream_target().await;
        if config.socks_proxy.is_none() {
            resolve_upstream(&target).await?;
        }

        let (notify_shutdown, _) = broadcast::channel::<ShutdownMessage>(16);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel::<()>(1);
        let (status_sender, status_receiver) = async_channel::unbounded::<Status>();
        let task_manager = Arc::new(TaskManager::new());

        let upstream = UpstreamHandle::new(config.upstream_timeout());
        let jobs = Arc::new(JobRegistry::new(
            config.job_history_size,
            config.stale_grace(),
            config.target_policy(),
        ));
        let workers = Arc::new(WorkerRegistry::new(config.credential_strategy()));
        debug!("Registries initialized.");

        // listeners bind before anything runs, a bind failure ends startup
        let getwork = if config.getwork_listen_port != 0 {
            let addr = listen_addr(&config.getwork_listen_address, config.getwork_listen_port).await?;
            let server = Arc::new(GetworkServer::new(
                addr,
                GetworkContext {
                    jobs: jobs.clone(),
                    workers: workers.clone(),
                    upstream: upstream.clone(),
                    settings: GetworkSettings::from_config(config),
                },
            ));
            let listener = server.bind().await?;
            Some((server, listener))
        } else {
            info!("Getwork listener disabled");
            None
        };
        let stratum = if config.stratum_listen_port != 0 {
            let addr = listen_addr(&config.stratum_listen_address, config.stratum_listen_port).await?;
            let server = Arc::new(Sv1Server::new(
                addr,
                DownstreamContext {
                    jobs: jobs.clone(),
                    workers: workers.clone(),
                    upstream: upstream.clone(),
                    tails: TailAllocator::new(),
                },
            ));
            let listener = server.bind().await?;
            Some((server, listener))
        } else {
            info!("Stratum listener disabled");
            None
        };

        let session = UpstreamSession::new(
            target.clone(),
            config,
            upstream.clone(),
            jobs.clone(),
            workers.clone(),
        );
        task_manager.spawn(
            "upstream",
            session.run(
                notify_shutdown.clone(),
                shutdown_complete_tx.clone(),
                task_manager.clone(),
            ),
        );

        if let Some((server, listener)) = getwork {
            task_manager.spawn(
                "getwork-server",
                server.serve(
                    listener,
                    notify_shutdown.clone(),
                    shutdown_complete_tx.clone(),
                    task_manager.clone(),
                ),
            );
        }
        if let Some((server, listener)) = stratum {
            task_manager.spawn(
                "sv1-server",
                server.serve(
                    listener,
                    notify_shutdown.clone(),
                    shutdown_complete_tx.clone(),
                    status_sender.clone(),
                    task_manager.clone(),
                ),
            );
        }
        if config.enable_discovery {
            let responder = DiscoveryResponder::new(DiscoveryAdvert {
                pool_host: target.host.clone(),
                pool_port: target.port,
                stratum_port: config.stratum_listen_port,
                getwork_port: config.getwork_listen_port,
            });
            task_manager.spawn(
                "discovery",
                responder.run(
                    notify_shutdown.clone(),
                    shutdown_complete_tx.clone(),
                    StatusSender::Discovery(status_sender.clone()),
                ),
            );
        }

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl+C received, initiating graceful shutdown...");
                    let _ = notify_shutdown.send(ShutdownMessage::ShutdownAll);
                    break;
                }
                message = status_receiver.recv() => {
                    let Ok(status) = message else { continue };
                    match status.state {
                        State::DownstreamShutdown { downstream_id, reason } => {
                            warn!("Downstream {downstream_id} closed after error: {reason}");
                            let _ = notify_shutdown.send(ShutdownMessage::DownstreamShutdown(downstream_id));
                        }
                        State::DiscoveryShutdown(reason) => {
                            warn!("LAN discovery stopped: {reason}");
                        }
                    }
                }
            }
        }

        drop(shutdown_complete_tx);
        info!("Waiting for shutdown completion signals from subsystems...");
        let shutdown_timeout = tokio::time::Duration::from_secs(5);
        tokio::select! {
            _ = shutdown_complete_rx.recv() => {
                info!("All subsystems reported shutdown complete.");
            }
            _ = tokio::time::sleep(shutdown_timeout) => {
                warn!("Graceful shutdown timed out after {shutdown_timeout:?}, forcing shutdown.");
                task_manager.abort_all().await;
            }
        }
        task_manager.join_all().await;
        info!("Stratum proxy shutdown complete.");
        Ok(())
    }

    /// The configured pool, or the Stratum endpoint it announces when it was given by its
    /// getwork address.
    async fn upstream_target(&self) -> UpstreamTarget {
        let configured =
            UpstreamTarget::new(self.config.upstream_address.clone(), self.config.upstream_port);
        if !self.config.autodetect || configured.port == STRATUM_DEFAULT_PORT {
            return configured;
        }
        match autodetect::detect_stratum(&configured).await {
            Ok(Some(detected)) => {
                info!("Using autodetected Stratum upstream {detected}");
                detected
            }
            Ok(None) => configured,
            Err(e) => {
                warn!("Stratum autodetection on {configured} failed: {e}");
                configured
            }
        }
    }
}

async fn listen_addr(host: &str, port: u16) -> ProxyResult<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port)).await.map_err(|e| {
        error!("Invalid listen address {host}:{port}: {e}");
        ProxyError::InvalidConfig(format!("listen address {host}:{port}: {e}"))
    })?;
    addrs
        .next()
        .ok_or_else(|| ProxyError::InvalidConfig(format!("listen address {host}:{port}")))
}
