use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use async_channel::Sender;
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc},
};
use tracing::{debug, error, info, warn};

use super::downstream::{Downstream, DownstreamContext};
use crate::{
    connection::StratumConnection,
    error::ProxyResult,
    status::{Status, StatusSender},
    task_manager::TaskManager,
    utils::ShutdownMessage,
};

/// Accepts push miners and gives each one a [`Downstream`] task.
#[derive(Debug)]
pub struct Sv1Server {
    listener_addr: SocketAddr,
    ctx: DownstreamContext,
    miner_counter: AtomicU32,
}

impl Sv1Server {
    pub fn new(listener_addr: SocketAddr, ctx: DownstreamContext) -> Self {
        Self {
            listener_addr,
            ctx,
            miner_counter: AtomicU32::new(0),
        }
    }

    /// Binds the listener and returns it. A bind failure is fatal for the proxy.
    pub async fn bind(&self) -> ProxyResult<TcpListener> {
        let listener = TcpListener::bind(self.listener_addr).await.map_err(|e| {
            error!("Failed to bind to {}: {}", self.listener_addr, e);
            e
        })?;
        info!("Stratum listener on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Accepts miners until shutdown.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        notify_shutdown: broadcast::Sender<ShutdownMessage>,
        shutdown_complete_tx: mpsc::Sender<()>,
        status_sender: Sender<Status>,
        task_manager: Arc<TaskManager>,
    ) {
        let mut shutdown_rx = notify_shutdown.subscribe();
        loop {
            tokio::select! {
                message = shutdown_rx.recv() => {
                    match message {
                        Ok(ShutdownMessage::ShutdownAll) | Err(broadcast::error::RecvError::Closed) => {
                            debug!("Sv1Server: received shutdown signal");
                            break;
                        }
                        _ => {}
                    }
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let downstream_id = self.miner_counter.fetch_add(1, Ordering::Relaxed) + 1;
                            info!("Downstream {downstream_id}: new miner from {addr}");
                            let _ = stream.set_nodelay(true);
                            let downstream = Arc::new(Downstream::new(
                                downstream_id,
                                StratumConnection::new(stream),
                                self.ctx.clone(),
                            ));
                            let status_sender = StatusSender::Downstream {
                                downstream_id,
                                tx: status_sender.clone(),
                            };
                            task_manager.spawn(
                                "sv1-downstream",
                                downstream.run(
                                    notify_shutdown.clone(),
                                    shutdown_complete_tx.clone(),
                                    status_sender,
                                ),
                            );
                        }
                        Err(e) => warn!("Failed to accept miner connection: {e}"),
                    }
                }
            }
        }
        info!("Stratum listener stopped");
        drop(shutdown_complete_tx);
    }
}
