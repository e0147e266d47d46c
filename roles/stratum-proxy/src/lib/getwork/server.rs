use std::{net::SocketAddr, sync::Arc};

use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc},
};
use tracing::{debug, error, info, warn};

use super::{handler::GetworkHandler, GetworkContext};
use crate::{error::ProxyResult, task_manager::TaskManager, utils::ShutdownMessage};

/// HTTP listener for getwork miners. Each connection is served by its own task.
#[derive(Debug)]
pub struct GetworkServer {
    listener_addr: SocketAddr,
    handler: Arc<GetworkHandler>,
}

impl GetworkServer {
    pub fn new(listener_addr: SocketAddr, ctx: GetworkContext) -> Self {
        Self {
            listener_addr,
            handler: Arc::new(GetworkHandler::new(ctx)),
        }
    }

    /// Binds the listener. A bind failure is fatal for the proxy.
    pub async fn bind(&self) -> ProxyResult<TcpListener> {
        let listener = TcpListener::bind(self.listener_addr).await.map_err(|e| {
            error!("Failed to bind to {}: {}", self.listener_addr, e);
            e
        })?;
        info!("Getwork listener on http://{}", listener.local_addr()?);
        Ok(listener)
    }

    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        notify_shutdown: broadcast::Sender<ShutdownMessage>,
        shutdown_complete_tx: mpsc::Sender<()>,
        task_manager: Arc<TaskManager>,
    ) {
        let mut shutdown_rx = notify_shutdown.subscribe();
        loop {
            tokio::select! {
                message = shutdown_rx.recv() => {
                    match message {
                        Ok(ShutdownMessage::ShutdownAll) | Err(broadcast::error::RecvError::Closed) => {
                            debug!("GetworkServer: received shutdown signal");
                            break;
                        }
                        _ => {}
                    }
                }
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Failed to accept getwork connection: {e}");
                            continue;
                        }
                    };
                    let handler = self.handler.clone();
                    let mut connection_shutdown = notify_shutdown.subscribe();
                    let shutdown_complete_tx = shutdown_complete_tx.clone();
                    task_manager.spawn("getwork-connection", async move {
                        let service = service_fn(move |req| handler.clone().handle(req));
                        let connection = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service);
                        tokio::select! {
                            res = connection => {
                                if let Err(e) = res {
                                    debug!("Getwork connection from {peer} ended: {e}");
                                }
                            }
                            _ = shutdown_all(&mut connection_shutdown) => {}
                        }
                        drop(shutdown_complete_tx);
                    });
                }
            }
        }
        info!("Getwork listener stopped");
        drop(shutdown_complete_tx);
    }
}

async fn shutdown_all(shutdown_rx: &mut broadcast::Receiver<ShutdownMessage>) {
    loop {
        match shutdown_rx.recv().await {
            Ok(ShutdownMessage::ShutdownAll) | Err(broadcast::error::RecvError::Closed) => return,
            _ => {}
        }
    }
}
