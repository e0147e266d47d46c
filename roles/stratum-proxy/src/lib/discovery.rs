//! ## LAN Discovery
//!
//! Answers `mining.get_upstream` queries sent to the multicast group, so miners on the local
//! network can find the proxy and the pool behind it.
use std::net::{Ipv4Addr, SocketAddr};

use serde_json::{json, Value};
use tokio::{
    net::UdpSocket,
    sync::{broadcast, mpsc},
};
use tracing::{debug, info, warn};

use crate::{
    error::ProxyResult,
    status::{handle_error, StatusSender},
    utils::ShutdownMessage,
};

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 3, 3, 3);
pub const DISCOVERY_PORT: u16 = 3333;

/// What the responder tells miners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryAdvert {
    pub pool_host: String,
    pub pool_port: u16,
    pub stratum_port: u16,
    pub getwork_port: u16,
}

impl DiscoveryAdvert {
    /// The reply to one datagram, `None` for anything but a `mining.get_upstream` query.
    pub fn answer(&self, query: &[u8]) -> Option<Vec<u8>> {
        let query: Value = serde_json::from_slice(query).ok()?;
        if query.get("method")?.as_str()? != "mining.get_upstream" {
            return None;
        }
        let id = query.get("id").cloned().unwrap_or(Value::Null);
        let reply = json!({
            "id": id,
            "result": [[self.pool_host, self.pool_port], self.stratum_port, self.getwork_port],
            "error": null,
        });
        Some(reply.to_string().into_bytes())
    }
}

/// Multicast responder. Failures here are reported but never stop the proxy.
pub struct DiscoveryResponder {
    advert: DiscoveryAdvert,
    port: u16,
}

impl DiscoveryResponder {
    pub fn new(advert: DiscoveryAdvert) -> Self {
        Self {
            advert,
            port: DISCOVERY_PORT,
        }
    }

    async fn bind(&self) -> ProxyResult<UdpSocket> {
        let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))).await?;
        socket.join_multicast_v4(MULTICAST_GROUP, Ipv4Addr::UNSPECIFIED)?;
        info!("Discovery responder on {MULTICAST_GROUP}:{}", self.port);
        Ok(socket)
    }

    pub async fn run(
        self,
        notify_shutdown: broadcast::Sender<ShutdownMessage>,
        shutdown_complete_tx: mpsc::Sender<()>,
        status_sender: StatusSender,
    ) {
        let mut shutdown_rx = notify_shutdown.subscribe();
        let socket = match self.bind().await {
            Ok(socket) => socket,
            Err(e) => {
                warn!("LAN discovery disabled: {e}");
                handle_error(&status_sender, e).await;
                return;
            }
        };
        let mut buf = [0u8; 1024];
        loop {
            tokio::select! {
                message = shutdown_rx.recv() => {
                    if matches!(message, Ok(ShutdownMessage::ShutdownAll) | Err(broadcast::error::RecvError::Closed)) {
                        break;
                    }
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, peer) = match received {
                        Ok(received) => received,
                        Err(e) => {
                            debug!("Discovery receive failed: {e}");
                            continue;
                        }
                    };
                    if let Some(reply) = self.advert.answer(&buf[..len]) {
                        debug!("Discovery query from {peer}");
                        if let Err(e) = socket.send_to(&reply, peer).await {
                            debug!("Cannot answer discovery query from {peer}: {e}");
                        }
                    }
                }
            }
        }
        drop(shutdown_complete_tx);
    }
}
