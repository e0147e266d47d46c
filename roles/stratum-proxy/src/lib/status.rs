//! ## Status Reporting System
//!
//! Long running tasks report the error that ended them to the main runtime loop.
//!
//! Each task wraps its report in a [`Status`] and sends it over an async channel, tagged with a
//! [`StatusSender`] variant that identifies the source subsystem. Recoverable conditions, such as
//! a dropped pool connection, are handled inside the component and never reach this channel.

use tracing::{debug, error, warn};

use crate::error::ProxyError;

/// Identifies the component that originated a [`Status`] update.
#[derive(Debug, Clone)]
pub enum StatusSender {
    /// A push miner connection.
    Downstream {
        downstream_id: u32,
        tx: async_channel::Sender<Status>,
    },
    /// The LAN discovery responder.
    Discovery(async_channel::Sender<Status>),
}

impl StatusSender {
    /// Sends a [`Status`] update.
    pub async fn send(&self, status: Status) -> Result<(), async_channel::SendError<Status>> {
        match self {
            Self::Downstream { downstream_id, tx } => {
                debug!(
                    "Sending status from Downstream [{}]: {:?}",
                    downstream_id, status.state
                );
                tx.send(status).await
            }
            Self::Discovery(tx) => {
                debug!("Sending status from Discovery: {:?}", status.state);
                tx.send(status).await
            }
        }
    }
}

/// The type of event or error being reported by a component.
#[derive(Debug)]
pub enum State {
    /// Push miner connection exited with an error.
    DownstreamShutdown {
        downstream_id: u32,
        reason: ProxyError,
    },
    /// Discovery responder stopped. Not fatal.
    DiscoveryShutdown(ProxyError),
}

/// A message reporting the current [`State`] of a component.
#[derive(Debug)]
pub struct Status {
    pub state: State,
}

/// Constructs and sends a [`Status`] update based on the [`StatusSender`] and error context.
async fn send_status(sender: &StatusSender, error: ProxyError) {
    let state = match sender {
        StatusSender::Downstream { downstream_id, .. } => {
            warn!("Downstream [{downstream_id}] shutting down due to error: {error:?}");
            State::DownstreamShutdown {
                downstream_id: *downstream_id,
                reason: error,
            }
        }
        StatusSender::Discovery(_) => {
            warn!("Discovery responder shutting down due to error: {error:?}");
            State::DiscoveryShutdown(error)
        }
    };

    if let Err(e) = sender.send(Status { state }).await {
        error!("Failed to send status update from {sender:?}: {e:?}");
    }
}

/// Centralized error dispatcher, every task reports its terminal error through here.
pub async fn handle_error(sender: &StatusSender, e: ProxyError) {
    error!("Error in {:?}: {:?}", sender, e);
    send_status(sender, e).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn handle_error_reports_source() {
        let (tx, rx) = async_channel::unbounded();
        handle_error(&StatusSender::Discovery(tx), ProxyError::ConnectionClosed).await;
        let status = rx.recv().await.unwrap();
        assert!(matches!(
            status.state,
            State::DiscoveryShutdown(ProxyError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn downstream_status_keeps_id() {
        let (tx, rx) = async_channel::unbounded();
        let sender = StatusSender::Downstream {
            downstream_id: 7,
            tx,
        };
        handle_error(&sender, ProxyError::Unauthorized).await;
        match rx.recv().await.unwrap().state {
            State::DownstreamShutdown { downstream_id, .. } => assert_eq!(downstream_id, 7),
            other => panic!("unexpected state {other:?}"),
        }
    }
}
