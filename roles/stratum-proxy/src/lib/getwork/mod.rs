//! ## Getwork Listener
//!
//! HTTP front end for legacy polling miners. A plain `getwork` call returns a freshly built work
//! unit, `getwork [data]` submits a solved header, and requests to the long poll path are held
//! until the pool sends a new block or the long poll timeout elapses.
//!
//! The listener never talks to the pool directly. Work comes from the [`JobRegistry`] and
//! solutions go out through the [`UpstreamHandle`] under the identity picked by the
//! [`WorkerRegistry`].
use std::{sync::Arc, time::Duration};

use crate::{
    config::ProxyConfig, job_registry::JobRegistry, upstream::UpstreamHandle,
    worker_registry::WorkerRegistry,
};

pub mod autodetect;
pub mod handler;
pub mod server;

pub use server::GetworkServer;

/// Path of the long poll endpoint announced in `X-Long-Polling`.
pub const LONG_POLL_PATH: &str = "/lp";

/// Listener options taken from the proxy configuration.
#[derive(Debug, Clone)]
pub struct GetworkSettings {
    pub long_poll_timeout: Duration,
    pub no_midstate: bool,
    pub custom_lp: Option<String>,
    pub custom_stratum: Option<String>,
    pub stratum_listen_address: String,
    /// 0 when the Stratum listener is disabled.
    pub stratum_listen_port: u16,
}

impl GetworkSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            long_poll_timeout: config.long_poll_timeout(),
            no_midstate: config.no_midstate,
            custom_lp: config.custom_lp.clone().filter(|s| !s.is_empty()),
            custom_stratum: config.custom_stratum.clone().filter(|s| !s.is_empty()),
            stratum_listen_address: config.stratum_listen_address.clone(),
            stratum_listen_port: config.stratum_listen_port,
        }
    }
}

/// Collaborators shared by every getwork request.
#[derive(Debug, Clone)]
pub struct GetworkContext {
    pub jobs: Arc<JobRegistry>,
    pub workers: Arc<WorkerRegistry>,
    pub upstream: UpstreamHandle,
    pub settings: GetworkSettings,
}
