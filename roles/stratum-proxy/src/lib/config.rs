//! ## Proxy Configuration Module
//!
//! Defines [`ProxyConfig`], read once at startup from a TOML file.
//!
//! This module handles:
//! - Upstream pool address and port, optionally reached through a SOCKS5 proxy
//! - Listener addresses and ports for getwork and Stratum miners
//! - Work generation policy (real target, midstate) and long poll behaviour
//! - The optional fixed credential used for every upstream submission
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{error::ProxyError, job_registry::TargetPolicy, worker_registry::CredentialStrategy};

/// Configuration for the proxy.
#[derive(Debug, Deserialize, Clone)]
pub struct ProxyConfig {
    /// Hostname or IP of the Stratum pool.
    pub upstream_address: String,
    /// Port of the Stratum pool.
    #[serde(default = "default_upstream_port")]
    pub upstream_port: u16,
    /// `host:port` of a SOCKS5 proxy used for the pool connection.
    #[serde(default)]
    pub socks_proxy: Option<String>,
    /// Interface the Stratum listener binds to.
    #[serde(default = "default_listen_address")]
    pub stratum_listen_address: String,
    /// Port for Stratum miners, 0 disables the listener.
    #[serde(default = "default_stratum_port")]
    pub stratum_listen_port: u16,
    /// Interface the getwork listener binds to.
    #[serde(default = "default_listen_address")]
    pub getwork_listen_address: String,
    /// Port for getwork miners, 0 disables the listener.
    #[serde(default = "default_getwork_port")]
    pub getwork_listen_port: u16,
    /// Overrides the URL announced in the `X-Long-Polling` header.
    #[serde(default)]
    pub custom_lp: Option<String>,
    /// Overrides the URL announced in the `X-Stratum` header.
    #[serde(default)]
    pub custom_stratum: Option<String>,
    /// Username used for every upstream submission.
    #[serde(default)]
    pub custom_user: Option<String>,
    /// Password that goes with `custom_user`.
    #[serde(default)]
    pub custom_password: Option<String>,
    /// Hand getwork miners the pool share target instead of difficulty 1.
    #[serde(default)]
    pub real_target: bool,
    /// Skip midstate computation for getwork.
    #[serde(default)]
    pub no_midstate: bool,
    /// How long a long poll request waits for a new block.
    #[serde(default = "default_long_poll_timeout")]
    pub long_poll_timeout_secs: u64,
    /// Number of superseded jobs kept for late submissions.
    #[serde(default = "default_job_history_size")]
    pub job_history_size: usize,
    /// How long the last job stays usable after losing the pool.
    #[serde(default = "default_stale_grace")]
    pub stale_grace_secs: u64,
    /// Reconnect when the pool sends nothing for this long.
    #[serde(default = "default_upstream_timeout")]
    pub upstream_timeout_secs: u64,
    /// Shell command run on every new block, `%s` is replaced by the block hash.
    #[serde(default)]
    pub block_notify: Option<String>,
    /// Answer LAN discovery queries.
    #[serde(default = "default_true")]
    pub enable_discovery: bool,
    /// Probe a getwork endpoint for its Stratum address when the port is not 3333.
    #[serde(default = "default_true")]
    pub autodetect: bool,
    /// The path to the log file for the proxy.
    #[serde(default)]
    log_file: Option<PathBuf>,
}

fn default_upstream_port() -> u16 {
    3333
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_stratum_port() -> u16 {
    3333
}

fn default_getwork_port() -> u16 {
    8332
}

fn default_long_poll_timeout() -> u64 {
    60
}

fn default_job_history_size() -> usize {
    8
}

fn default_stale_grace() -> u64 {
    120
}

fn default_upstream_timeout() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl ProxyConfig {
    /// A configuration with every optional field at its default.
    pub fn new(upstream_address: impl Into<String>, upstream_port: u16) -> Self {
        Self {
            upstream_address: upstream_address.into(),
            upstream_port,
            socks_proxy: None,
            stratum_listen_address: default_listen_address(),
            stratum_listen_port: default_stratum_port(),
            getwork_listen_address: default_listen_address(),
            getwork_listen_port: default_getwork_port(),
            custom_lp: None,
            custom_stratum: None,
            custom_user: None,
            custom_password: None,
            real_target: false,
            no_midstate: false,
            long_poll_timeout_secs: default_long_poll_timeout(),
            job_history_size: default_job_history_size(),
            stale_grace_secs: default_stale_grace(),
            upstream_timeout_secs: default_upstream_timeout(),
            block_notify: None,
            enable_discovery: true,
            autodetect: true,
            log_file: None,
        }
    }

    pub fn set_log_dir(&mut self, log_dir: Option<PathBuf>) {
        if let Some(dir) = log_dir {
            self.log_file = Some(dir);
        }
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }

    pub fn long_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.long_poll_timeout_secs)
    }

    pub fn stale_grace(&self) -> Duration {
        Duration::from_secs(self.stale_grace_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn target_policy(&self) -> TargetPolicy {
        if self.real_target {
            TargetPolicy::PoolDifficulty
        } else {
            TargetPolicy::Diff1
        }
    }

    /// Picks the credential strategy once, from `custom_user`/`custom_password`.
    pub fn credential_strategy(&self) -> CredentialStrategy {
        match &self.custom_user {
            Some(user) if !user.is_empty() => CredentialStrategy::fixed(
                user.clone(),
                self.custom_password.clone().unwrap_or_default(),
            ),
            _ => CredentialStrategy::PassThrough,
        }
    }

    /// Rejects values that deserialize fine but would break the proxy at runtime.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.upstream_address.is_empty() {
            return Err(ProxyError::InvalidConfig(
                "upstream_address must not be empty".into(),
            ));
        }
        if self.job_history_size == 0 {
            return Err(ProxyError::InvalidConfig(
                "job_history_size must be at least 1".into(),
            ));
        }
        if self.upstream_timeout_secs == 0 {
            return Err(ProxyError::InvalidConfig(
                "upstream_timeout_secs must be at least 1".into(),
            ));
        }
        if let Some(proxy) = &self.socks_proxy {
            if proxy.rsplit_once(':').is_none() {
                return Err(ProxyError::InvalidConfig(format!(
                    "socks_proxy `{proxy}` is not host:port"
                )));
            }
        }
        Ok(())
    }
}
