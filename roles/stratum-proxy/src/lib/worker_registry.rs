//! ## Worker Registry
//!
//! Tracks the credentials miners present, whether the pool authorized them on the current
//! session, and which identity their shares are submitted under.
//!
//! Authorization belongs to the pool session, so every cached flag is dropped when the session
//! is lost or replaced. The cache and the clear share one lock, and an epoch counter makes sure
//! an authorize answer from a previous session is never written back.
use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    error::{ProxyError, ProxyResult},
    upstream::UpstreamHandle,
    utils::Mutex,
};

/// A worker that was refused is not asked about again for this long.
const AUTHORIZE_RETRY_AFTER: Duration = Duration::from_secs(60);
/// Workers without any activity for this long are forgotten.
const WORKER_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// How downstream credentials map to the identity the pool sees.
#[derive(Debug, Clone)]
pub enum CredentialStrategy {
    /// Every worker is submitted under its own credentials.
    PassThrough,
    /// Every worker is submitted under one configured identity.
    FixedOverride(Credentials),
}

impl CredentialStrategy {
    pub fn fixed(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::FixedOverride(Credentials::new(username, password))
    }

    /// The identity used upstream for `credentials`.
    pub fn resolve<'a>(&'a self, credentials: &'a Credentials) -> &'a Credentials {
        match self {
            Self::PassThrough => credentials,
            Self::FixedOverride(fixed) => fixed,
        }
    }
}

/// Per-worker bookkeeping. Counters are informational only.
#[derive(Debug, Clone)]
pub struct Worker {
    pub authorized: bool,
    pub last_activity: Instant,
    last_failure: Option<Instant>,
    pub submitted: u64,
    pub accepted: u64,
    pub rejected: u64,
}

impl Worker {
    fn new() -> Self {
        Self {
            authorized: false,
            last_activity: Instant::now(),
            last_failure: None,
            submitted: 0,
            accepted: 0,
            rejected: 0,
        }
    }
}

#[derive(Debug, Default)]
struct WorkerState {
    workers: HashMap<Credentials, Worker>,
    epoch: u64,
}

#[derive(Debug)]
pub struct WorkerRegistry {
    strategy: CredentialStrategy,
    state: Mutex<WorkerState>,
}

enum Cached {
    Authorized,
    Throttled,
    Ask(u64),
}

impl WorkerRegistry {
    pub fn new(strategy: CredentialStrategy) -> Self {
        Self {
            strategy,
            state: Mutex::new(WorkerState::default()),
        }
    }

    /// Authorizes a worker, asking the pool only when the answer is not cached.
    ///
    /// Fails with [`ProxyError::UpstreamUnavailable`] while the pool session is not subscribed,
    /// or when the session changed before the pool answered.
    pub async fn authorize(
        &self,
        upstream: &UpstreamHandle,
        credentials: Credentials,
    ) -> ProxyResult<bool> {
        if !upstream.is_subscribed() {
            return Err(ProxyError::UpstreamUnavailable);
        }
        let identity = self.strategy.resolve(&credentials).clone();
        let cached = self.state.super_safe_lock(|state| {
            let now = Instant::now();
            if !state.workers.contains_key(&credentials) {
                self.forget_idle(state, now);
            }
            let worker = state
                .workers
                .entry(credentials.clone())
                .or_insert_with(Worker::new);
            worker.last_activity = now;
            if worker.authorized {
                return Cached::Authorized;
            }
            if let Some(failed) = worker.last_failure {
                if now.duration_since(failed) < AUTHORIZE_RETRY_AFTER {
                    return Cached::Throttled;
                }
            }
            if identity != credentials
                && state.workers.get(&identity).is_some_and(|w| w.authorized)
            {
                if let Some(worker) = state.workers.get_mut(&credentials) {
                    worker.authorized = true;
                }
                return Cached::Authorized;
            }
            Cached::Ask(state.epoch)
        });
        let epoch = match cached {
            Cached::Authorized => return Ok(true),
            Cached::Throttled => {
                debug!("Worker {} refused recently, not asking again", credentials.username);
                return Ok(false);
            }
            Cached::Ask(epoch) => epoch,
        };

        let ok = upstream.authorize(&identity).await?;

        self.state.super_safe_lock(|state| {
            if state.epoch != epoch {
                return Err(ProxyError::UpstreamUnavailable);
            }
            let now = Instant::now();
            for key in [&credentials, &identity] {
                let worker = state.workers.entry(key.clone()).or_insert_with(Worker::new);
                worker.authorized = ok;
                worker.last_failure = if ok { None } else { Some(now) };
            }
            Ok(())
        })?;
        if ok {
            info!("Worker {} authorized", credentials.username);
        } else {
            warn!("Worker {} rejected by pool", credentials.username);
        }
        Ok(ok)
    }

    /// Cache read used on the submission path, never contacts the pool.
    pub fn is_authorized(&self, credentials: &Credentials) -> bool {
        self.state.super_safe_lock(|state| {
            state
                .workers
                .get(credentials)
                .is_some_and(|w| w.authorized)
        })
    }

    /// Authorizes on first use, for miners that never send an explicit authorize.
    pub async fn ensure_authorized(
        &self,
        upstream: &UpstreamHandle,
        credentials: &Credentials,
    ) -> ProxyResult<()> {
        if self.is_authorized(credentials) {
            return Ok(());
        }
        if self.authorize(upstream, credentials.clone()).await? {
            Ok(())
        } else {
            Err(ProxyError::Unauthorized)
        }
    }

    /// Marks every worker unauthorized. Counters are kept.
    pub fn clear_authorizations(&self) {
        self.state.super_safe_lock(|state| {
            state.epoch += 1;
            for worker in state.workers.values_mut() {
                worker.authorized = false;
                worker.last_failure = None;
            }
        });
    }

    /// Authorizes the fixed identity right after a new pool session is established.
    pub async fn on_connected(&self, upstream: &UpstreamHandle) {
        if let CredentialStrategy::FixedOverride(fixed) = &self.strategy {
            match self.authorize(upstream, fixed.clone()).await {
                Ok(true) => {}
                Ok(false) => warn!("Pool rejected the configured user {}", fixed.username),
                Err(e) => warn!("Cannot authorize configured user {}: {e}", fixed.username),
            }
        }
    }

    /// The identity a share from `credentials` is submitted under.
    pub fn upstream_identity(&self, credentials: &Credentials) -> Credentials {
        self.strategy.resolve(credentials).clone()
    }

    pub fn record_submission(&self, credentials: &Credentials, accepted: bool) {
        self.state.super_safe_lock(|state| {
            let worker = state
                .workers
                .entry(credentials.clone())
                .or_insert_with(Worker::new);
            worker.last_activity = Instant::now();
            worker.submitted += 1;
            if accepted {
                worker.accepted += 1;
            } else {
                worker.rejected += 1;
            }
        });
    }

    fn forget_idle(&self, state: &mut WorkerState, now: Instant) {
        let before = state.workers.len();
        let fixed = match &self.strategy {
            CredentialStrategy::FixedOverride(fixed) => Some(fixed),
            CredentialStrategy::PassThrough => None,
        };
        state.workers.retain(|credentials, worker| {
            Some(credentials) == fixed
                || now.duration_since(worker.last_activity) < WORKER_IDLE_TIMEOUT
        });
        let forgotten = before - state.workers.len();
        if forgotten > 0 {
            debug!("Forgot {forgotten} idle workers");
        }
    }

    #[cfg(test)]
    pub(crate) fn worker(&self, credentials: &Credentials) -> Option<Worker> {
        self.state
            .super_safe_lock(|state| state.workers.get(credentials).cloned())
    }
}
