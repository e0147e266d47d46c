//! ## Job Registry
//!
//! Owns the current pool job, a bounded history of superseded jobs and the subscription
//! parameters they were issued under. Work units are generated from it on demand and submitted
//! shares are validated against it.
//!
//! Written only by the upstream session, read by every listener. Jobs are stored behind [`Arc`]
//! and replaced as a whole, so readers never see a partially applied job.
//!
//! Long poll waiters subscribe to a [`watch`] channel. The value changes only when waiters must
//! be released: on a clean job, or on the first job after the registry was emptied.
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use primitive_types::U256;
use tokio::{sync::watch, time::Instant};
use tracing::{debug, info};

use crate::{
    error::{ProxyError, ProxyResult},
    utils::{unix_time, Mutex},
    work::{
        codec::{
            self, header_merkle_root, header_nonce, header_ntime, ShareKey, SubmittedShare,
            ValidatedShare, WorkUnit, HEADER_SIZE,
        },
        job::{Job, SessionParams},
        target::{miner_diff1_target, target_from_difficulty},
    },
};

/// Getwork units remembered per job. Older ones are forgotten first.
const ISSUED_PER_JOB: usize = 8192;

/// Which target getwork miners are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPolicy {
    /// Difficulty 1, what legacy miners handle reliably.
    Diff1,
    /// The pool share target from the last `mining.set_difficulty`.
    PoolDifficulty,
}

#[derive(Debug)]
struct JobEntry {
    job: Arc<Job>,
    /// `job.ntime - local time` when the job arrived.
    ntime_delta: i64,
    /// Pool difficulty in force when the job arrived.
    difficulty: f64,
    /// Merkle root of every getwork unit handed out, mapped to its extranonce2.
    issued: HashMap<[u8; 32], Vec<u8>>,
    issued_order: VecDeque<[u8; 32]>,
    /// Shares already validated against this job.
    seen: HashSet<ShareKey>,
}

impl JobEntry {
    fn new(job: Job, difficulty: f64) -> Self {
        let ntime_delta = job.ntime as i64 - unix_time() as i64;
        Self {
            job: Arc::new(job),
            ntime_delta,
            difficulty,
            issued: HashMap::new(),
            issued_order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    fn remember(&mut self, merkle_root: [u8; 32], extranonce2: Vec<u8>, limit: usize) {
        if self.issued.insert(merkle_root, extranonce2).is_none() {
            self.issued_order.push_back(merkle_root);
        }
        while self.issued_order.len() > limit {
            if let Some(oldest) = self.issued_order.pop_front() {
                self.issued.remove(&oldest);
            }
        }
    }
}

#[derive(Debug)]
struct RegistryState {
    session: Option<SessionParams>,
    /// Newest job first.
    jobs: VecDeque<JobEntry>,
    extranonce2_counter: u64,
    difficulty: f64,
    version: u64,
    disconnected_since: Option<Instant>,
}

/// Outcome of [`JobRegistry::set_job`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobUpdate {
    pub version: u64,
    /// Long poll waiters were released.
    pub released: bool,
}

#[derive(Debug)]
pub struct JobRegistry {
    state: Mutex<RegistryState>,
    release_tx: watch::Sender<u64>,
    history_size: usize,
    stale_grace: Duration,
    target_policy: TargetPolicy,
    issued_limit: usize,
}

impl JobRegistry {
    /// `history_size` counts superseded jobs kept in addition to the current one.
    pub fn new(history_size: usize, stale_grace: Duration, target_policy: TargetPolicy) -> Self {
        let (release_tx, _) = watch::channel(0);
        Self {
            state: Mutex::new(RegistryState {
                session: None,
                jobs: VecDeque::new(),
                extranonce2_counter: 0,
                difficulty: 1.0,
                version: 0,
                disconnected_since: None,
            }),
            release_tx,
            history_size,
            stale_grace,
            target_policy,
            issued_limit: ISSUED_PER_JOB,
        }
    }

    /// Installs the parameters of a new subscription. Every job of the previous subscription is
    /// dropped, work built under it can no longer be submitted.
    pub fn set_session(&self, session: SessionParams) {
        self.state.super_safe_lock(|state| {
            if state.session.as_ref() != Some(&session) {
                debug!(
                    "New session parameters: extranonce1={} extranonce2_size={}",
                    hex::encode(&session.extranonce1),
                    session.extranonce2_size
                );
            }
            state.session = Some(session);
            state.jobs.clear();
            state.extranonce2_counter = 0;
            state.disconnected_since = None;
        });
    }

    pub fn session(&self) -> Option<SessionParams> {
        self.state.super_safe_lock(|state| state.session.clone())
    }

    pub fn set_difficulty(&self, difficulty: f64) {
        self.state
            .super_safe_lock(|state| state.difficulty = difficulty);
    }

    pub fn difficulty(&self) -> f64 {
        self.state.super_safe_lock(|state| state.difficulty)
    }

    /// Share target the pool currently enforces.
    pub fn pool_target(&self) -> U256 {
        target_from_difficulty(self.difficulty())
    }

    /// Starts the grace period after which the last job stops being handed out.
    pub fn mark_disconnected(&self) {
        self.state.super_safe_lock(|state| {
            state.disconnected_since.get_or_insert_with(Instant::now);
        });
    }

    /// Makes `job` current.
    ///
    /// A clean job drops the history. Long poll waiters are released before this returns when
    /// the job is clean or the registry held no job.
    pub fn set_job(&self, job: Job) -> JobUpdate {
        let clean = job.clean;
        let job_id = job.job_id.clone();
        let (version, release) = self.state.super_safe_lock(|state| {
            let was_empty = state.jobs.is_empty();
            if clean {
                state.jobs.clear();
            }
            state.jobs.push_front(JobEntry::new(job, state.difficulty));
            state.jobs.truncate(self.history_size + 1);
            state.version += 1;
            (state.version, clean || was_empty)
        });
        if release {
            self.release_tx.send_replace(version);
        }
        info!("New job {job_id} (version {version}, clean={clean})");
        JobUpdate {
            version,
            released: release,
        }
    }

    pub fn current_job(&self) -> Option<Arc<Job>> {
        self.state
            .super_safe_lock(|state| state.jobs.front().map(|e| e.job.clone()))
    }

    /// Registers a long poll waiter on the current release generation.
    pub fn long_poll(&self) -> LongPoll {
        LongPoll {
            rx: self.release_tx.subscribe(),
        }
    }

    #[cfg(test)]
    pub(crate) fn long_poll_waiters(&self) -> usize {
        self.release_tx.receiver_count()
    }

    /// Builds a work unit from the current job.
    ///
    /// Without `extranonce2` the registry picks the next value from its own counter, with the
    /// push miner tail bytes left at zero. The unit is remembered so that a getwork submission
    /// can be traced back to it by merkle root.
    pub fn generate_work(
        &self,
        extranonce2: Option<Vec<u8>>,
        target_override: Option<TargetPolicy>,
        with_midstate: bool,
    ) -> ProxyResult<WorkUnit> {
        let policy = target_override.unwrap_or(self.target_policy);
        let stale_grace = self.stale_grace;
        let (job, session, extranonce2, ntime_delta, difficulty) =
            self.state.super_safe_lock(|state| {
                if let Some(since) = state.disconnected_since {
                    if since.elapsed() >= stale_grace {
                        return Err(ProxyError::NoJob);
                    }
                }
                let session = state.session.clone().ok_or(ProxyError::NoJob)?;
                let entry = state.jobs.front().ok_or(ProxyError::NoJob)?;
                let (job, ntime_delta, difficulty) =
                    (entry.job.clone(), entry.ntime_delta, entry.difficulty);
                let extranonce2 = match extranonce2 {
                    Some(en2) => en2,
                    None => {
                        state.extranonce2_counter = state.extranonce2_counter.wrapping_add(1);
                        let mut en2 = vec![0u8; session.tail_len()];
                        en2.extend(codec::extranonce2_from_counter(
                            state.extranonce2_counter,
                            session.miner_extranonce2_size(),
                        ));
                        en2
                    }
                };
                Ok((job, session, extranonce2, ntime_delta, difficulty))
            })?;

        // hashing happens outside the lock
        let target = match policy {
            TargetPolicy::Diff1 => miner_diff1_target(),
            TargetPolicy::PoolDifficulty => target_from_difficulty(difficulty),
        };
        let ntime = codec::rolled_ntime(ntime_delta);
        let work = codec::build(
            &job,
            &session,
            &extranonce2,
            Some(ntime),
            target,
            with_midstate,
        );

        let limit = self.issued_limit;
        self.state.super_safe_lock(|state| {
            // the job may have been superseded meanwhile, the unit then resolves as stale
            if let Some(entry) = state.jobs.iter_mut().find(|e| Arc::ptr_eq(&e.job, &job)) {
                entry.remember(work.merkle_root, work.extranonce2.clone(), limit);
            }
        });
        Ok(work)
    }

    /// Identifies the job and extranonce2 of a header returned by a getwork miner.
    pub fn resolve_header(&self, header: &[u8; HEADER_SIZE]) -> ProxyResult<SubmittedShare> {
        let root = header_merkle_root(header);
        self.state.super_safe_lock(|state| {
            state
                .jobs
                .iter()
                .find_map(|entry| {
                    entry.issued.get(&root).map(|en2| SubmittedShare {
                        job_id: entry.job.job_id.clone(),
                        extranonce2: en2.clone(),
                        ntime: header_ntime(header),
                        nonce: header_nonce(header),
                        merkle_root: Some(root),
                    })
                })
                .ok_or(ProxyError::StaleJob)
        })
    }

    /// Validates a share against the current job or the retained history.
    ///
    /// Fails with [`ProxyError::StaleJob`] when the job is gone and with
    /// [`ProxyError::DuplicateShare`] when the same share was validated before.
    pub fn submit(&self, share: &SubmittedShare) -> ProxyResult<ValidatedShare> {
        self.state.super_safe_lock(|state| {
            let session = state.session.clone().ok_or(ProxyError::StaleJob)?;
            let entry = state
                .jobs
                .iter_mut()
                .find(|e| e.job.job_id == share.job_id)
                .ok_or(ProxyError::StaleJob)?;
            let key = share.key();
            if entry.seen.contains(&key) {
                return Err(ProxyError::DuplicateShare);
            }
            let pool_target = target_from_difficulty(entry.difficulty);
            let validated = codec::validate(&entry.job, &session, share, pool_target)?;
            entry.seen.insert(key);
            Ok(validated)
        })
    }
}

/// A pending long poll. Dropping it unregisters the waiter.
#[derive(Debug)]
pub struct LongPoll {
    rx: watch::Receiver<u64>,
}

impl LongPoll {
    /// Waits until waiters are released or `timeout` elapses. Returns `true` when released.
    pub async fn wait(mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.rx.changed()).await,
            Ok(Ok(()))
        )
    }
}
