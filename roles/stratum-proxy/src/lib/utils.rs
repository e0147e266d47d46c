use std::{
    sync::{Mutex as Mutex_, MutexGuard, PoisonError},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{info, warn};

/// Thin wrapper around [`std::sync::Mutex`] with closure based locking.
///
/// The lock is released as soon as the closure returns, so no guard can be held across an
/// `.await` point by accident.
#[derive(Debug)]
pub struct Mutex<T>(Mutex_<T>);

impl<T> Mutex<T> {
    pub fn new(v: T) -> Self {
        Mutex(Mutex_::new(v))
    }

    /// Locks the mutex and runs `thunk` on the inner value. Returns the [`PoisonError`] instead
    /// of panicking when another thread panicked while holding the lock.
    pub fn safe_lock<F, Ret>(&self, thunk: F) -> Result<Ret, PoisonError<MutexGuard<'_, T>>>
    where
        F: FnOnce(&mut T) -> Ret,
    {
        let mut lock = self.0.lock()?;
        let return_value = thunk(&mut *lock);
        drop(lock);
        Ok(return_value)
    }

    /// Like [`Mutex::safe_lock`] but recovers the inner value of a poisoned lock. Every state
    /// guarded this way is replaced wholesale inside the closures, so a panic cannot leave it
    /// half written.
    pub fn super_safe_lock<F, Ret>(&self, thunk: F) -> Ret
    where
        F: FnOnce(&mut T) -> Ret,
    {
        let mut lock = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        thunk(&mut *lock)
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Mutex::new(T::default())
    }
}

/// Messages used for coordinating shutdown across different components.
///
/// Sent through a broadcast channel; every long running task holds a receiver.
#[derive(Debug, Clone)]
pub enum ShutdownMessage {
    /// Shutdown all components immediately
    ShutdownAll,
    /// Drop a specific push miner connection by ID
    DownstreamShutdown(u32),
}

/// Seconds since the unix epoch.
pub fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Runs the configured block notify command, `%s` is replaced by the new block hash.
///
/// The command goes through `sh -c` and is not awaited beyond logging its exit status.
pub fn spawn_block_notify(cmd: &str, prev_hash: &str) {
    let cmd = cmd.replace("%s", prev_hash);
    info!("Running block notify command: {cmd}");
    match tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&cmd)
        .kill_on_drop(false)
        .spawn()
    {
        Ok(mut child) => {
            tokio::spawn(async move {
                match child.wait().await {
                    Ok(status) if !status.success() => {
                        warn!("Block notify command exited with {status}")
                    }
                    Ok(_) => {}
                    Err(e) => warn!("Block notify command failed: {e:?}"),
                }
            });
        }
        Err(e) => warn!("Cannot start block notify command: {e:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn block_notify_substitutes_hash() {
        let path = std::env::temp_dir().join(format!("block-notify-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        spawn_block_notify(&format!("echo %s %s > {}", path.display()), "00ab");
        let mut written = String::new();
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            written = std::fs::read_to_string(&path).unwrap_or_default();
            if !written.is_empty() {
                break;
            }
        }
        assert_eq!(written.trim(), "00ab 00ab");
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn default_mutex_wraps_default_value() {
        let m: Mutex<Vec<u8>> = Mutex::default();
        assert!(m.super_safe_lock(|v| v.is_empty()));
    }

    #[test]
    fn super_safe_lock_recovers_from_poison() {
        let m = std::sync::Arc::new(Mutex::new(1u32));
        let m2 = m.clone();
        let _ = std::thread::spawn(move || {
            m2.super_safe_lock(|_| panic!("poison"));
        })
        .join();
        assert!(m.safe_lock(|v| *v).is_err());
        assert_eq!(m.super_safe_lock(|v| *v), 1);
    }
}
