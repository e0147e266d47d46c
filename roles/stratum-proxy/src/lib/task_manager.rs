use std::sync::Mutex as StdMutex;
use tokio::task::JoinHandle;

/// Tracks the tokio tasks spawned by the proxy so shutdown can join or abort them.
///
/// The getwork listener spawns one task per HTTP connection, so finished handles are dropped
/// every time a new task is registered instead of piling up for the life of the process.
pub struct TaskManager {
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self {
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Spawns `fut` inside a span named after `name` and the caller location.
    #[track_caller]
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        use tracing::Instrument;
        let location = std::panic::Location::caller();
        let span = tracing::trace_span!(
            "task",
            task = name,
            file = location.file(),
            line = location.line(),
        );

        let handle = tokio::spawn(fut.instrument(span));
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Number of tasks that have not finished yet.
    pub fn running(&self) -> usize {
        self.tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Waits for all managed tasks to complete.
    pub async fn join_all(&self) {
        let handles = {
            let mut tasks = self
                .tasks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            std::mem::take(&mut *tasks)
        };

        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Aborts all managed tasks without waiting for them.
    pub async fn abort_all(&self) {
        let mut tasks = self
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }
}
