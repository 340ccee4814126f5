// ── Worker pool ──
//
// Supervises a fixed number of workers. Each worker reports how it ended;
// the pool respawns restartable exits, retires fatal ones and stops once
// every worker is gone.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::{Id, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Process exit code a worker uses to say "do not restart me".
pub const FATAL_EXIT_CODE: i32 = 50;

/// How a worker ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Clean stop, usually after shutdown. Not respawned.
    Graceful,
    /// Unexpected failure. Respawned immediately.
    Restartable(String),
    /// Unrecoverable. Not respawned.
    Fatal(String),
}

impl WorkerExit {
    /// Interpret a process exit code. `None` (killed, disconnected) and `0`
    /// are graceful.
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            None | Some(0) => Self::Graceful,
            Some(FATAL_EXIT_CODE) => Self::Fatal(format!("exit status {FATAL_EXIT_CODE}")),
            Some(code) => Self::Restartable(format!("exit status {code}")),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::Graceful => 0,
            Self::Restartable(_) => 1,
            Self::Fatal(_) => FATAL_EXIT_CODE,
        }
    }
}

/// How the pool as a whole stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolOutcome {
    /// Shutdown was requested and every worker has finished.
    Shutdown,
    /// Every worker exited fatally.
    AllFatal,
}

/// Creates worker futures.
pub trait WorkerFactory: Send + Sync + 'static {
    /// Start worker `id`. The worker must return once `shutdown` fires.
    fn spawn(
        &self,
        id: usize,
        shutdown: CancellationToken,
    ) -> impl Future<Output = WorkerExit> + Send + 'static;
}

// ── WorkerPool ───────────────────────────────────────────────────

pub struct WorkerPool<F: WorkerFactory> {
    size: usize,
    factory: Arc<F>,
    shutdown: CancellationToken,
    live: watch::Sender<usize>,
}

impl<F: WorkerFactory> WorkerPool<F> {
    pub fn new(size: usize, factory: F, shutdown: CancellationToken) -> Self {
        let (live, _) = watch::channel(0);
        Self {
            size: size.max(1),
            factory: Arc::new(factory),
            shutdown,
            live,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of running workers, updated as workers come and go.
    pub fn live_workers(&self) -> watch::Receiver<usize> {
        self.live.subscribe()
    }

    /// Run the pool until shutdown completes or every worker is fatal.
    pub async fn run(&self) -> PoolOutcome {
        let mut workers: JoinSet<WorkerExit> = JoinSet::new();
        let mut ids: Vec<(Id, usize)> = Vec::with_capacity(self.size);

        for id in 0..self.size {
            debug!(worker = id, "Spawning worker");
            self.spawn_worker(&mut workers, &mut ids, id);
        }
        info!(workers = self.size, "worker pool started");

        while let Some(joined) = workers.join_next_with_id().await {
            let (task_id, exit) = match joined {
                Ok((task_id, exit)) => (task_id, exit),
                Err(e) => (
                    e.id(),
                    WorkerExit::Restartable(format!("worker panicked: {e}")),
                ),
            };
            let worker = take_worker(&mut ids, task_id);
            self.live.send_replace(workers.len());

            match exit {
                WorkerExit::Graceful => debug!(worker, "worker exited"),
                WorkerExit::Restartable(reason) => {
                    if self.shutdown.is_cancelled() {
                        debug!(worker, %reason, "worker stopped during shutdown");
                    } else {
                        warn!(worker, %reason, "Worker exited unexpectedly, respawning.");
                        self.spawn_worker(&mut workers, &mut ids, worker);
                    }
                }
                WorkerExit::Fatal(reason) => {
                    warn!(worker, %reason, "worker exited fatally");
                    if workers.is_empty() && !self.shutdown.is_cancelled() {
                        warn!("All workers exited fatally, stopping.");
                        return PoolOutcome::AllFatal;
                    }
                }
            }
        }

        PoolOutcome::Shutdown
    }

    fn spawn_worker(&self, workers: &mut JoinSet<WorkerExit>, ids: &mut Vec<(Id, usize)>, id: usize) {
        let handle = workers.spawn(self.factory.spawn(id, self.shutdown.child_token()));
        ids.push((handle.id(), id));
        self.live.send_replace(workers.len());
    }
}

fn take_worker(ids: &mut Vec<(Id, usize)>, task_id: Id) -> usize {
    ids.iter()
        .position(|(tid, _)| *tid == task_id)
        .map_or(usize::MAX, |pos| ids.swap_remove(pos).1)
}
