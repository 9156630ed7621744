//! Tracked background tasks
//!
//! Every long-running loop (coordinator timers, simulated workloads) is spawned
//! through a [`TaskSupervisor`] so shutdown can cancel it and wait for it with a
//! deadline instead of leaking detached tasks.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{InfraError, Result};

struct TrackedTask {
    id: usize,
    name: String,
    handle: JoinHandle<()>,
    started_at: Instant,
}

/// Decrements the active counter even when the task is aborted
struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshot of a supervisor's task bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStats {
    pub owner: String,
    pub spawned_total: usize,
    pub active: usize,
    pub tracked: usize,
}

/// Spawns named tasks tied to one cancellation token
pub struct TaskSupervisor {
    owner: String,
    next_task_id: AtomicUsize,
    active: Arc<AtomicUsize>,
    tasks: Mutex<Vec<TrackedTask>>,
    cancel_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl TaskSupervisor {
    /// Create a supervisor with a 5 second shutdown deadline
    pub fn new(owner: impl Into<String>) -> Self {
        Self::with_shutdown_timeout(owner, Duration::from_secs(5))
    }

    /// Create a supervisor with a custom shutdown deadline
    pub fn with_shutdown_timeout(owner: impl Into<String>, shutdown_timeout: Duration) -> Self {
        Self {
            owner: owner.into(),
            next_task_id: AtomicUsize::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            tasks: Mutex::new(Vec::new()),
            cancel_token: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    /// Token that is cancelled when [`shutdown`](Self::shutdown) starts
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Spawn a tracked task; it stops at its next await point once shutdown begins
    pub fn spawn<F>(&self, name: impl Into<String>, future: F) -> Result<usize>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel_token.is_cancelled() {
            return Err(InfraError::Task(format!(
                "{} is shutting down, refusing new task",
                self.owner
            )));
        }

        let name = name.into();
        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let token = self.cancel_token.clone();
        let active = Arc::clone(&self.active);
        let owner = self.owner.clone();
        let task_name = name.clone();

        active.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            let _active = ActiveGuard(active);
            debug!("Task started: {} [{}] in {}", task_name, id, owner);
            tokio::select! {
                _ = future => debug!("Task completed: {} [{}] in {}", task_name, id, owner),
                _ = token.cancelled() => debug!("Task cancelled: {} [{}] in {}", task_name, id, owner),
            }
        });

        self.tasks.lock().push(TrackedTask {
            id,
            name,
            handle,
            started_at: Instant::now(),
        });
        Ok(id)
    }

    /// Number of tasks that have not finished yet
    pub fn active_task_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Drop handles of finished tasks, returning how many are still tracked
    pub fn cleanup_finished(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.handle.is_finished());
        tasks.len()
    }

    /// Cancel every task and wait for them, aborting stragglers after the deadline
    pub async fn shutdown(&self) -> Result<()> {
        let started = Instant::now();
        debug!(
            "Shutting down {} with {} active tasks",
            self.owner,
            self.active_task_count()
        );
        self.cancel_token.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        let mut handles = Vec::with_capacity(tasks.len());
        let mut names = Vec::with_capacity(tasks.len());
        for task in tasks {
            names.push((task.id, task.name, task.started_at));
            handles.push(task.handle);
        }

        let abort_handles: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let joined =
            tokio::time::timeout(self.shutdown_timeout, futures::future::join_all(handles)).await;

        match joined {
            Ok(_) => {
                debug!("{} shut down in {:?}", self.owner, started.elapsed());
                Ok(())
            }
            Err(_) => {
                for ((id, name, started_at), abort) in names.iter().zip(abort_handles) {
                    if !abort.is_finished() {
                        warn!(
                            "Force aborting task {} [{}] after {:?}",
                            name,
                            id,
                            started_at.elapsed()
                        );
                        abort.abort();
                    }
                }
                Err(InfraError::ShutdownTimeout(self.shutdown_timeout))
            }
        }
    }

    /// Task bookkeeping snapshot
    pub fn stats(&self) -> TaskStats {
        TaskStats {
            owner: self.owner.clone(),
            spawned_total: self.next_task_id.load(Ordering::SeqCst),
            active: self.active_task_count(),
            tracked: self.tasks.lock().len(),
        }
    }
}
