// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Delayed, de-duplicating work queue and the worker pool draining it.
//!
//! An id is held by at most one worker at a time. Adding an id that is
//! already queued is a no-op; adding an id that a worker is processing marks
//! it dirty, and it is queued once more when that worker finishes. Any number
//! of adds during one run therefore cause at most one further run.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::executor::OperationExecutor;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    shutting_down: bool,
}

/// Work queue of operation ids.
#[derive(Debug)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    available: Notify,
    stopped: watch::Sender<bool>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            stopped,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue `id` unless it is already pending.
    pub fn add(&self, id: &str) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(id) {
            return;
        }

        state.dirty.insert(id.to_string());
        if state.processing.contains(id) {
            return;
        }

        state.queue.push_back(id.to_string());
        drop(state);
        self.available.notify_one();
    }

    /// Queue `id` once `delay` has passed.
    ///
    /// Pending delayed adds are dropped when the queue shuts down.
    pub fn add_after(self: &Arc<Self>, id: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(id);
            return;
        }

        let queue = Arc::clone(self);
        let mut stopped = self.stopped.subscribe();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => queue.add(&id),
                _ = stopped.wait_for(|stopped| *stopped) => {}
            }
        });
    }

    /// Wait for the next id, marking it as processing.
    ///
    /// Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(id) = state.queue.pop_front() {
                    state.dirty.remove(&id);
                    state.processing.insert(id.clone());
                    return Some(id);
                }
            }

            notified.await;
        }
    }

    /// Release `id` after processing; queue it again if it was re-added
    /// meanwhile.
    pub fn done(&self, id: &str) {
        let mut state = self.lock();
        state.processing.remove(id);
        if state.dirty.contains(id) && !state.shutting_down {
            state.queue.push_back(id.to_string());
            drop(state);
            self.available.notify_one();
        }
    }

    /// Ids waiting to be picked up.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Whether nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop handing out ids and drop pending delayed adds.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.stopped.send_replace(true);
        self.available.notify_waiters();
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of concurrent workers.
    pub workers: usize,
    /// Name used in logs.
    pub name: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            name: "operations".to_string(),
        }
    }
}

/// Pool of workers feeding queued operation ids to an executor.
#[derive(Clone)]
pub struct OperationQueue {
    queue: Arc<WorkQueue>,
    executor: Arc<dyn OperationExecutor>,
    config: QueueConfig,
    shutdown: Arc<Notify>,
}

impl OperationQueue {
    /// Create a queue for `executor`.
    pub fn new(executor: Arc<dyn OperationExecutor>, config: QueueConfig) -> Self {
        Self {
            queue: Arc::new(WorkQueue::new()),
            executor,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Schedule processing of an operation.
    pub fn add(&self, operation_id: &str) {
        debug!(queue = %self.config.name, operation_id = %operation_id, "Operation queued");
        self.queue.add(operation_id);
    }

    /// Underlying work queue.
    pub fn work_queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the workers until shutdown is signalled.
    ///
    /// In-flight executions complete before this returns; queued ids are left
    /// unprocessed.
    pub async fn run(self) {
        let workers = self.config.workers.max(1);
        info!(queue = %self.config.name, workers, "Operation queue started");

        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            tasks.spawn(worker_loop(
                worker_id,
                self.config.name.clone(),
                self.queue.clone(),
                self.executor.clone(),
            ));
        }

        self.shutdown.notified().await;
        info!(queue = %self.config.name, "Operation queue shutting down");
        self.queue.shut_down();

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(queue = %self.config.name, error = %e, "Queue worker task failed");
            }
        }

        info!(queue = %self.config.name, "Operation queue stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    name: String,
    queue: Arc<WorkQueue>,
    executor: Arc<dyn OperationExecutor>,
) {
    debug!(queue = %name, worker_id, "Worker started");

    while let Some(operation_id) = queue.get().await {
        process_item(&name, &queue, &executor, &operation_id).await;
    }

    debug!(queue = %name, worker_id, "Worker stopped");
}

async fn process_item(
    name: &str,
    queue: &Arc<WorkQueue>,
    executor: &Arc<dyn OperationExecutor>,
    operation_id: &str,
) {
    // Runs on its own task so a panicking stage cannot take the worker down.
    let task = {
        let executor = executor.clone();
        let operation_id = operation_id.to_string();
        tokio::spawn(async move { executor.execute(&operation_id).await })
    };

    match task.await {
        Ok(result) if result.requeue => {
            debug!(
                queue = %name,
                operation_id = %operation_id,
                delay_secs = result.delay.as_secs(),
                "Requeueing operation"
            );
            queue.add_after(operation_id, result.delay);
        }
        Ok(_) => {}
        Err(e) if e.is_panic() => {
            error!(
                queue = %name,
                operation_id = %operation_id,
                "Panic while processing operation"
            );
        }
        Err(e) => {
            warn!(
                queue = %name,
                operation_id = %operation_id,
                error = %e,
                "Operation task cancelled"
            );
        }
    }

    queue.done(operation_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_coalesces_pending_ids() {
        let queue = WorkQueue::new();
        queue.add("op-1");
        queue.add("op-1");
        queue.add("op-2");
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await.as_deref(), Some("op-1"));
        assert_eq!(queue.get().await.as_deref(), Some("op-2"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_readd_while_processing_runs_once_more() {
        let queue = WorkQueue::new();
        queue.add("op-1");
        let id = queue.get().await.unwrap();

        for _ in 0..5 {
            queue.add("op-1");
        }
        assert!(queue.is_empty());
        assert!(queue.lock().processing.contains("op-1"));

        queue.done(&id);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await.as_deref(), Some("op-1"));
        queue.done("op-1");
        assert!(queue.is_empty());
        assert!(queue.lock().processing.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_after_waits_for_delay() {
        let queue = Arc::new(WorkQueue::new());
        queue.add_after("op-1", Duration::from_secs(20));

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shut_down_drops_delayed_adds() {
        let queue = Arc::new(WorkQueue::new());
        queue.add_after("op-1", Duration::from_secs(5));
        queue.shut_down();
        assert!(queue.lock().shutting_down);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.is_empty());
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_get_wakes_on_shutdown() {
        let queue = Arc::new(WorkQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(waiter.await.unwrap(), None);
    }
}
