//! Bounded background worker pool
//!
//! Jobs wait in a bounded queue; a single dispatcher takes one semaphore
//! permit per job before spawning it, which caps the number of load
//! generators running at once.

use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ExecutionError;

pub type Job = BoxFuture<'static, ()>;

pub struct WorkerPool {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    semaphore: Arc<Semaphore>,
    max_workers: usize,
    capacity: usize,
}

impl WorkerPool {
    /// Start the pool. Must be called inside a tokio runtime.
    pub fn new(max_workers: usize, capacity: usize) -> Self {
        let max_workers = max_workers.max(1);
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let semaphore = Arc::new(Semaphore::new(max_workers));
        let dispatcher = tokio::spawn(dispatch(rx, semaphore.clone()));

        Self {
            tx: Mutex::new(Some(tx)),
            dispatcher: Mutex::new(Some(dispatcher)),
            semaphore,
            max_workers,
            capacity,
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Job>, ExecutionError> {
        lock(&self.tx)
            .clone()
            .ok_or_else(|| ExecutionError::Launch("worker pool is shut down".to_string()))
    }

    /// Enqueue without waiting; fails with `QueueFull` when no slot is free
    pub fn try_submit(&self, job: Job) -> Result<(), ExecutionError> {
        match self.sender()?.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(ExecutionError::QueueFull(self.capacity))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ExecutionError::Launch(
                "worker pool is shut down".to_string(),
            )),
        }
    }

    /// Enqueue, waiting for a free slot
    pub async fn submit(&self, job: Job) -> Result<(), ExecutionError> {
        self.sender()?
            .send(job)
            .await
            .map_err(|_| ExecutionError::Launch("worker pool is shut down".to_string()))
    }

    /// Stop accepting jobs, drain the queue and wait for running jobs
    pub async fn shutdown(&self) {
        lock(&self.tx).take();

        let dispatcher = lock(&self.dispatcher).take();
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                warn!("Worker pool dispatcher failed: {}", e);
            }
        }

        // every permit back means every job finished
        match self.semaphore.acquire_many(self.max_workers as u32).await {
            Ok(permits) => drop(permits),
            Err(e) => warn!("Worker pool semaphore closed: {}", e),
        }
        debug!("Worker pool shut down");
    }
}

async fn dispatch(mut rx: mpsc::Receiver<Job>, semaphore: Arc<Semaphore>) {
    while let Some(job) = rx.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        tokio::spawn(async move {
            job.await;
            drop(permit);
        });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
