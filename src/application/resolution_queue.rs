//! Resolution Queue
//!
//! Bounded background queue for resolve-if-absent work, drained by one
//! worker task. Accepted jobs are finished before `shutdown` returns, and
//! a job that cannot be queued runs inline instead of being dropped.

use crate::application::ResolutionService;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Default number of jobs that may wait for the worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolutionJob {
    ip: String,
    visitor_key: String,
}

pub struct ResolutionQueue {
    service: Arc<ResolutionService>,
    sender: Mutex<Option<mpsc::Sender<ResolutionJob>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ResolutionQueue {
    /// Create the queue and spawn its worker.
    pub fn start(service: Arc<ResolutionService>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(Self::run_worker(service.clone(), rx));

        tracing::info!("resolution queue started, capacity={}", capacity.max(1));

        Self {
            service,
            sender: Mutex::new(Some(tx)),
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Each job runs in its own task so a panic only loses that job.
    async fn run_worker(service: Arc<ResolutionService>, mut rx: mpsc::Receiver<ResolutionJob>) {
        while let Some(job) = rx.recv().await {
            let service = service.clone();
            let key = job.visitor_key.clone();
            let handle = tokio::spawn(async move {
                service.resolve_if_absent(&job.ip, &job.visitor_key).await;
            });
            if let Err(e) = handle.await {
                tracing::error!("resolution job for {} aborted: {}", key, e);
            }
        }
        tracing::debug!("resolution queue worker drained");
    }

    fn current_sender(&self) -> Option<mpsc::Sender<ResolutionJob>> {
        self.sender.lock().ok().and_then(|guard| guard.clone())
    }

    /// Dropping the last sender lets the worker drain and exit.
    fn close(&self) {
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }

    /// Queue a resolve-if-absent job.
    ///
    /// When the queue is full or already shut down the job runs inline and
    /// this call waits for it.
    pub async fn submit(&self, ip: &str, visitor_key: &str) {
        let job = ResolutionJob {
            ip: ip.to_string(),
            visitor_key: visitor_key.to_string(),
        };

        let job = match self.current_sender() {
            Some(tx) => match tx.try_send(job) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(job)) => {
                    tracing::warn!("resolution queue full, resolving {} inline", job.visitor_key);
                    job
                }
                Err(mpsc::error::TrySendError::Closed(job)) => {
                    tracing::warn!("resolution queue closed, resolving {} inline", job.visitor_key);
                    job
                }
            },
            None => {
                tracing::warn!("resolution queue shut down, resolving {} inline", job.visitor_key);
                job
            }
        };

        self.service.resolve_if_absent(&job.ip, &job.visitor_key).await;
    }

    /// Stop accepting jobs and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        self.close();

        let worker = self.worker.lock().await.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!("resolution queue worker failed: {}", e);
            }
            tracing::info!("resolution queue drained");
        }
    }
}
