//! Bounded, best-effort capture worker pool
//!
//! Producers hand jobs to [`StatisticsWorkerPool::submit`], which never
//! waits: when the queue is full the job is dropped and counted. A fixed set
//! of workers drains the queue into the capture service.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::capture::StatisticsCaptureService;
use crate::config::StatisticsConfig;
use crate::error::Result;
use crate::models::{AcknowledgedEvent, CaptureOutcome, FiredEvent, ResolvedEvent};

/// A unit of capture work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CaptureJob {
    /// Alert fired
    Fired(FiredEvent),
    /// Alert resolved
    Resolved(ResolvedEvent),
    /// Alert acknowledged
    Acknowledged(AcknowledgedEvent),
}

impl CaptureJob {
    /// Job type tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fired(_) => "fired",
            Self::Resolved(_) => "resolved",
            Self::Acknowledged(_) => "acknowledged",
        }
    }

    /// Fingerprint the job refers to
    pub fn fingerprint(&self) -> &str {
        match self {
            Self::Fired(e) => &e.fingerprint,
            Self::Resolved(e) => &e.fingerprint,
            Self::Acknowledged(e) => &e.fingerprint,
        }
    }
}

#[derive(Default)]
struct PoolCounters {
    submitted: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
}

/// Snapshot of pool throughput
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Jobs accepted onto the queue
    pub submitted: u64,
    /// Jobs rejected because the queue was full or closed
    pub dropped: u64,
    /// Jobs handled without error
    pub processed: u64,
    /// Jobs whose capture failed
    pub failed: u64,
    /// Jobs waiting in the queue
    pub queued: usize,
    /// Queue capacity
    pub queue_size: usize,
    /// Number of workers
    pub workers: usize,
}

/// Fixed-size worker pool feeding the capture service
pub struct StatisticsWorkerPool {
    sender: RwLock<Option<mpsc::Sender<CaptureJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
    queue_size: usize,
    worker_count: usize,
}

impl StatisticsWorkerPool {
    /// Spawn the workers. Must be called from within a Tokio runtime.
    pub fn start(capture: Arc<StatisticsCaptureService>, config: &StatisticsConfig) -> Self {
        let worker_count = config.worker_count.max(1);
        let queue_size = config.queue_size.max(1);
        let (tx, rx) = mpsc::channel(queue_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(PoolCounters::default());

        let workers = (0..worker_count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    rx.clone(),
                    capture.clone(),
                    counters.clone(),
                ))
            })
            .collect();

        info!(worker_count, queue_size, "Statistics worker pool started");

        Self {
            sender: RwLock::new(Some(tx)),
            workers: Mutex::new(workers),
            counters,
            queue_size,
            worker_count,
        }
    }

    /// Enqueue a job without waiting. Returns false if it was dropped.
    pub fn submit(&self, job: CaptureJob) -> bool {
        let kind = job.kind();
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            debug!(job = kind, fingerprint = job.fingerprint(), "Worker pool stopped, dropping job");
            self.record_drop(kind);
            return false;
        };

        match sender.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("statistics_jobs_submitted_total", "kind" => kind).increment(1);
                true
            }
            Err(TrySendError::Full(job)) => {
                warn!(
                    job = kind,
                    fingerprint = job.fingerprint(),
                    queue_size = self.queue_size,
                    "Statistics queue full, dropping job"
                );
                self.record_drop(kind);
                false
            }
            Err(TrySendError::Closed(job)) => {
                debug!(job = kind, fingerprint = job.fingerprint(), "Statistics queue closed, dropping job");
                self.record_drop(kind);
                false
            }
        }
    }

    /// Enqueue a fired event
    pub fn submit_fired(&self, event: FiredEvent) -> bool {
        self.submit(CaptureJob::Fired(event))
    }

    /// Enqueue a resolved event
    pub fn submit_resolved(&self, event: ResolvedEvent) -> bool {
        self.submit(CaptureJob::Resolved(event))
    }

    /// Enqueue an acknowledged event
    pub fn submit_acknowledged(&self, event: AcknowledgedEvent) -> bool {
        self.submit(CaptureJob::Acknowledged(event))
    }

    fn record_drop(&self, kind: &'static str) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("statistics_jobs_dropped_total", "kind" => kind).increment(1);
    }

    /// Current throughput counters
    pub fn stats(&self) -> PoolStats {
        let queued = self
            .sender
            .read()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity());
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            processed: self.counters.processed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            queued,
            queue_size: self.queue_size,
            workers: self.worker_count,
        }
    }

    /// Stop accepting jobs, drain the queue and wait for the workers to exit
    pub async fn shutdown(&self) {
        let sender = self.sender.write().take();
        if sender.is_none() {
            return;
        }
        drop(sender);

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Statistics worker terminated abnormally");
            }
        }

        let stats = self.stats();
        info!(
            processed = stats.processed,
            failed = stats.failed,
            dropped = stats.dropped,
            "Statistics worker pool stopped"
        );
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<CaptureJob>>>,
    capture: Arc<StatisticsCaptureService>,
    counters: Arc<PoolCounters>,
) {
    debug!(worker = id, "Statistics worker started");
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            break;
        };

        let kind = job.kind();
        let fingerprint = job.fingerprint().to_string();
        match process(&capture, job).await {
            Ok(outcome) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("statistics_jobs_processed_total", "kind" => kind).increment(1);
                debug!(worker = id, job = kind, %fingerprint, ?outcome, "Processed statistics job");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("statistics_jobs_failed_total", "kind" => kind).increment(1);
                error!(worker = id, job = kind, %fingerprint, error = %e, "Statistics job failed");
            }
        }
    }
    debug!(worker = id, "Statistics worker stopped");
}

async fn process(capture: &StatisticsCaptureService, job: CaptureJob) -> Result<CaptureOutcome> {
    match job {
        CaptureJob::Fired(event) => capture.capture_fired(event).await,
        CaptureJob::Resolved(event) => capture.capture_resolved(event).await,
        CaptureJob::Acknowledged(event) => capture.capture_acknowledged(event).await,
    }
}
