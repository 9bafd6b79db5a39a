//! Fixed-size pool of job runners.
//!
//! Workers poll a shared queue, sleeping `idle` between empty polls. Each
//! job runs on the blocking thread pool; its error or panic is logged and
//! the worker moves on.
//!
//! A keyed job whose key is already running goes to the back of the queue
//! instead of occupying a worker while it waits.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use relay_sync::SyncError;

use crate::error::DaemonError;
use crate::guard::{InFlight, InFlightGuard};

/// Pause after re-queueing a job whose key is busy.
pub const REQUEUE_DELAY: Duration = Duration::from_millis(250);

type Work = Box<dyn FnOnce() -> Result<(), SyncError> + Send + 'static>;

/// A labelled unit of blocking work.
pub struct Job {
    label: String,
    key: Option<String>,
    work: Work,
}

impl Job {
    pub fn new<F>(label: impl Into<String>, work: F) -> Self
    where
        F: FnOnce() -> Result<(), SyncError> + Send + 'static,
    {
        Self {
            label: label.into(),
            key: None,
            work: Box::new(work),
        }
    }

    /// Never run alongside another job with the same key.
    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn run(self) -> Result<(), SyncError> {
        (self.work)()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("label", &self.label)
            .field("key", &self.key)
            .finish()
    }
}

pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Job>,
    token: CancellationToken,
    in_flight: InFlight,
    workers: Vec<JoinHandle<()>>,
}

/// What every worker shares.
#[derive(Clone)]
struct Shared {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
    requeue: mpsc::UnboundedSender<Job>,
    in_flight: InFlight,
    idle: Duration,
    token: CancellationToken,
}

impl WorkerPool {
    /// Spawn `size` workers that stop when `parent` is cancelled.
    pub fn start(size: usize, idle: Duration, parent: &CancellationToken) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = parent.child_token();
        let in_flight = InFlight::new();
        let shared = Shared {
            rx: Arc::new(Mutex::new(rx)),
            requeue: tx.clone(),
            in_flight: in_flight.clone(),
            idle,
            token: token.clone(),
        };
        let workers = (0..size)
            .map(|id| tokio::spawn(worker(id, shared.clone())))
            .collect();
        tracing::info!(workers = size, "worker pool started");
        Self {
            tx,
            token,
            in_flight,
            workers,
        }
    }

    pub fn submit(&self, job: Job) -> Result<(), DaemonError> {
        tracing::debug!(job = %job.label, "job queued");
        self.tx
            .send(job)
            .map_err(|_| DaemonError::ChannelClosed("job queue"))
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Whether a job holding `key` is running right now.
    pub fn is_running(&self, key: &str) -> bool {
        self.in_flight.is_held(key)
    }

    /// Stop every worker once its current job, if any, finishes.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.workers {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "worker exited abnormally");
            }
        }
        tracing::info!("worker pool stopped");
    }
}

async fn worker(id: usize, shared: Shared) {
    let token = &shared.token;
    loop {
        if token.is_cancelled() {
            break;
        }
        let next = shared.rx.lock().await.try_recv();
        let pause = match next {
            Ok(job) => match claim(&shared.in_flight, &job) {
                Ok(guard) => {
                    run_job(id, job, guard).await;
                    continue;
                }
                Err(key) => {
                    tracing::debug!(worker = id, job = %job.label, key = %key, "key busy, job re-queued");
                    if shared.requeue.send(job).is_err() {
                        tracing::error!(worker = id, key = %key, "job queue closed, job dropped");
                    }
                    REQUEUE_DELAY
                }
            },
            Err(TryRecvError::Empty) => shared.idle,
            Err(TryRecvError::Disconnected) => break,
        };
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }
    tracing::debug!(worker = id, "worker exiting");
}

/// Take `job`'s key, or hand the busy key back.
fn claim(in_flight: &InFlight, job: &Job) -> Result<Option<InFlightGuard>, String> {
    match job.key() {
        None => Ok(None),
        Some(key) => in_flight
            .try_acquire(key)
            .map(Some)
            .ok_or_else(|| key.to_string()),
    }
}

async fn run_job(worker: usize, job: Job, guard: Option<InFlightGuard>) {
    let label = job.label.clone();
    let started = Instant::now();
    tracing::info!(worker, job = %label, "job started");

    let work = move || {
        let _held = guard;
        job.run()
    };
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(())) => tracing::info!(
            worker,
            job = %label,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job finished"
        ),
        Ok(Err(err)) => tracing::error!(worker, job = %label, error = %err, "job failed"),
        Err(err) if err.is_panic() => tracing::error!(worker, job = %label, "job panicked"),
        Err(err) => tracing::error!(worker, job = %label, error = %err, "job aborted"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    async fn wait_for(counter: &AtomicUsize, target: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < target {
            assert!(Instant::now() < deadline, "timed out waiting for jobs");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn failing_and_panicking_jobs_do_not_stop_the_worker() {
        let token = CancellationToken::new();
        let pool = WorkerPool::start(1, Duration::from_millis(5), &token);
        let done = Arc::new(AtomicUsize::new(0));

        pool.submit(Job::new("panics", || panic!("boom"))).unwrap();
        pool.submit(Job::new("fails", || {
            Err(SyncError::Query {
                subject: "change X".to_string(),
                reason: "no such change".to_string(),
            })
        }))
        .unwrap();
        for n in 0..3 {
            let done = Arc::clone(&done);
            pool.submit(Job::new(format!("ok-{n}"), move || {
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        }

        wait_for(&done, 3).await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn jobs_are_spread_over_workers() {
        let token = CancellationToken::new();
        let pool = WorkerPool::start(3, Duration::from_millis(5), &token);
        assert_eq!(pool.size(), 3);
        let done = Arc::new(AtomicUsize::new(0));
        for n in 0..10 {
            let done = Arc::clone(&done);
            pool.submit(Job::new(format!("job-{n}"), move || {
                std::thread::sleep(Duration::from_millis(2));
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
        }
        wait_for(&done, 10).await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn cancelling_the_parent_stops_idle_workers() {
        let token = CancellationToken::new();
        let pool = WorkerPool::start(2, Duration::from_secs(3600), &token);
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), pool.shutdown())
            .await
            .expect("workers stop promptly");
    }

    #[tokio::test]
    async fn busy_key_does_not_hold_up_other_jobs() {
        let token = CancellationToken::new();
        let pool = WorkerPool::start(2, Duration::from_millis(5), &token);
        let first_done = Arc::new(AtomicUsize::new(0));
        let second_done = Arc::new(AtomicUsize::new(0));
        let unrelated_done = Arc::new(AtomicUsize::new(0));
        let (release, released) = std::sync::mpsc::channel::<()>();

        let done = Arc::clone(&first_done);
        pool.submit(
            Job::new("propagate X", move || {
                released.recv().ok();
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .keyed("change:X"),
        )
        .unwrap();
        let (first, done) = (Arc::clone(&first_done), Arc::clone(&second_done));
        pool.submit(
            Job::new("propagate X again", move || {
                assert_eq!(first.load(Ordering::SeqCst), 1, "ran alongside the first job");
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .keyed("change:X"),
        )
        .unwrap();
        let done = Arc::clone(&unrelated_done);
        pool.submit(Job::new("sync nova", move || {
            done.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

        wait_for(&unrelated_done, 1).await;
        assert!(pool.is_running("change:X"));
        assert_eq!(second_done.load(Ordering::SeqCst), 0);

        release.send(()).unwrap();
        wait_for(&second_done, 1).await;
        assert_eq!(first_done.load(Ordering::SeqCst), 1);
        pool.shutdown().await;
    }
}
