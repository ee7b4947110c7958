//! Bounded-concurrency worker pool.
//!
//! Polls the queue for due jobs and runs each one on its own task, never
//! more than `concurrency` at a time. Jobs are independent: there is no
//! ordering between them, even for the same subject.
//!
//! While a job runs, its lease is renewed every third of the lease length,
//! so a slow handler keeps the job to itself. Only a worker that stops
//! renewing (crashed or wedged) loses the job to a later claim.

use super::worker::JobRunner;
use crate::queue::{Job, JobQueue, QueueError};
use kanau::processor::Processor;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct WorkerPool {
    runner: Arc<JobRunner>,
    concurrency: usize,
    poll_interval: Duration,
    shutdown_rx: watch::Receiver<bool>,
}

impl WorkerPool {
    pub fn new(
        runner: Arc<JobRunner>,
        concurrency: usize,
        poll_interval: Duration,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            runner,
            concurrency: concurrency.max(1),
            poll_interval,
            shutdown_rx,
        }
    }

    /// Run until shutdown is signalled, then wait for in-flight jobs.
    pub async fn run(mut self) {
        info!(
            queue = self.runner.queue().name(),
            concurrency = self.concurrency,
            "WorkerPool started"
        );
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            let free = permits.available_permits();
            let spawned = if free > 0 {
                self.claim_and_spawn(free, &permits, &mut tasks).await
            } else {
                0
            };
            if spawned > 0 && spawned == free {
                // the queue may hold more; come back once a slot frees up
                continue;
            }

            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("WorkerPool received shutdown signal");
                        break;
                    }
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Worker task panicked");
                    }
                }

                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("WorkerPool shutdown complete");
    }

    async fn claim_and_spawn(
        &self,
        free: usize,
        permits: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
    ) -> usize {
        let jobs = match self.runner.queue().claim(free).await {
            Ok(jobs) => jobs,
            Err(e) => {
                error!(error = %e, "Failed to claim jobs");
                return 0;
            }
        };

        let mut spawned = 0;
        for job in jobs {
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            let runner = self.runner.clone();
            debug!(job_id = %job.id, attempts_made = job.attempts_made, "Job claimed");
            tasks.spawn(async move {
                let _permit = permit;
                let job_id = job.id.clone();
                let renewal = renew_lease(runner.queue().clone(), job.clone());
                tokio::pin!(renewal);
                let result = tokio::select! {
                    result = runner.process(job) => result,
                    never = &mut renewal => match never {},
                };
                if let Err(e) = result {
                    error!(job_id = %job_id, error = %e, "Job processing failed");
                }
            });
            spawned += 1;
        }
        spawned
    }
}

/// Keep the lease on `job` alive until dropped.
async fn renew_lease(queue: Arc<dyn JobQueue>, job: Job) -> Infallible {
    let period = (queue.lease() / 3).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match queue.extend_lease(&job).await {
            Ok(()) => {}
            Err(QueueError::LeaseLost(_)) => {
                warn!(job_id = %job.id, "Lease lost while the job was still running");
                return std::future::pending().await;
            }
            Err(e) => warn!(job_id = %job.id, error = %e, "Failed to renew job lease"),
        }
    }
}
