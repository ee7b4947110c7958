//! Cron-driven periodic tasks, serialized across instances.
//!
//! Every instance runs the same schedule. Each firing goes through
//! `LockManager::run_exclusively` under `lock:jobs:<name>`, so at most one
//! instance executes a given task at a time; the others skip that firing.

use crate::config::ScheduleConfig;
use crate::lock::{LockError, LockManager, job_lock_key};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("invalid cron expression `{expression}` for job {job}: {source}")]
    InvalidCron {
        job: String,
        expression: String,
        #[source]
        source: cron::error::Error,
    },
    #[error("no task named {0}")]
    UnknownTask(String),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("task failed: {0}")]
    Task(String),
}

/// A periodic job.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), ScheduleError>;
}

/// `cron` wants a seconds field; standard five-field expressions get `0`.
pub fn normalize_schedule(schedule: &str) -> String {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    let normalized = fields.join(" ");
    if fields.len() == 5 {
        format!("0 {normalized}")
    } else {
        normalized
    }
}

struct ScheduledJob {
    task: Arc<dyn ScheduledTask>,
    schedule: cron::Schedule,
    lock_ttl: Duration,
}

pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    locks: LockManager,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(locks: LockManager, shutdown_rx: watch::Receiver<bool>) -> Self {
        Self {
            jobs: Vec::new(),
            locks,
            shutdown_rx,
        }
    }

    /// Build a scheduler from configuration, looking tasks up by name.
    pub fn from_config(
        configs: &[ScheduleConfig],
        tasks: &HashMap<String, Arc<dyn ScheduledTask>>,
        locks: LockManager,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<Self, ScheduleError> {
        let mut scheduler = Self::new(locks, shutdown_rx);
        for config in configs {
            let task = tasks
                .get(&config.job)
                .ok_or_else(|| ScheduleError::UnknownTask(config.job.clone()))?;
            scheduler.add(task.clone(), &config.cron, config.lock_ttl)?;
        }
        Ok(scheduler)
    }

    pub fn add(
        &mut self,
        task: Arc<dyn ScheduledTask>,
        expression: &str,
        lock_ttl: Duration,
    ) -> Result<(), ScheduleError> {
        let normalized = normalize_schedule(expression);
        let schedule =
            cron::Schedule::from_str(&normalized).map_err(|source| ScheduleError::InvalidCron {
                job: task.name().to_string(),
                expression: normalized.clone(),
                source,
            })?;
        self.jobs.push(ScheduledJob {
            task,
            schedule,
            lock_ttl,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Run every job on its schedule until shutdown.
    pub async fn run(self) {
        info!(jobs = self.jobs.len(), "Scheduler started");
        let mut loops = JoinSet::new();
        for job in self.jobs {
            loops.spawn(job_loop(job, self.locks.clone(), self.shutdown_rx.clone()));
        }
        while loops.join_next().await.is_some() {}
        info!("Scheduler shutdown complete");
    }
}

/// Run `task` once under its job lock. Returns `false` when another holder
/// had the lock.
pub async fn fire(
    locks: &LockManager,
    task: &Arc<dyn ScheduledTask>,
    lock_ttl: Duration,
) -> Result<bool, ScheduleError> {
    let key = job_lock_key(task.name());
    match locks
        .run_exclusively(&key, lock_ttl, || task.run())
        .await?
    {
        None => {
            debug!(job = task.name(), "Job running elsewhere, skipped");
            Ok(false)
        }
        Some(result) => {
            result?;
            Ok(true)
        }
    }
}

async fn job_loop(job: ScheduledJob, locks: LockManager, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        let Some(next) = job.schedule.upcoming(Utc).next() else {
            info!(job = job.task.name(), "Schedule has no future occurrences");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }

            _ = tokio::time::sleep(wait) => {
                match fire(&locks, &job.task, job.lock_ttl).await {
                    Ok(true) => debug!(job = job.task.name(), "Job finished"),
                    Ok(false) => {}
                    Err(e) => error!(job = job.task.name(), error = %e, "Job failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockStore, MemoryLockStore};
    use crate::utils::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::OffsetDateTime;

    struct Counter {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ScheduledTask for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn run(&self) -> Result<(), ScheduleError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ScheduleError::Task("nope".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn counter(fail: bool) -> Arc<Counter> {
        Arc::new(Counter {
            runs: AtomicUsize::new(0),
            fail,
        })
    }

    fn locks() -> (LockManager, Arc<MemoryLockStore>) {
        let store = Arc::new(MemoryLockStore::new(Arc::new(ManualClock::new(
            OffsetDateTime::UNIX_EPOCH,
        ))));
        (LockManager::new(store.clone()), store)
    }

    #[test]
    fn five_field_expressions_gain_a_seconds_field() {
        assert_eq!(normalize_schedule("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_schedule("  0 0  * * * * "), "0 0 * * * *");
    }

    #[test]
    fn invalid_cron_is_rejected_with_job_name() {
        let (locks, _) = locks();
        let (_tx, rx) = watch::channel(false);
        let mut scheduler = Scheduler::new(locks, rx);
        let err = scheduler
            .add(counter(false), "not a cron", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidCron { ref job, .. } if job == "counter"));
        scheduler
            .add(counter(false), "*/5 * * * *", Duration::from_secs(1))
            .unwrap();
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn unknown_task_in_config_is_rejected() {
        let (locks, _) = locks();
        let (_tx, rx) = watch::channel(false);
        let configs = vec![ScheduleConfig {
            job: "token-refresh".to_string(),
            cron: "0 * * * *".to_string(),
            lock_ttl: Duration::from_secs(60),
        }];
        let result = Scheduler::from_config(&configs, &HashMap::new(), locks, rx);
        assert!(matches!(result, Err(ScheduleError::UnknownTask(name)) if name == "token-refresh"));
    }

    #[tokio::test]
    async fn firing_is_skipped_while_another_instance_holds_the_lock() {
        let (locks, store) = locks();
        let task = counter(false);
        let task_dyn: Arc<dyn ScheduledTask> = task.clone();

        assert!(store
            .acquire("lock:jobs:counter", "other-instance", Duration::from_secs(60))
            .await
            .unwrap());
        assert!(!fire(&locks, &task_dyn, Duration::from_secs(60)).await.unwrap());
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);

        store.release("lock:jobs:counter", "other-instance").await.unwrap();
        assert!(fire(&locks, &task_dyn, Duration::from_secs(60)).await.unwrap());
        assert_eq!(task.runs.load(Ordering::SeqCst), 1);
        assert_eq!(store.holder("lock:jobs:counter"), None);
    }

    #[tokio::test]
    async fn task_failure_is_reported_and_lock_released() {
        let (locks, store) = locks();
        let task: Arc<dyn ScheduledTask> = counter(true);
        assert!(matches!(
            fire(&locks, &task, Duration::from_secs(60)).await,
            Err(ScheduleError::Task(_))
        ));
        assert_eq!(store.holder("lock:jobs:counter"), None);
    }

    #[tokio::test]
    async fn every_second_schedule_fires_and_stops_on_shutdown() {
        let (locks, _) = locks();
        let task = counter(false);
        let (tx, rx) = watch::channel(false);
        let mut scheduler = Scheduler::new(locks, rx);
        scheduler
            .add(task.clone(), "* * * * * *", Duration::from_secs(5))
            .unwrap();
        let handle = tokio::spawn(scheduler.run());

        tokio::time::timeout(Duration::from_secs(5), async {
            while task.runs.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
