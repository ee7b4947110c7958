//! Processors of the webhook pipeline.
//!
//! - `IngestPipeline`: verified delivery -> stored events -> `Dispatcher`
//! - `Dispatcher`: stored event -> queue job, or inline handler call
//! - `JobRunner` / `WorkerPool`: queue job -> handler -> outcome, dead letters
//! - `Scheduler`: cron-fired maintenance tasks under the distributed lock

pub mod dispatcher;
pub mod ingest;
pub mod maintenance;
pub mod scheduler;
pub mod worker;
pub mod worker_pool;

pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
pub use ingest::{ChangeOutcome, IngestError, IngestPipeline, IngestReport};
pub use maintenance::{PendingSweep, StorePrune};
pub use scheduler::{ScheduleError, ScheduledTask, Scheduler, normalize_schedule};
pub use worker::{JobOutcome, JobRunner, WorkerError};
pub use worker_pool::WorkerPool;
