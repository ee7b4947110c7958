//! Runtime configuration types for the webhook pipeline.
//!
//! These are the validated values the core components are constructed
//! from. File parsing and CLI overrides live in the server crate.

mod admin;
mod pipeline;
mod webhook;

pub use admin::AdminConfig;
pub use pipeline::{ProcessingMode, QueueConfig, RateGuardMode, ScheduleConfig};
pub use webhook::WebhookConfig;
