#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod entities;
pub mod framework;
pub mod handlers;
pub mod lock;
pub mod processors;
pub mod queue;
pub mod rate_guard;
pub mod store;
pub mod utils;
