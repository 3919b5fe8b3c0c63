//! Request orchestration for slow, rate-limited external services.

pub mod application;
pub mod batch;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod infra;
pub mod perf;
pub(crate) mod util;
