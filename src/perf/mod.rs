//! Performance recording.
//!
//! - [`PerformanceRecorder`]: bounded, in-memory metric stream with windowed
//!   average and percentile queries, mirrored to the `metrics` facade.
//! - [`with_timing`]: measures an async operation and records its duration
//!   under `name` or `name_error`.

mod recorder;
mod timing;

pub use recorder::{
    MetricSummary, PerformanceMetric, PerformanceRecorder, RecorderConfig, RecorderStats, Tags,
    tags,
};
pub use timing::with_timing;
