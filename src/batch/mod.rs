//! Spreadsheet request batching.
//!
//! Operations are grouped by destination. A group flushes when it reaches
//! `batch_size` or `max_wait` after its oldest operation, whichever comes
//! first. Appends merge into one call, updates into one batch-update, and
//! creates are sent one by one. Every call goes through the spreadsheet
//! [`RequestQueue`](crate::dispatch::RequestQueue) at medium priority, and
//! all operations of a flush share its outcome.

mod batcher;
mod config;
mod operation;

pub use batcher::{BatchError, BatchTicket, BatcherStats, RequestBatcher};
pub use config::BatcherConfig;
pub use operation::{BatchedOperation, OperationKind, RangeUpdate, Row, SheetCall};
