//! Spreadsheet operations and how a flushed group turns into calls.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use uuid::Uuid;

/// One spreadsheet row: ordered JSON cell values.
pub type Row = Vec<Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    Append,
    Update { range: String },
    Create,
}

#[derive(Debug, Clone)]
pub struct BatchedOperation {
    pub id: Uuid,
    pub destination_key: String,
    pub kind: OperationKind,
    pub values: Vec<Row>,
    pub enqueued_at: Instant,
}

impl BatchedOperation {
    pub fn new(destination_key: impl Into<String>, kind: OperationKind, values: Vec<Row>) -> Self {
        Self {
            id: Uuid::new_v4(),
            destination_key: destination_key.into(),
            kind,
            values,
            enqueued_at: Instant::now(),
        }
    }

    pub fn append(destination_key: impl Into<String>, rows: Vec<Row>) -> Self {
        Self::new(destination_key, OperationKind::Append, rows)
    }

    pub fn update(
        destination_key: impl Into<String>,
        range: impl Into<String>,
        rows: Vec<Row>,
    ) -> Self {
        Self::new(
            destination_key,
            OperationKind::Update {
                range: range.into(),
            },
            rows,
        )
    }

    pub fn create(destination_key: impl Into<String>, rows: Vec<Row>) -> Self {
        Self::new(destination_key, OperationKind::Create, rows)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeUpdate {
    pub range: String,
    pub values: Vec<Row>,
}

/// A single call against the spreadsheet service.
#[derive(Debug, Clone, PartialEq)]
pub enum SheetCall {
    Append {
        destination: String,
        rows: Vec<Row>,
    },
    BatchUpdate {
        destination: String,
        ranges: Vec<RangeUpdate>,
    },
    Create {
        destination: String,
        rows: Vec<Row>,
    },
}

impl SheetCall {
    pub fn destination(&self) -> &str {
        match self {
            Self::Append { destination, .. }
            | Self::BatchUpdate { destination, .. }
            | Self::Create { destination, .. } => destination,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Append { .. } => "append",
            Self::BatchUpdate { .. } => "batch_update",
            Self::Create { .. } => "create",
        }
    }
}

/// Turn one destination's flushed operations into calls: every append merged
/// into one call, every update merged into one batch-update, each create on
/// its own. Order within each merged call follows enqueue order.
pub(crate) fn plan_calls(destination: &str, operations: Vec<BatchedOperation>) -> Vec<SheetCall> {
    let mut rows = Vec::new();
    let mut ranges = Vec::new();
    let mut creates = Vec::new();

    for operation in operations {
        match operation.kind {
            OperationKind::Append => rows.extend(operation.values),
            OperationKind::Update { range } => ranges.push(RangeUpdate {
                range,
                values: operation.values,
            }),
            OperationKind::Create => creates.push(SheetCall::Create {
                destination: destination.to_string(),
                rows: operation.values,
            }),
        }
    }

    let mut calls = Vec::with_capacity(creates.len() + 2);
    if !rows.is_empty() {
        calls.push(SheetCall::Append {
            destination: destination.to_string(),
            rows,
        });
    }
    if !ranges.is_empty() {
        calls.push(SheetCall::BatchUpdate {
            destination: destination.to_string(),
            ranges,
        });
    }
    calls.extend(creates);
    calls
}
