//! Services built on the orchestration primitives, and the composition root
//! that wires them to the external clients.

pub mod analysis;
pub mod context;
pub mod error;
pub mod health;
pub mod sheets;
pub mod webhooks;

pub use analysis::AnalysisService;
pub use context::Orchestrator;
pub use error::{AppError, ErrorReport};
pub use health::{HealthReport, HealthStatus};
pub use sheets::{SheetLogger, SheetMetadataSource};
pub use webhooks::WebhookNotifier;
