//! Payloads exchanged with the external collaborators.

pub mod analysis;
pub mod error;
pub mod sheets;
pub mod webhook;

pub use analysis::{AnalysisRequest, Categorization};
pub use error::DomainError;
pub use sheets::SheetMetadata;
pub use webhook::{WebhookDelivery, WebhookEnvelope};
