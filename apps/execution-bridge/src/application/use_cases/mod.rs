//! Application Use Cases
//!
//! Use cases orchestrate domain logic to fulfill application requirements.

mod cancel_intent;
mod ingest_alert;
mod query_intents;

pub use cancel_intent::{CancelIntentUseCase, CancelResult};
pub use ingest_alert::{IngestAlertUseCase, IngestOutcome, IngestionConfig, IngestionError};
pub use query_intents::{IntentFilter, QueryIntentsUseCase};
