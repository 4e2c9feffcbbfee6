//! Application Services
//!
//! Long-running services that coordinate domain logic with the broker and
//! the intent store. Use cases call into them; `main` spawns their run loops.

pub mod backoff;
mod brackets;
mod convergence;
mod execution_engine;
mod reconciliation_engine;
mod session_manager;
mod signal_rules;
mod update_dispatcher;

pub use backoff::{Backoff, ReconnectPolicy};
pub use brackets::bracket_children;
pub use convergence::{Convergence, broker_target, converge, reconcile_against};
pub use execution_engine::{DriveSummary, ExecutionConfig, ExecutionEngine, ExecutionError};
pub use reconciliation_engine::{
    ReconciliationConfig, ReconciliationEngine, ReconciliationError,
};
pub use session_manager::{SessionConfig, SessionError, SessionEvent, SessionManager};
pub use signal_rules::{
    DirectTranslator, PositionAwareTranslator, RuleRejection, RuleSet, SignalTranslator,
    Translation, TranslationContext, translator_for,
};
pub use update_dispatcher::UpdateDispatcher;
