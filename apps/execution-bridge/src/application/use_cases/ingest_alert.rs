//! Ingest Alert Use Case
//!
//! The synchronous half of alert handling: authenticate, translate, refuse
//! duplicates, persist as NEW. Execution happens asynchronously in the engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::application::ports::{BrokerPort, EventPublisherPort, PositionViewPort};
use crate::application::services::{
    ExecutionEngine, RuleRejection, SignalTranslator, TranslationContext,
};
use crate::domain::alert::AlertSignal;
use crate::domain::order_intent::{IntentStore, OrderIntent, StoreError};
use crate::domain::shared::IntentId;
use crate::observability;

/// Ingestion settings.
#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    /// Shared secret alerts must echo; `None` disables the check.
    pub webhook_secret: Option<String>,
    /// A key whose last intent ended this recently is treated as a replay.
    pub replay_window: Duration,
}

/// Why an alert was not accepted.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// A non-terminal intent already holds the alert's idempotency key.
    #[error("duplicate alert: intent {existing} is still live")]
    DuplicateAlert {
        /// Intent holding the key.
        existing: IntentId,
    },
    /// The same alert was already executed within the replay window.
    #[error("replayed alert: intent {existing} already executed it")]
    Replayed {
        /// Intent that executed it.
        existing: IntentId,
    },
    /// The alert is malformed.
    #[error("invalid alert: {0}")]
    Invalid(String),
    /// The translation rules refused the alert.
    #[error("alert refused: {0}")]
    RuleRejected(#[from] RuleRejection),
    /// Missing or wrong passphrase.
    #[error("unauthorized")]
    Unauthorized,
    /// The store failed; nothing was accepted.
    #[error(transparent)]
    Store(StoreError),
}

impl IngestionError {
    /// Metric label.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::DuplicateAlert { .. } | Self::Replayed { .. } => "duplicate",
            Self::Invalid(_) => "invalid",
            Self::RuleRejected(_) => "rejected",
            Self::Unauthorized => "unauthorized",
            Self::Store(_) => "error",
        }
    }
}

impl From<StoreError> for IngestionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateIdempotencyKey { existing, .. } => {
                Self::DuplicateAlert { existing }
            }
            other => Self::Store(other),
        }
    }
}

/// Accepted alert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestOutcome {
    /// Intents created, in submission order.
    pub intent_ids: Vec<IntentId>,
    /// Live intents a cancel was requested for.
    pub cancelled: Vec<IntentId>,
}

impl IngestOutcome {
    /// Primary intent: the entry of a reversal, the exit of a close.
    #[must_use]
    pub fn intent_id(&self) -> Option<&IntentId> {
        self.intent_ids.last()
    }
}

/// Use case for ingesting alerts.
pub struct IngestAlertUseCase<S, B, P>
where
    S: IntentStore,
    B: BrokerPort,
    P: EventPublisherPort,
{
    store: Arc<S>,
    engine: Arc<ExecutionEngine<S, B, P>>,
    translator: Arc<dyn SignalTranslator>,
    positions: Option<Arc<dyn PositionViewPort>>,
    config: IngestionConfig,
}

impl<S, B, P> IngestAlertUseCase<S, B, P>
where
    S: IntentStore,
    B: BrokerPort + 'static,
    P: EventPublisherPort,
{
    /// Create a new `IngestAlertUseCase`.
    pub fn new(
        store: Arc<S>,
        engine: Arc<ExecutionEngine<S, B, P>>,
        translator: Arc<dyn SignalTranslator>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            store,
            engine,
            translator,
            positions: None,
            config,
        }
    }

    /// Use brokerage positions when the rules need them.
    #[must_use]
    pub fn with_positions(mut self, positions: Arc<dyn PositionViewPort>) -> Self {
        self.positions = Some(positions);
        self
    }

    /// Execute the use case.
    ///
    /// # Errors
    ///
    /// Returns why the alert was not accepted. Refusals (authentication,
    /// rules, validation, duplicates) persist nothing. Superseded intents are
    /// cancelled before the new ones are created, so a store failure while
    /// creating them leaves those cancels in place; the error reports it and
    /// the alert can be resent.
    pub async fn execute(
        &self,
        alert: AlertSignal,
        passphrase: Option<&str>,
    ) -> Result<IngestOutcome, IngestionError> {
        let result = self.ingest(&alert, passphrase).await;
        match &result {
            Ok(outcome) => {
                observability::record_alert("accepted");
                tracing::info!(
                    source_signal = %alert.source_signal_id,
                    instrument = %alert.instrument,
                    action = %alert.action,
                    intents = outcome.intent_ids.len(),
                    cancelled = outcome.cancelled.len(),
                    "Alert accepted"
                );
            }
            Err(e) => {
                observability::record_alert(e.outcome());
                tracing::warn!(
                    source_signal = %alert.source_signal_id,
                    instrument = %alert.instrument,
                    error = %e,
                    "Alert not accepted"
                );
            }
        }
        result
    }

    async fn ingest(
        &self,
        alert: &AlertSignal,
        passphrase: Option<&str>,
    ) -> Result<IngestOutcome, IngestionError> {
        // 1. Authenticate
        if let Some(secret) = &self.config.webhook_secret {
            if passphrase != Some(secret.as_str()) {
                return Err(IngestionError::Unauthorized);
            }
        }
        if alert.instrument.is_empty() {
            return Err(IngestionError::Invalid("symbol must not be empty".to_string()));
        }

        // 2. Translate
        let context = if self.translator.needs_context() {
            let intents = self.store.list_by_instrument(&alert.instrument).await?;
            let snapshot = self
                .positions
                .as_ref()
                .and_then(|p| p.position(&alert.instrument));
            TranslationContext::new(intents, snapshot.as_ref())
        } else {
            TranslationContext::default()
        };
        let translation = self.translator.translate(alert, &context)?;

        // 3. Build and check every intent before persisting any
        let mut intents = Vec::with_capacity(translation.drafts.len());
        for draft in translation.drafts {
            let intent =
                OrderIntent::new(draft).map_err(|e| IngestionError::Invalid(e.to_string()))?;
            self.check_duplicate(&intent).await?;
            intents.push(intent);
        }

        // 4. Cancel what the alert supersedes
        let mut outcome = IngestOutcome::default();
        for intent_id in translation.cancels {
            let reason = format!("superseded by alert {}", alert.source_signal_id);
            match self.engine.request_cancel(&intent_id, &reason).await {
                Ok(_) => outcome.cancelled.push(intent_id),
                Err(e) => tracing::warn!(
                    intent_id = %intent_id,
                    error = %e,
                    "Cancel of superseded intent not sent"
                ),
            }
        }

        // 5. Persist as NEW
        for mut intent in intents {
            self.store.create(&intent).await?;
            self.engine.publish(intent.drain_events()).await;
            outcome.intent_ids.push(intent.intent_id().clone());
        }

        self.engine.wake();
        Ok(outcome)
    }

    async fn check_duplicate(&self, intent: &OrderIntent) -> Result<(), IngestionError> {
        let Some(existing) = self
            .store
            .get_by_idempotency_key(intent.idempotency_key())
            .await?
        else {
            return Ok(());
        };

        if !existing.is_terminal() {
            return Err(IngestionError::DuplicateAlert {
                existing: existing.intent_id().clone(),
            });
        }
        if self.config.replay_window.is_zero() {
            return Ok(());
        }
        let window = TimeDelta::from_std(self.config.replay_window).unwrap_or(TimeDelta::MAX);
        let now = Utc::now();
        if existing
            .updated_at()
            .checked_add_signed(window)
            .is_none_or(|until| until > now)
        {
            return Err(IngestionError::Replayed {
                existing: existing.intent_id().clone(),
            });
        }
        Ok(())
    }
}
