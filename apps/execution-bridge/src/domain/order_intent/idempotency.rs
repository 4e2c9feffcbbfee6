//! Idempotency key derivation.
//!
//! The key is a SHA-256 fingerprint over the originating signal and every
//! strategy parameter that shapes the order. Redelivery of the same alert yields
//! the same key; any change to what would be traded yields a different one.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use super::aggregate::IntentDraft;
use crate::domain::shared::IdempotencyKey;

const FIELD_SEPARATOR: &[u8] = b"\x1f";

/// Derive the idempotency key of a draft.
#[must_use]
pub fn derive_idempotency_key(draft: &IntentDraft) -> IdempotencyKey {
    let mut hasher = Sha256::new();
    let fields = [
        draft.source_signal.clone(),
        draft.strategy_tag.clone(),
        draft.instrument.to_string(),
        draft.side.as_str().to_string(),
        canonical(draft.quantity),
        draft.order_type.as_str().to_string(),
        draft.limit_price.map(canonical).unwrap_or_default(),
        draft.stop_price.map(canonical).unwrap_or_default(),
        draft.role.as_str().to_string(),
    ];
    for field in &fields {
        hasher.update(field.as_bytes());
        hasher.update(FIELD_SEPARATOR);
    }
    IdempotencyKey::new(hex::encode(hasher.finalize()))
}

/// Fingerprint of a raw alert body, used as its source signal id when the
/// alert carries none.
#[must_use]
pub fn fingerprint_payload(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

/// `100`, `100.0` and `100.00` must hash the same.
fn canonical(value: Decimal) -> String {
    value.normalize().to_string()
}
