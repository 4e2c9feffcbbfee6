//! Strongly-typed identifiers for domain entities.
//!
//! These prevent mixing up IDs from different contexts.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! define_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new identifier from a string.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

define_id!(
    IntentId,
    "Process-generated identifier of an order intent. Also used as the broker client order id."
);
define_id!(BrokerOrderId, "Broker's unique identifier for an order.");
define_id!(
    IdempotencyKey,
    "Deterministic fingerprint of an alert used to detect duplicate deliveries."
);

impl IntentId {
    /// Generate a new unique identifier using UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Tradeable instrument symbol in normalized form.
///
/// Normalization uppercases and drops separators so that `eur/usd` and
/// `EURUSD` name the same instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Instrument(String);

impl Instrument {
    /// Create a normalized instrument symbol.
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(
            value
                .as_ref()
                .trim()
                .chars()
                .filter(|c| !matches!(c, '/' | ' '))
                .collect::<String>()
                .to_uppercase(),
        )
    }

    /// Get the normalized symbol.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the symbol is empty after normalization.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Instrument {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_ids_are_unique() {
        let a = IntentId::generate();
        let b = IntentId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn broker_order_id_round_trips_through_display() {
        let id = BrokerOrderId::new("b-123");
        assert_eq!(id.to_string(), "b-123");
        assert_eq!(id.as_ref(), "b-123");
        assert_eq!(id.into_inner(), "b-123");
    }

    #[test]
    fn instrument_is_normalized() {
        assert_eq!(Instrument::new("eur/usd").as_str(), "EURUSD");
        assert_eq!(Instrument::new(" aapl ").as_str(), "AAPL");
        assert_eq!(Instrument::new("EURUSD"), Instrument::new("EUR/USD"));
        assert!(Instrument::new(" / ").is_empty());
    }

    #[test]
    fn ids_serialize_transparently() {
        let id = IntentId::new("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
        let parsed: Instrument = serde_json::from_str("\"MSFT\"").unwrap();
        assert_eq!(parsed.as_str(), "MSFT");
    }
}
