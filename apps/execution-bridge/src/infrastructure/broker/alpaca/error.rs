//! Alpaca-specific error types.

use std::time::Duration;

use thiserror::Error;

use crate::application::ports::BrokerError;

/// Errors from the Alpaca adapter.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlpacaError {
    /// The request never got an answer (DNS, TLS, connection reset).
    #[error("HTTP error: {0}")]
    Network(String),

    /// The request timed out; its outcome is unknown.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// 408 or 5xx; as with a timeout, the outcome of a write is unknown.
    #[error("service unavailable: {status} {message}")]
    Unavailable {
        /// HTTP status.
        status: u16,
        /// Response body or message.
        message: String,
    },

    /// API returned an error we have no better category for.
    #[error("API error: {status} {code} - {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Error code from the API.
        code: String,
        /// Error message from the API.
        message: String,
    },

    /// Order was refused.
    #[error("order rejected: {message}")]
    OrderRejected {
        /// Error code from the API.
        code: Option<String>,
        /// Error message from the API.
        message: String,
    },

    /// Credentials refused.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limited.
    #[error("rate limited")]
    RateLimited {
        /// `Retry-After` header, when sent.
        retry_after_secs: Option<u64>,
    },

    /// Response body did not parse.
    #[error("JSON parsing error: {0}")]
    JsonParse(String),

    /// Order not found.
    #[error("order not found: {order_id}")]
    OrderNotFound {
        /// The order id that was not found.
        order_id: String,
    },

    /// Trade updates stream failure.
    #[error("stream error: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for AlpacaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<AlpacaError> for BrokerError {
    fn from(err: AlpacaError) -> Self {
        match err {
            AlpacaError::Network(message) | AlpacaError::Stream(message) => {
                Self::Connection { message }
            }
            AlpacaError::Timeout(message) => Self::Timeout { message },
            AlpacaError::Unavailable { status, message } => Self::Timeout {
                message: format!("{status}: {message}"),
            },
            AlpacaError::Api {
                status,
                code,
                message,
            } => Self::Unknown {
                message: format!("{status} {code}: {message}"),
            },
            AlpacaError::OrderRejected { code, message } => Self::Rejected {
                code,
                reason: message,
            },
            AlpacaError::AuthenticationFailed(message) => Self::AuthenticationFailed { message },
            AlpacaError::RateLimited { retry_after_secs } => Self::RateLimited {
                retry_after: retry_after_secs.map(Duration::from_secs),
            },
            AlpacaError::JsonParse(message) => Self::Unknown { message },
            AlpacaError::OrderNotFound { order_id } => Self::OrderNotFound { order_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(AlpacaError::Network("refused".into()), "connection")]
    #[test_case(AlpacaError::Timeout("slow".into()), "timeout")]
    #[test_case(AlpacaError::Stream("closed".into()), "connection")]
    #[test_case(AlpacaError::Unavailable { status: 503, message: "busy".into() }, "timeout")]
    #[test_case(AlpacaError::RateLimited { retry_after_secs: Some(3) }, "rate_limited")]
    #[test_case(AlpacaError::OrderRejected { code: None, message: "margin".into() }, "rejected")]
    #[test_case(AlpacaError::AuthenticationFailed("bad key".into()), "authentication")]
    #[test_case(AlpacaError::OrderNotFound { order_id: "x".into() }, "not_found")]
    #[test_case(AlpacaError::JsonParse("eof".into()), "unknown")]
    fn maps_to_broker_error(err: AlpacaError, code: &str) {
        assert_eq!(BrokerError::from(err).code(), code);
    }

    #[test]
    fn retry_after_is_carried() {
        let err: BrokerError = AlpacaError::RateLimited {
            retry_after_secs: Some(7),
        }
        .into();
        assert_eq!(
            err,
            BrokerError::RateLimited {
                retry_after: Some(Duration::from_secs(7))
            }
        );
    }
}
