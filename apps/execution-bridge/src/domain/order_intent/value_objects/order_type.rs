//! Order type.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseValueError;

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Execute at the best available price.
    #[default]
    Market,
    /// Execute at `limit_price` or better.
    Limit,
    /// Becomes a market order once `stop_price` trades.
    Stop,
}

impl OrderType {
    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Market => write!(f, "MARKET"),
            Self::Limit => write!(f, "LIMIT"),
            Self::Stop => write!(f, "STOP"),
        }
    }
}

impl FromStr for OrderType {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "market" | "mkt" => Ok(Self::Market),
            "limit" | "lmt" => Ok(Self::Limit),
            "stop" | "stp" => Ok(Self::Stop),
            _ => Err(ParseValueError::new("order type", s)),
        }
    }
}
