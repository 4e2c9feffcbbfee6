//! Role an intent plays in a position's life.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ParseValueError;

/// Role an intent plays in a position's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentRole {
    /// Opens (or adds to) a position.
    #[default]
    Entry,
    /// Flattens a position on signal.
    Exit,
    /// Bracket child closing at the profit target.
    TakeProfit,
    /// Bracket child closing at the protective stop.
    StopLoss,
}

impl IntentRole {
    /// Storage name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Exit => "exit",
            Self::TakeProfit => "take_profit",
            Self::StopLoss => "stop_loss",
        }
    }

    /// Bracket children are created by the bridge itself, never by an alert.
    #[must_use]
    pub const fn is_bracket_child(&self) -> bool {
        matches!(self, Self::TakeProfit | Self::StopLoss)
    }
}

impl fmt::Display for IntentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentRole {
    type Err = ParseValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entry" => Ok(Self::Entry),
            "exit" => Ok(Self::Exit),
            "take_profit" => Ok(Self::TakeProfit),
            "stop_loss" => Ok(Self::StopLoss),
            _ => Err(ParseValueError::new("intent role", s)),
        }
    }
}
