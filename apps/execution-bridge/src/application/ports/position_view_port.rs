//! Position View Port
//!
//! Read-only view of the brokerage positions last seen by reconciliation.

use crate::domain::reconciliation::PositionSnapshot;
use crate::domain::shared::Instrument;

/// Latest known brokerage positions.
pub trait PositionViewPort: Send + Sync {
    /// Position in `instrument`, `None` when unknown.
    fn position(&self, instrument: &Instrument) -> Option<PositionSnapshot>;
}
