//! Borrower position classification.

use keeper_chain::AccountPosition;
use std::fmt;

/// What the keeper does with a borrower this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionStatus {
    /// No debt left; stop tracking.
    Stale,
    /// Undercollateralized with outstanding debt.
    Candidate,
    Healthy,
}

impl PositionStatus {
    /// Classify a position. Zero debt takes precedence over the NPV check.
    pub fn classify(position: &AccountPosition) -> Self {
        if position.debt == 0 {
            Self::Stale
        } else if position.npv <= 0 && position.debt > 0 {
            Self::Candidate
        } else {
            Self::Healthy
        }
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stale => write!(f, "stale"),
            Self::Candidate => write!(f, "candidate"),
            Self::Healthy => write!(f, "healthy"),
        }
    }
}

/// A tracked borrower together with its freshly read position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorrowerPosition {
    pub borrower: String,
    pub position: AccountPosition,
}

impl BorrowerPosition {
    pub fn status(&self) -> PositionStatus {
        PositionStatus::classify(&self.position)
    }
}
