use candid::{CandidType, Deserialize};
use serde::Serialize;
use thiserror::Error;

// =============================================================================
// ERRORS
// =============================================================================

/// Every failure the game engine can report.
///
/// The `Display` text doubles as the notification shown to the player, so keep
/// each message short.
#[derive(CandidType, Deserialize, Serialize, Error, Clone, Debug, PartialEq)]
pub enum MinesError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Bet must be greater than zero")]
    InvalidBet,

    #[error("Insufficient balance! Bet {bet}, balance {balance}")]
    InsufficientBalance { bet: u64, balance: u64 },

    #[error("Not allowed right now: {0}")]
    IllegalTransition(String),

    #[error("Tile {0} already revealed")]
    DuplicateReveal(u8),

    #[error("Tile {tile} is outside the {grid_size}-tile grid")]
    InvalidTile { tile: u8, grid_size: u8 },

    #[error("Reveal at least one tile before cashing out")]
    NothingToCashOut,

    #[error("Previous win of {amount} is still settling")]
    SettlementPending { amount: u64 },

    #[error("Sync Error: {0}")]
    LedgerFailure(String),

    #[error("Randomness unavailable: {0}")]
    RandomnessUnavailable(String),

    #[error("Please login first!")]
    AnonymousCaller,
}

impl MinesError {
    pub(crate) fn illegal(msg: impl Into<String>) -> Self {
        MinesError::IllegalTransition(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        MinesError::InvalidConfiguration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_short_notifications() {
        let err = MinesError::InsufficientBalance { bet: 1_000, balance: 500 };
        assert_eq!(err.to_string(), "Insufficient balance! Bet 1000, balance 500");

        let err = MinesError::LedgerFailure("timed out".to_string());
        assert_eq!(err.to_string(), "Sync Error: timed out");

        assert_eq!(MinesError::AnonymousCaller.to_string(), "Please login first!");
    }
}
