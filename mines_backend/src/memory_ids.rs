//! Central registry for stable memory IDs.
//!
//! All memory IDs must be unique across the canister.
//!
//! Allocation strategy:
//! - 0-9: Canister settings
//! - 10-19: Player sessions
//! - 20-29: Demo ledger balances
//! - 30-39: Statistics

// Settings (0-9)
pub const SETTINGS_MEMORY_ID: u8 = 0;

// Sessions (10-19)
pub const SESSIONS_MEMORY_ID: u8 = 10;

// Demo ledger (20-29)
pub const DEMO_BALANCES_MEMORY_ID: u8 = 20;

// Statistics (30-39)
pub const STATS_MEMORY_ID: u8 = 30;
