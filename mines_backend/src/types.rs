use candid::{CandidType, Deserialize};
use ic_stable_structures::storable::Bound;
use ic_stable_structures::Storable;
use serde::Serialize;
use std::borrow::Cow;

// =============================================================================
// CONSTANTS
// =============================================================================

pub const GRID_SIZE: u8 = 25; // 5x5
pub const DEFAULT_MINES: u8 = 3;
pub const HOUSE_EDGE: f64 = 0.97; // 3% house edge
pub const STEP_CAP: u8 = 20; // Multiplier track length
pub const DECIMALS: u64 = 100; // 1.00 = 100 units
pub const DEMO_INITIAL_BALANCE: u64 = 5_000 * DECIMALS;
pub const PENDING_TIMEOUT_NS: u64 = 60_000_000_000; // 60 seconds
pub const BET_MEMO: &str = "Bet on Mines";
pub const WIN_MEMO: &str = "Win on Mines";

// =============================================================================
// GAME STATE
// =============================================================================

#[derive(CandidType, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameState {
    Idle,
    Playing,
    Lost,
    Won,
}

impl GameState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, GameState::Lost | GameState::Won)
    }
}

#[derive(CandidType, Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RevealOutcome {
    Safe,
    Mine,
    AutoWin,
}

// =============================================================================
// API RESULTS
// =============================================================================

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub struct StartResult {
    pub round_id: u64,
    pub bet_amount: u64,
    pub mine_count: u8,
    pub balance: u64,
    pub multipliers: Vec<f64>,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub struct RevealResult {
    pub outcome: RevealOutcome,
    pub tile: u8,
    pub revealed_count: u8,
    pub current_multiplier: f64,
    pub current_payout: Option<u64>,
    // Filled on Mine (full board disclosure) and AutoWin
    pub mines: Option<Vec<u8>>,
    pub settlement: Option<CashoutResult>,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub struct CashoutResult {
    pub round_id: u64,
    pub win_amount: u64,
    pub multiplier: f64,
    pub balance: u64,
    pub settled: bool,
    pub settlement_error: Option<String>,
}

/// Snapshot of a session for rendering.
#[derive(CandidType, Deserialize, Serialize, Clone, Debug)]
pub struct SessionView {
    pub game_state: GameState,
    pub pending: bool,
    pub grid_size: u8,
    pub mine_count: u8,
    pub bet_amount: Option<u64>,
    pub revealed_tiles: Vec<u8>,
    pub current_multiplier: f64,
    pub current_payout: Option<u64>,
    pub multipliers: Vec<f64>,
    pub balance: u64,
    // Only populated once the round is over
    pub mines: Option<Vec<u8>>,
    // The mine that ended the round
    pub exploded_tile: Option<u8>,
    pub unsettled_win: Option<UnsettledWin>,
}

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct UnsettledWin {
    pub round_id: u64,
    pub amount: u64,
    pub attempts: u32,
    pub last_error: Option<String>,
}

// =============================================================================
// STATISTICS
// =============================================================================

#[derive(CandidType, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct GameStats {
    pub total_games: u64,
    pub total_won: u64,
    pub total_busted: u64,
    pub total_wagered: u64,
    pub total_paid_out: u64,
    pub total_refunded: u64,
}

impl Storable for GameStats {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(serde_json::to_vec(self).expect("GameStats serialize to JSON"))
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        serde_json::from_slice(&bytes).unwrap_or_default()
    }

    const BOUND: Bound = Bound::Bounded {
        max_size: 256,
        is_fixed_size: false,
    };
}
