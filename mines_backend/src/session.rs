use ic_stable_structures::storable::Bound;
use ic_stable_structures::Storable;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;

use crate::board;
use crate::config::GameConfig;
use crate::error::MinesError;
use crate::ledger::LedgerError;
use crate::multiplier::{self, multiplier_at};
use crate::rng::RngProvider;
use crate::types::{
    CashoutResult, GameState, RevealOutcome, RevealResult, SessionView, StartResult, UnsettledWin,
    BET_MEMO, WIN_MEMO,
};

// =============================================================================
// ROUND
// =============================================================================

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Round {
    pub id: u64,
    pub bet_amount: u64,
    pub config: GameConfig,
    pub multipliers: Vec<f64>,
    mines: BTreeSet<u8>,
    pub revealed: Vec<u8>,
    pub exploded: Option<u8>,
    pub win_amount: Option<u64>,
    pub started_at: u64,
}

impl Round {
    pub(crate) fn mines(&self) -> &BTreeSet<u8> {
        &self.mines
    }

    fn current_multiplier(&self) -> Option<f64> {
        multiplier_at(&self.multipliers, self.revealed.len())
    }

    fn all_safe_revealed(&self) -> bool {
        self.revealed.len() == self.config.safe_tiles() as usize
    }
}

// =============================================================================
// LEDGER PROTOCOL
// =============================================================================

/// A balance update the caller must send to the ledger and report back.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerRequest {
    pub round_id: u64,
    pub new_balance: u64,
    pub delta: i64,
    pub memo: &'static str,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct PendingStart {
    round: Round,
    balance_before: u64,
    requested_at: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct Settlement {
    round_id: u64,
    amount: u64,
    multiplier: f64,
    // Ledger balance once this credit has applied
    target_balance: u64,
    attempts: u32,
    last_error: Option<String>,
    in_flight_since: Option<u64>,
    // A previous send may have applied; check the ledger before sending again
    #[serde(default)]
    outcome_unknown: bool,
    created_at: u64,
}

/// Outcome of a safe/mine reveal, plus the credit to send when it won the round.
#[derive(Clone, Debug)]
pub struct RevealStep {
    pub result: RevealResult,
    pub settlement: Option<LedgerRequest>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StaleRecovery {
    pub refunded: Option<u64>,
    pub released_settlement: bool,
}

// =============================================================================
// SESSION
// =============================================================================

/// One player's game: configuration, balance mirror and the current round.
///
/// Every operation validates before it mutates, so a returned error means
/// nothing changed.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MinesSession {
    config: GameConfig,
    multipliers: Vec<f64>,
    state: GameState,
    balance: u64,
    round: Option<Round>,
    pending_start: Option<PendingStart>,
    settlement: Option<Settlement>,
    next_round_id: u64,
}

impl MinesSession {
    pub fn new(config: GameConfig, balance: u64) -> Result<Self, MinesError> {
        config.validate()?;
        let multipliers =
            multiplier::generate_capped(config.grid_size, config.mine_count, config.house_edge, config.step_cap)?;
        Ok(Self {
            config,
            multipliers,
            state: GameState::Idle,
            balance,
            round: None,
            pending_start: None,
            settlement: None,
            next_round_id: 1,
        })
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn multipliers(&self) -> &[f64] {
        &self.multipliers
    }

    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    pub fn is_pending(&self) -> bool {
        self.pending_start.is_some()
    }

    pub fn pending_round_id(&self) -> Option<u64> {
        self.pending_start.as_ref().map(|p| p.round.id)
    }

    pub fn unsettled_win(&self) -> Option<UnsettledWin> {
        self.settlement.as_ref().map(|s| UnsettledWin {
            round_id: s.round_id,
            amount: s.amount,
            attempts: s.attempts,
            last_error: s.last_error.clone(),
        })
    }

    /// Unsettled and not currently being sent to the ledger.
    pub fn needs_settlement_retry(&self) -> bool {
        self.settlement
            .as_ref()
            .is_some_and(|s| s.in_flight_since.is_none())
    }

    /// The last send of the unsettled win may have reached the ledger.
    pub fn settlement_outcome_unknown(&self) -> bool {
        self.settlement.as_ref().is_some_and(|s| s.outcome_unknown)
    }

    fn ensure_not_pending(&self) -> Result<(), MinesError> {
        if self.pending_start.is_some() {
            return Err(MinesError::illegal("round is still starting"));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    pub fn configure(&mut self, config: GameConfig) -> Result<(), MinesError> {
        self.ensure_not_pending()?;
        if self.state == GameState::Playing {
            return Err(MinesError::illegal("cannot change settings during a round"));
        }
        config.validate()?;
        let multipliers =
            multiplier::generate_capped(config.grid_size, config.mine_count, config.house_edge, config.step_cap)?;
        self.config = config;
        self.multipliers = multipliers;
        Ok(())
    }

    /// Replace the mirror with the ledger's authoritative balance.
    pub fn sync_balance(&mut self, balance: u64) -> Result<(), MinesError> {
        self.ensure_not_pending()?;
        if let Some(s) = &self.settlement {
            return Err(MinesError::SettlementPending { amount: s.amount });
        }
        self.balance = balance;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Start (two-phase)
    // -------------------------------------------------------------------------

    /// Phase one: build the round and debit the mirror tentatively.
    ///
    /// All fallible local work (config, board, multipliers) happens here so the
    /// ledger is only asked to debit a round that is ready to play.
    pub fn begin_start<R: RngProvider>(
        &mut self,
        bet_amount: u64,
        mine_count: u8,
        rng: &mut R,
        now: u64,
    ) -> Result<LedgerRequest, MinesError> {
        self.ensure_not_pending()?;
        if self.state == GameState::Playing {
            return Err(MinesError::illegal("round already in progress"));
        }
        if let Some(s) = &self.settlement {
            return Err(MinesError::SettlementPending { amount: s.amount });
        }
        if bet_amount == 0 {
            return Err(MinesError::InvalidBet);
        }
        let delta = i64::try_from(bet_amount).map_err(|_| MinesError::InvalidBet)?;

        let config = self.config.with_mines(mine_count);
        config.validate()?;
        if bet_amount > self.balance {
            return Err(MinesError::InsufficientBalance {
                bet: bet_amount,
                balance: self.balance,
            });
        }

        let multipliers =
            multiplier::generate_capped(config.grid_size, config.mine_count, config.house_edge, config.step_cap)?;
        let mines = board::place(config.grid_size, config.mine_count, rng)?;

        let round = Round {
            id: self.next_round_id,
            bet_amount,
            config: config.clone(),
            multipliers: multipliers.clone(),
            mines,
            revealed: Vec::new(),
            exploded: None,
            win_amount: None,
            started_at: now,
        };
        let round_id = round.id;

        let balance_before = self.balance;
        self.balance -= bet_amount;
        self.next_round_id += 1;
        self.config = config;
        self.multipliers = multipliers;
        self.pending_start = Some(PendingStart {
            round,
            balance_before,
            requested_at: now,
        });

        Ok(LedgerRequest {
            round_id,
            new_balance: self.balance,
            delta: -delta,
            memo: BET_MEMO,
        })
    }

    /// Phase two: commit on ledger success, otherwise restore the pre-bet balance.
    ///
    /// The pending start is consumed either way, so the rollback runs once.
    pub fn complete_start(
        &mut self,
        round_id: u64,
        outcome: Result<(), LedgerError>,
    ) -> Result<StartResult, MinesError> {
        let pending = match self.pending_start.take() {
            Some(p) if p.round.id == round_id => p,
            other => {
                self.pending_start = other;
                return Err(MinesError::illegal(format!("no pending start for round {}", round_id)));
            }
        };

        match outcome {
            Ok(()) => {
                let round = pending.round;
                let result = StartResult {
                    round_id: round.id,
                    bet_amount: round.bet_amount,
                    mine_count: round.config.mine_count,
                    balance: self.balance,
                    multipliers: round.multipliers.clone(),
                };
                self.round = Some(round);
                self.state = GameState::Playing;
                Ok(result)
            }
            Err(e) => {
                self.balance = pending.balance_before;
                self.round = None;
                self.state = GameState::Idle;
                Err(MinesError::LedgerFailure(format!("Bet not placed. {}", e)))
            }
        }
    }

    // -------------------------------------------------------------------------
    // Reveal / cashout
    // -------------------------------------------------------------------------

    pub fn reveal(&mut self, tile: u8, now: u64) -> Result<RevealStep, MinesError> {
        self.ensure_not_pending()?;
        if self.state != GameState::Playing {
            return Err(MinesError::illegal(format!("cannot reveal while {:?}", self.state)));
        }
        let round = self
            .round
            .as_mut()
            .ok_or_else(|| MinesError::illegal("no active round"))?;

        if tile >= round.config.grid_size {
            return Err(MinesError::InvalidTile {
                tile,
                grid_size: round.config.grid_size,
            });
        }
        if round.revealed.contains(&tile) {
            return Err(MinesError::DuplicateReveal(tile));
        }

        if round.mines.contains(&tile) {
            round.exploded = Some(tile);
            let result = RevealResult {
                outcome: RevealOutcome::Mine,
                tile,
                revealed_count: round.revealed.len() as u8,
                current_multiplier: 0.0,
                current_payout: None,
                mines: Some(round.mines.iter().copied().collect()),
                settlement: None,
            };
            self.state = GameState::Lost;
            return Ok(RevealStep {
                result,
                settlement: None,
            });
        }

        round.revealed.push(tile);
        let current = round.current_multiplier().unwrap_or(1.0);
        let current_payout = multiplier::payout(round.bet_amount, current);
        let revealed_count = round.revealed.len() as u8;

        if !round.all_safe_revealed() {
            return Ok(RevealStep {
                result: RevealResult {
                    outcome: RevealOutcome::Safe,
                    tile,
                    revealed_count,
                    current_multiplier: current,
                    current_payout: Some(current_payout),
                    mines: None,
                    settlement: None,
                },
                settlement: None,
            });
        }

        // Every safe tile found: cash out automatically
        let request = self.settle_win(now)?;
        let mines = self.round.as_ref().map(|r| r.mines.iter().copied().collect());
        Ok(RevealStep {
            result: RevealResult {
                outcome: RevealOutcome::AutoWin,
                tile,
                revealed_count,
                current_multiplier: current,
                current_payout: Some(current_payout),
                mines,
                settlement: None,
            },
            settlement: Some(request),
        })
    }

    pub fn cash_out(&mut self, now: u64) -> Result<LedgerRequest, MinesError> {
        self.ensure_not_pending()?;
        if self.state != GameState::Playing {
            return Err(MinesError::illegal(format!("cannot cash out while {:?}", self.state)));
        }
        let revealed = self.round.as_ref().map_or(0, |r| r.revealed.len());
        if revealed == 0 {
            return Err(MinesError::NothingToCashOut);
        }
        self.settle_win(now)
    }

    /// Bank the current payout: credit the mirror, mark Won, queue the credit.
    fn settle_win(&mut self, now: u64) -> Result<LedgerRequest, MinesError> {
        let round = self
            .round
            .as_mut()
            .ok_or_else(|| MinesError::illegal("no active round"))?;
        let multiplier = round
            .current_multiplier()
            .ok_or(MinesError::NothingToCashOut)?;
        let win_amount = multiplier::payout(round.bet_amount, multiplier);
        let delta = i64::try_from(win_amount).unwrap_or(i64::MAX);

        round.win_amount = Some(win_amount);
        let round_id = round.id;
        self.balance = self.balance.saturating_add(win_amount);
        self.state = GameState::Won;
        self.settlement = Some(Settlement {
            round_id,
            amount: win_amount,
            multiplier,
            target_balance: self.balance,
            attempts: 0,
            last_error: None,
            in_flight_since: Some(now),
            outcome_unknown: false,
            created_at: now,
        });

        Ok(LedgerRequest {
            round_id,
            new_balance: self.balance,
            delta,
            memo: WIN_MEMO,
        })
    }

    // -------------------------------------------------------------------------
    // Settlement
    // -------------------------------------------------------------------------

    /// Record the ledger's answer to a win credit.
    ///
    /// A failure keeps the round Won and the win owed; it is retried later.
    pub fn complete_settlement(
        &mut self,
        round_id: u64,
        outcome: Result<(), LedgerError>,
    ) -> Result<CashoutResult, MinesError> {
        let settlement = match self.settlement.as_mut() {
            Some(s) if s.round_id == round_id && s.in_flight_since.is_some() => s,
            _ => {
                return Err(MinesError::illegal(format!(
                    "no settlement in flight for round {}",
                    round_id
                )))
            }
        };

        let mut result = CashoutResult {
            round_id,
            win_amount: settlement.amount,
            multiplier: settlement.multiplier,
            balance: self.balance,
            settled: false,
            settlement_error: None,
        };

        match outcome {
            Ok(()) => {
                self.settlement = None;
                result.settled = true;
            }
            Err(e) => {
                settlement.attempts += 1;
                settlement.last_error = Some(e.to_string());
                settlement.in_flight_since = None;
                settlement.outcome_unknown = matches!(e, LedgerError::Timeout);
                result.settlement_error = Some(e.to_string());
            }
        }
        Ok(result)
    }

    /// Resolve an unknown send against the ledger's current balance.
    ///
    /// Returns the settled result when the credit is already there. Otherwise
    /// the win is marked safe to send again.
    pub fn reconcile_settlement(&mut self, ledger_balance: u64) -> Result<Option<CashoutResult>, MinesError> {
        let settlement = self
            .settlement
            .as_mut()
            .ok_or_else(|| MinesError::illegal("no unsettled win"))?;
        if settlement.in_flight_since.is_some() {
            return Err(MinesError::illegal("settlement already in flight"));
        }

        if ledger_balance < settlement.target_balance {
            settlement.outcome_unknown = false;
            return Ok(None);
        }

        let result = CashoutResult {
            round_id: settlement.round_id,
            win_amount: settlement.amount,
            multiplier: settlement.multiplier,
            balance: self.balance,
            settled: true,
            settlement_error: None,
        };
        self.settlement = None;
        Ok(Some(result))
    }

    pub fn begin_settlement_retry(&mut self, now: u64) -> Result<LedgerRequest, MinesError> {
        let balance = self.balance;
        let settlement = self
            .settlement
            .as_mut()
            .ok_or_else(|| MinesError::illegal("no unsettled win"))?;
        if settlement.in_flight_since.is_some() {
            return Err(MinesError::illegal("settlement already in flight"));
        }
        if settlement.outcome_unknown {
            return Err(MinesError::illegal("check the ledger before sending the win again"));
        }
        settlement.in_flight_since = Some(now);
        Ok(LedgerRequest {
            round_id: settlement.round_id,
            new_balance: balance,
            delta: i64::try_from(settlement.amount).unwrap_or(i64::MAX),
            memo: WIN_MEMO,
        })
    }

    /// Expire ledger calls that never came back.
    ///
    /// A start older than `timeout_ns` is rolled back. A credit older than it is
    /// released only when `credit_awaited` is false, and is then treated as an
    /// unknown outcome.
    pub fn recover_stale(&mut self, now: u64, timeout_ns: u64, credit_awaited: bool) -> StaleRecovery {
        let mut recovery = StaleRecovery::default();

        let start_expired = self
            .pending_start
            .as_ref()
            .is_some_and(|p| now.saturating_sub(p.requested_at) >= timeout_ns);
        if start_expired {
            if let Some(pending) = self.pending_start.take() {
                self.balance = pending.balance_before;
                self.round = None;
                self.state = GameState::Idle;
                recovery.refunded = Some(pending.round.bet_amount);
            }
        }

        if let Some(settlement) = self.settlement.as_mut() {
            let credit_expired = settlement
                .in_flight_since
                .is_some_and(|since| now.saturating_sub(since) >= timeout_ns);
            if credit_expired && !credit_awaited {
                settlement.in_flight_since = None;
                settlement.outcome_unknown = true;
                settlement.attempts += 1;
                settlement.last_error = Some("ledger call lost".to_string());
                recovery.released_settlement = true;
            }
        }

        recovery
    }

    // -------------------------------------------------------------------------
    // Round end
    // -------------------------------------------------------------------------

    /// Dismiss a finished round and return to Idle.
    pub fn acknowledge(&mut self) -> Result<(), MinesError> {
        self.ensure_not_pending()?;
        if !self.state.is_terminal() {
            return Err(MinesError::illegal(format!("nothing to acknowledge while {:?}", self.state)));
        }
        self.state = GameState::Idle;
        self.round = None;
        Ok(())
    }

    pub fn view(&self) -> SessionView {
        let round = self.round.as_ref();
        let current_multiplier = match (self.state, round) {
            (GameState::Lost, _) => 0.0,
            (_, Some(r)) => r.current_multiplier().unwrap_or(1.0),
            (_, None) => 1.0,
        };
        let current_payout = match (self.state, round) {
            (GameState::Playing | GameState::Won, Some(r)) => r
                .current_multiplier()
                .map(|m| multiplier::payout(r.bet_amount, m)),
            _ => None,
        };
        let mines = match (self.state.is_terminal(), round) {
            (true, Some(r)) => Some(r.mines.iter().copied().collect()),
            _ => None,
        };
        let config = round.map_or(&self.config, |r| &r.config);

        SessionView {
            game_state: self.state,
            pending: self.pending_start.is_some(),
            grid_size: config.grid_size,
            mine_count: config.mine_count,
            bet_amount: round.map(|r| r.bet_amount),
            revealed_tiles: round.map(|r| r.revealed.clone()).unwrap_or_default(),
            current_multiplier,
            current_payout,
            multipliers: round.map_or_else(|| self.multipliers.clone(), |r| r.multipliers.clone()),
            balance: self.balance,
            mines,
            exploded_tile: round.and_then(|r| r.exploded),
            unsettled_win: self.unsettled_win(),
        }
    }
}

impl Storable for MinesSession {
    fn to_bytes(&self) -> Cow<[u8]> {
        Cow::Owned(serde_json::to_vec(self).expect("MinesSession serialize to JSON"))
    }

    fn from_bytes(bytes: Cow<[u8]>) -> Self {
        serde_json::from_slice(&bytes).expect("MinesSession decode from stable memory")
    }

    const BOUND: Bound = Bound::Unbounded;
}
