use candid::Principal;
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::{StableBTreeMap, StableCell};
use std::cell::RefCell;

use crate::config::{GameConfig, Settings};
use crate::error::MinesError;
use crate::guard::{self, CreditGuard};
use crate::ledger::{Ledger, LedgerClient};
use crate::memory_ids::{SESSIONS_MEMORY_ID, SETTINGS_MEMORY_ID, STATS_MEMORY_ID};
use crate::multiplier;
use crate::rng::RngProvider;
use crate::session::{LedgerRequest, MinesSession};
use crate::types::{
    CashoutResult, GameState, GameStats, RevealOutcome, RevealResult, SessionView, StartResult,
};
use crate::{log, Memory, MEMORY_MANAGER};

// =============================================================================
// CONSTANTS
// =============================================================================

const MAX_RETRIES_PER_SWEEP: usize = 50;
const REFUND_MEMO: &str = "Refund on Mines";

// =============================================================================
// STATE
// =============================================================================

thread_local! {
    static SESSIONS: RefCell<StableBTreeMap<Principal, MinesSession, Memory>> = RefCell::new(
        StableBTreeMap::init(
            MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(SESSIONS_MEMORY_ID))),
        )
    );

    static SETTINGS: RefCell<StableCell<Settings, Memory>> = RefCell::new(
        StableCell::init(
            MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(SETTINGS_MEMORY_ID))),
            Settings::default()
        ).expect("Failed to initialize SETTINGS")
    );

    static STATS: RefCell<StableCell<GameStats, Memory>> = RefCell::new(
        StableCell::init(
            MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(STATS_MEMORY_ID))),
            GameStats::default()
        ).expect("Failed to initialize STATS")
    );
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

pub fn settings() -> Settings {
    SETTINGS.with(|s| s.borrow().get().clone())
}

pub fn set_settings(settings: Settings) {
    SETTINGS.with(|s| {
        if let Err(e) = s.borrow_mut().set(settings) {
            log!("Failed to store settings: {:?}", e);
        }
    });
}

pub fn ledger() -> LedgerClient {
    LedgerClient::from_settings(settings().ledger)
}

fn load(player: Principal) -> Option<MinesSession> {
    SESSIONS.with(|s| s.borrow().get(&player))
}

fn load_existing(player: Principal) -> Result<MinesSession, MinesError> {
    load(player).ok_or_else(|| MinesError::illegal("no game session, start a game first"))
}

fn save(player: Principal, session: &MinesSession) {
    SESSIONS.with(|s| s.borrow_mut().insert(player, session.clone()));
}

fn update_stats(f: impl FnOnce(&mut GameStats)) {
    STATS.with(|stats| {
        let mut cell = stats.borrow_mut();
        let mut current = cell.get().clone();
        f(&mut current);
        if let Err(e) = cell.set(current) {
            log!("Failed to update stats: {:?}", e);
        }
    });
}

fn ledger_failure(e: crate::ledger::LedgerError) -> MinesError {
    MinesError::LedgerFailure(e.to_string())
}

pub fn ensure_authenticated(player: Principal) -> Result<(), MinesError> {
    if player == Principal::anonymous() {
        return Err(MinesError::AnonymousCaller);
    }
    Ok(())
}

/// Fetch the caller's session, creating it from the ledger balance on first use.
async fn load_or_create<L: Ledger>(ledger: &L, player: Principal) -> Result<MinesSession, MinesError> {
    if let Some(session) = load(player) {
        return Ok(session);
    }
    let balance = ledger.get_balance(player).await.map_err(ledger_failure)?;

    // Another call may have created it while we waited
    if let Some(session) = load(player) {
        return Ok(session);
    }
    let session = MinesSession::new(settings().default_config, balance)?;
    save(player, &session);
    Ok(session)
}

// =============================================================================
// GAME LOGIC
// =============================================================================

pub async fn configure<L: Ledger>(
    ledger: &L,
    player: Principal,
    config: GameConfig,
) -> Result<SessionView, MinesError> {
    ensure_authenticated(player)?;
    let mut session = load_or_create(ledger, player).await?;
    session.configure(config)?;
    save(player, &session);
    Ok(session.view())
}

pub async fn refresh_balance<L: Ledger>(ledger: &L, player: Principal) -> Result<u64, MinesError> {
    ensure_authenticated(player)?;
    load_or_create(ledger, player).await?;
    let balance = ledger.get_balance(player).await.map_err(ledger_failure)?;

    let mut session = load_existing(player)?;
    session.sync_balance(balance)?;
    save(player, &session);
    Ok(balance)
}

pub async fn start_game<L: Ledger, R: RngProvider>(
    ledger: &L,
    player: Principal,
    bet_amount: u64,
    mine_count: u8,
    rng: &mut R,
    now: u64,
) -> Result<StartResult, MinesError> {
    ensure_authenticated(player)?;
    let mut session = load_or_create(ledger, player).await?;

    // Mirror the authoritative balance before checking the bet against it
    if !session.is_pending()
        && session.unsettled_win().is_none()
        && session.state() != GameState::Playing
    {
        let balance = ledger.get_balance(player).await.map_err(ledger_failure)?;
        session = load_existing(player)?;
        session.sync_balance(balance)?;
    }

    let request = session.begin_start(bet_amount, mine_count, rng, now)?;
    save(player, &session);

    let outcome = ledger
        .update_balance(player, request.new_balance, request.delta, request.memo)
        .await;
    let debited = outcome.is_ok();

    let mut session = load_existing(player)?;
    if session.pending_round_id() != Some(request.round_id) {
        // The sweep expired this start while the ledger call was out
        if debited {
            log!("Round {} for {} expired after debit, refunding", request.round_id, player);
            refund_debit(ledger, player, &session, bet_amount).await;
            return Err(MinesError::LedgerFailure(
                "Bet refunded, the round expired before the ledger answered".to_string(),
            ));
        }
        return Err(MinesError::LedgerFailure(
            "Bet not placed, the round expired before the ledger answered".to_string(),
        ));
    }

    let result = session.complete_start(request.round_id, outcome);
    save(player, &session);

    match &result {
        Ok(started) => {
            update_stats(|s| {
                s.total_games += 1;
                s.total_wagered += bet_amount;
            });
            log!(
                "Round {} started for {}: bet {} with {} mines",
                started.round_id,
                player,
                bet_amount,
                started.mine_count
            );
        }
        Err(e) => {
            update_stats(|s| s.total_refunded += bet_amount);
            log!("Round {} for {} rolled back: {}", request.round_id, player, e);
        }
    }

    result
}

/// Return a debit that landed after its round expired. The mirror was already
/// restored (and counted) by the sweep, so only the ledger moves here.
async fn refund_debit<L: Ledger>(ledger: &L, player: Principal, session: &MinesSession, amount: u64) {
    let delta = i64::try_from(amount).unwrap_or(i64::MAX);
    if let Err(e) = ledger
        .update_balance(player, session.balance(), delta, REFUND_MEMO)
        .await
    {
        log!("CRITICAL: refund of {} to {} failed: {}", amount, player, e);
    }
}

pub async fn reveal_tile<L: Ledger>(
    ledger: &L,
    player: Principal,
    tile: u8,
    now: u64,
) -> Result<RevealResult, MinesError> {
    ensure_authenticated(player)?;
    let mut session = load_existing(player)?;
    let step = session.reveal(tile, now)?;
    save(player, &session);

    let mut result = step.result;
    match result.outcome {
        RevealOutcome::Mine => {
            update_stats(|s| s.total_busted += 1);
            log!("{} hit a mine on tile {}", player, tile);
        }
        RevealOutcome::AutoWin => {
            update_stats(|s| s.total_won += 1);
            log!("{} cleared the board", player);
        }
        RevealOutcome::Safe => {}
    }

    if let Some(request) = step.settlement {
        result.settlement = Some(settle(ledger, player, request).await?);
    }
    Ok(result)
}

pub async fn cash_out<L: Ledger>(
    ledger: &L,
    player: Principal,
    now: u64,
) -> Result<CashoutResult, MinesError> {
    ensure_authenticated(player)?;
    let mut session = load_existing(player)?;
    let request = session.cash_out(now)?;
    save(player, &session);

    update_stats(|s| s.total_won += 1);
    log!("{} cashed out {} in round {}", player, request.delta, request.round_id);

    settle(ledger, player, request).await
}

pub async fn retry_settlement<L: Ledger>(
    ledger: &L,
    player: Principal,
    now: u64,
) -> Result<CashoutResult, MinesError> {
    ensure_authenticated(player)?;
    let mut session = load_existing(player)?;

    // An earlier send may have landed: look before sending again
    if session.settlement_outcome_unknown() {
        let balance = ledger.get_balance(player).await.map_err(ledger_failure)?;
        session = load_existing(player)?;
        if let Some(result) = session.reconcile_settlement(balance)? {
            save(player, &session);
            update_stats(|s| s.total_paid_out += result.win_amount);
            log!("Win for {} round {} was already credited", player, result.round_id);
            return Ok(result);
        }
    }

    let request = session.begin_settlement_retry(now)?;
    save(player, &session);

    settle(ledger, player, request).await
}

/// Send a win credit and record the answer. Failure leaves the win queued.
async fn settle<L: Ledger>(
    ledger: &L,
    player: Principal,
    request: LedgerRequest,
) -> Result<CashoutResult, MinesError> {
    let _awaiting = CreditGuard::hold(player);
    let outcome = ledger
        .update_balance(player, request.new_balance, request.delta, request.memo)
        .await;
    if let Err(e) = &outcome {
        log!("Win settlement for {} round {} failed: {}", player, request.round_id, e);
    }

    let mut session = load_existing(player)?;
    let result = session.complete_settlement(request.round_id, outcome)?;
    save(player, &session);

    if result.settled {
        update_stats(|s| s.total_paid_out += result.win_amount);
    }
    Ok(result)
}

/// Expire stuck ledger calls, then retry queued wins. Returns wins settled.
pub async fn sweep_settlements<L: Ledger>(ledger: &L, now: u64) -> usize {
    let timeout_ns = settings().pending_timeout_ns;

    let players: Vec<Principal> = SESSIONS.with(|s| s.borrow().iter().map(|(k, _)| k).collect());
    for player in players {
        let Some(mut session) = load(player) else { continue };
        let recovery = session.recover_stale(now, timeout_ns, guard::credit_awaited(player));
        if recovery.refunded.is_some() || recovery.released_settlement {
            save(player, &session);
            if let Some(bet) = recovery.refunded {
                update_stats(|s| s.total_refunded += bet);
                log!("Expired pending start for {}, bet {} restored", player, bet);
            }
        }
    }

    let due: Vec<Principal> = SESSIONS.with(|s| {
        s.borrow()
            .iter()
            .filter(|(_, session)| session.needs_settlement_retry())
            .map(|(k, _)| k)
            .take(MAX_RETRIES_PER_SWEEP)
            .collect()
    });

    let mut settled = 0;
    for player in due {
        match retry_settlement(ledger, player, now).await {
            Ok(result) if result.settled => settled += 1,
            Ok(_) => {}
            Err(e) => log!("Settlement retry for {} skipped: {}", player, e),
        }
    }
    settled
}

pub fn acknowledge(player: Principal) -> Result<SessionView, MinesError> {
    ensure_authenticated(player)?;
    let mut session = load_existing(player)?;
    session.acknowledge()?;
    save(player, &session);
    Ok(session.view())
}

// =============================================================================
// QUERIES
// =============================================================================

pub fn get_state(player: Principal) -> Option<SessionView> {
    load(player).map(|s| s.view())
}

pub fn get_stats() -> GameStats {
    STATS.with(|s| s.borrow().get().clone())
}

pub fn preview_multipliers(grid_size: u8, mine_count: u8, house_edge: f64) -> Result<Vec<f64>, MinesError> {
    multiplier::generate(grid_size, mine_count, house_edge)
}
