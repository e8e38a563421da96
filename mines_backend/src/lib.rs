// ============================================================
// ⚠️ DEMO MODE WHEN NO LEDGER IS CONFIGURED ⚠️
// ============================================================
// Without a ledger canister in the init args, balances are kept
// inside this canister and are NOT real funds.
// ============================================================

use ic_cdk::api::management_canister::main::raw_rand;
use ic_cdk::{init, post_upgrade, pre_upgrade, query, update};
use ic_stable_structures::memory_manager::{MemoryManager, VirtualMemory};
use ic_stable_structures::DefaultMemoryImpl;
use std::cell::RefCell;
use std::time::Duration;

// =============================================================================
// LOGGING
// =============================================================================

/// Canister log line. Falls back to stderr off-chain so host tests can run.
#[macro_export]
macro_rules! log {
    ($($arg:tt)*) => {{
        #[cfg(target_arch = "wasm32")]
        ic_cdk::println!($($arg)*);
        #[cfg(not(target_arch = "wasm32"))]
        eprintln!($($arg)*);
    }};
}

// =============================================================================
// MODULE DECLARATIONS
// =============================================================================

pub mod board;
pub mod config;
pub mod error;
pub mod game;
pub mod guard;
pub mod ledger;
pub mod memory_ids;
pub mod multiplier;
pub mod rng;
pub mod session;
pub mod types;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use config::{GameConfig, InitArgs, Settings};
pub use error::MinesError;
pub use ledger::{Ledger, LedgerError};
pub use rng::{HashChainRng, RngProvider};
pub use session::MinesSession;
pub use types::{
    CashoutResult, GameState, GameStats, RevealOutcome, RevealResult, SessionView, StartResult,
    UnsettledWin,
};

// =============================================================================
// MEMORY MANAGEMENT
// =============================================================================

type Memory = VirtualMemory<DefaultMemoryImpl>;

thread_local! {
    static MEMORY_MANAGER: RefCell<MemoryManager<DefaultMemoryImpl>> =
        RefCell::new(MemoryManager::init(DefaultMemoryImpl::default()));

    static RETRY_TIMER_ID: RefCell<Option<ic_cdk_timers::TimerId>> = const { RefCell::new(None) };
    static SWEEPING: RefCell<bool> = const { RefCell::new(false) };
}

// =============================================================================
// SETTLEMENT RETRY TIMER
// =============================================================================

const RETRY_INTERVAL: Duration = Duration::from_secs(300);

fn start_retry_timer() {
    RETRY_TIMER_ID.with(|id| {
        if id.borrow().is_some() {
            return;
        }
        let timer_id = ic_cdk_timers::set_timer_interval(RETRY_INTERVAL, || {
            ic_cdk::spawn(async {
                sweep().await;
            });
        });
        *id.borrow_mut() = Some(timer_id);
    });
}

async fn sweep() {
    if SWEEPING.with(|s| *s.borrow()) {
        return;
    }
    SWEEPING.with(|s| *s.borrow_mut() = true);

    let settled = game::sweep_settlements(&game::ledger(), ic_cdk::api::time()).await;
    if settled > 0 {
        log!("Settlement sweep credited {} wins", settled);
    }

    SWEEPING.with(|s| *s.borrow_mut() = false);
}

// =============================================================================
// LIFECYCLE HOOKS
// =============================================================================

#[init]
fn init(args: Option<InitArgs>) {
    let settings = match Settings::from_init(args.unwrap_or_default()) {
        Ok(settings) => settings,
        Err(e) => ic_cdk::trap(&format!("Invalid init args: {}", e)),
    };

    if settings.is_demo() {
        log!("================================================");
        log!("⚠️  MINES GAME BACKEND - DEMO MODE  ⚠️");
        log!("Balances are simulated, no ledger configured");
        log!("================================================");
    } else {
        log!("Mines Game Backend Initialized with ledger {:?}", settings.ledger);
    }

    game::set_settings(settings);
    start_retry_timer();
}

#[pre_upgrade]
fn pre_upgrade() {
    // Sessions, settings and stats live in stable structures already
}

#[post_upgrade]
fn post_upgrade() {
    // Timers do not survive an upgrade
    start_retry_timer();
}

// =============================================================================
// API ENDPOINTS
// =============================================================================

#[update]
async fn configure(config: GameConfig) -> Result<SessionView, MinesError> {
    game::configure(&game::ledger(), ic_cdk::caller(), config).await
}

#[update]
async fn start_game(bet_amount: u64, mine_count: u8) -> Result<StartResult, MinesError> {
    let player = ic_cdk::caller();
    game::ensure_authenticated(player)?;
    let (random_bytes,) = raw_rand()
        .await
        .map_err(|(code, msg)| MinesError::RandomnessUnavailable(format!("{:?}: {}", code, msg)))?;
    let mut rng = HashChainRng::from_vrf(&random_bytes)?;

    game::start_game(
        &game::ledger(),
        player,
        bet_amount,
        mine_count,
        &mut rng,
        ic_cdk::api::time(),
    )
    .await
}

#[update]
async fn reveal_tile(tile: u8) -> Result<RevealResult, MinesError> {
    game::reveal_tile(&game::ledger(), ic_cdk::caller(), tile, ic_cdk::api::time()).await
}

#[update]
async fn cash_out() -> Result<CashoutResult, MinesError> {
    game::cash_out(&game::ledger(), ic_cdk::caller(), ic_cdk::api::time()).await
}

#[update]
async fn retry_settlement() -> Result<CashoutResult, MinesError> {
    game::retry_settlement(&game::ledger(), ic_cdk::caller(), ic_cdk::api::time()).await
}

#[update]
async fn refresh_balance() -> Result<u64, MinesError> {
    game::refresh_balance(&game::ledger(), ic_cdk::caller()).await
}

#[update]
fn acknowledge() -> Result<SessionView, MinesError> {
    game::acknowledge(ic_cdk::caller())
}

#[query]
fn get_state() -> Option<SessionView> {
    game::get_state(ic_cdk::caller())
}

#[query]
fn get_multipliers(grid_size: u8, mine_count: u8, house_edge: f64) -> Result<Vec<f64>, MinesError> {
    game::preview_multipliers(grid_size, mine_count, house_edge)
}

#[query]
fn get_stats() -> GameStats {
    game::get_stats()
}

#[query]
fn get_settings() -> Settings {
    game::settings()
}

#[query]
fn greet(name: String) -> String {
    format!("Welcome to OpenHouse Mines, {}!", name)
}

ic_cdk::export_candid!();
