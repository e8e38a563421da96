use async_trait::async_trait;
use candid::Principal;
use ic_cdk::api::call::RejectionCode;
use ic_stable_structures::memory_manager::MemoryId;
use ic_stable_structures::StableBTreeMap;
use std::cell::RefCell;
use thiserror::Error;

use crate::memory_ids::DEMO_BALANCES_MEMORY_ID;
use crate::types::DEMO_INITIAL_BALANCE;
use crate::{Memory, MEMORY_MANAGER};

// =============================================================================
// LEDGER INTERFACE
// =============================================================================

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger answered and refused the update.
    #[error("ledger rejected update: {0}")]
    Rejected(String),
    /// No definite answer arrived in time.
    #[error("ledger call timed out")]
    Timeout,
    /// The call never reached the ledger.
    #[error("ledger call failed: {0}")]
    CallFailed(String),
}

/// External balance store.
///
/// Calls are awaited by the engine; an `Err` always means the update did not
/// take effect from the engine's point of view.
#[async_trait(?Send)]
pub trait Ledger {
    async fn get_balance(&self, player: Principal) -> Result<u64, LedgerError>;

    async fn update_balance(
        &self,
        player: Principal,
        new_balance: u64,
        delta: i64,
        memo: &str,
    ) -> Result<(), LedgerError>;
}

// =============================================================================
// CANISTER LEDGER
// =============================================================================

/// Balance ledger living in another canister.
///
/// Expected interface:
/// `get_balance : (principal) -> (nat64)` and
/// `update_balance : (principal, nat64, int64, text) -> (variant { Ok; Err : text })`.
pub struct CanisterLedger {
    canister_id: Principal,
}

impl CanisterLedger {
    pub fn new(canister_id: Principal) -> Self {
        Self { canister_id }
    }
}

fn map_rejection(code: RejectionCode, msg: String) -> LedgerError {
    match code {
        // Outcome unknown (includes the request expiring in the system)
        RejectionCode::SysTransient | RejectionCode::Unknown => LedgerError::Timeout,
        _ => LedgerError::CallFailed(format!("{:?}: {}", code, msg)),
    }
}

#[async_trait(?Send)]
impl Ledger for CanisterLedger {
    async fn get_balance(&self, player: Principal) -> Result<u64, LedgerError> {
        let (balance,): (u64,) = ic_cdk::call(self.canister_id, "get_balance", (player,))
            .await
            .map_err(|(code, msg)| map_rejection(code, msg))?;
        Ok(balance)
    }

    async fn update_balance(
        &self,
        player: Principal,
        new_balance: u64,
        delta: i64,
        memo: &str,
    ) -> Result<(), LedgerError> {
        let (result,): (Result<(), String>,) = ic_cdk::call(
            self.canister_id,
            "update_balance",
            (player, new_balance, delta, memo.to_string()),
        )
        .await
        .map_err(|(code, msg)| map_rejection(code, msg))?;

        result.map_err(LedgerError::Rejected)
    }
}

// =============================================================================
// DEMO LEDGER
// =============================================================================
// ⚠️ DEMO MODE: balances live inside this canister and are NOT real funds.

thread_local! {
    static DEMO_BALANCES: RefCell<StableBTreeMap<Principal, u64, Memory>> = RefCell::new(
        StableBTreeMap::init(
            MEMORY_MANAGER.with(|m| m.borrow().get(MemoryId::new(DEMO_BALANCES_MEMORY_ID))),
        )
    );
}

/// In-canister stand-in used when no external ledger is configured.
pub struct DemoLedger;

impl DemoLedger {
    fn balance_of(player: Principal) -> u64 {
        DEMO_BALANCES.with(|b| b.borrow().get(&player).unwrap_or(DEMO_INITIAL_BALANCE))
    }
}

#[async_trait(?Send)]
impl Ledger for DemoLedger {
    async fn get_balance(&self, player: Principal) -> Result<u64, LedgerError> {
        Ok(Self::balance_of(player))
    }

    async fn update_balance(
        &self,
        player: Principal,
        new_balance: u64,
        delta: i64,
        memo: &str,
    ) -> Result<(), LedgerError> {
        let current = Self::balance_of(player);
        let applied = current as i128 + delta as i128;
        if applied < 0 {
            return Err(LedgerError::Rejected(format!(
                "insufficient demo funds: {} + {}",
                current, delta
            )));
        }
        let applied = u64::try_from(applied)
            .map_err(|_| LedgerError::Rejected("demo balance overflow".to_string()))?;

        // The delta is authoritative; the caller's view may lag
        if applied != new_balance {
            crate::log!(
                "⚠️ DEMO MODE: mirror drift for {}: expected {}, ledger {}",
                player,
                new_balance,
                applied
            );
        }

        DEMO_BALANCES.with(|b| b.borrow_mut().insert(player, applied));
        crate::log!("⚠️ DEMO MODE: {} {} for {} ({})", memo, delta, player, applied);
        Ok(())
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

pub enum LedgerClient {
    Canister(CanisterLedger),
    Demo(DemoLedger),
}

impl LedgerClient {
    pub fn from_settings(ledger: Option<Principal>) -> Self {
        match ledger {
            Some(id) => LedgerClient::Canister(CanisterLedger::new(id)),
            None => LedgerClient::Demo(DemoLedger),
        }
    }
}

#[async_trait(?Send)]
impl Ledger for LedgerClient {
    async fn get_balance(&self, player: Principal) -> Result<u64, LedgerError> {
        match self {
            LedgerClient::Canister(l) => l.get_balance(player).await,
            LedgerClient::Demo(l) => l.get_balance(player).await,
        }
    }

    async fn update_balance(
        &self,
        player: Principal,
        new_balance: u64,
        delta: i64,
        memo: &str,
    ) -> Result<(), LedgerError> {
        match self {
            LedgerClient::Canister(l) => l.update_balance(player, new_balance, delta, memo).await,
            LedgerClient::Demo(l) => l.update_balance(player, new_balance, delta, memo).await,
        }
    }
}
