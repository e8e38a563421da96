use candid::Principal;
use std::cell::RefCell;
use std::collections::BTreeSet;

thread_local! {
    // Heap only: an upgrade or a trapped callback leaves nothing behind
    static CREDITS_AWAITED: RefCell<BTreeSet<Principal>> = RefCell::new(BTreeSet::new());
}

/// Marks a player's win credit as awaiting the ledger's reply.
/// Uses RAII so the mark goes away when the call finishes or its future is dropped.
pub struct CreditGuard {
    player: Principal,
}

impl CreditGuard {
    pub fn hold(player: Principal) -> Self {
        CREDITS_AWAITED.with(|c| c.borrow_mut().insert(player));
        Self { player }
    }
}

impl Drop for CreditGuard {
    fn drop(&mut self) {
        CREDITS_AWAITED.with(|c| {
            c.borrow_mut().remove(&self.player);
        });
    }
}

/// A reply to this player's credit can still arrive.
pub fn credit_awaited(player: Principal) -> bool {
    CREDITS_AWAITED.with(|c| c.borrow().contains(&player))
}
