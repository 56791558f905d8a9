//! Deliberately broken ledgers.
//!
//! Each double wraps the reference [`MemoryLedger`] and changes exactly one
//! thing, so a campaign against it demonstrates which policy and which sweep
//! catches that class of defect. Everything not named in the double's doc
//! behaves exactly like the reference ledger.

use ledger_abi::{
    AccountId, Amount, DualLedger, LedgerError, Result, ShadowHandle, TokenId,
};

use crate::MemoryLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    NoDebit,
    SupplyDrift,
    ShadowShortfall,
    OverwriteRegistration,
    StickyAllowance,
    TruncateBatch,
}

#[derive(Debug, Clone)]
struct Faulty {
    fault: Fault,
    inner: MemoryLedger,
}

impl Faulty {
    fn new(fault: Fault) -> Self {
        Self {
            fault,
            inner: MemoryLedger::new(),
        }
    }
}

fn flipped(handle: ShadowHandle) -> ShadowHandle {
    let mut bytes = *handle.as_bytes();
    for b in &mut bytes {
        *b ^= 0xff;
    }
    ShadowHandle(bytes)
}

impl DualLedger for Faulty {
    fn transfer(
        &mut self,
        caller: AccountId,
        from: AccountId,
        to: AccountId,
        id: TokenId,
        amount: Amount,
        extra: &[u8],
    ) -> Result<()> {
        match self.fault {
            Fault::NoDebit => {
                self.inner.transfer(caller, from, to, id, amount, extra)?;
                // Hand the debited amount straight back.
                self.inner.credit_raw(from, id, amount);
                Ok(())
            }
            Fault::SupplyDrift => {
                self.inner.transfer(caller, from, to, id, amount, extra)?;
                self.inner.supply_add_raw(id, 1);
                Ok(())
            }
            Fault::StickyAllowance => {
                let before = self.inner.allowance(from, caller, id);
                self.inner.transfer(caller, from, to, id, amount, extra)?;
                self.inner.set_allowance(from, caller, id, before)?;
                Ok(())
            }
            _ => self.inner.transfer(caller, from, to, id, amount, extra),
        }
    }

    fn batch_transfer(
        &mut self,
        caller: AccountId,
        from: AccountId,
        to: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
        extra: &[u8],
    ) -> Result<()> {
        match self.fault {
            Fault::TruncateBatch if ids.len() != amounts.len() => {
                let n = ids.len().min(amounts.len());
                self.inner
                    .batch_transfer(caller, from, to, &ids[..n], &amounts[..n], extra)
            }
            _ => self.inner.batch_transfer(caller, from, to, ids, amounts, extra),
        }
    }

    fn set_blanket_approval(
        &mut self,
        caller: AccountId,
        operator: AccountId,
        approved: bool,
    ) -> Result<()> {
        self.inner.set_blanket_approval(caller, operator, approved)
    }

    fn set_allowance(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        id: TokenId,
        amount: Amount,
    ) -> Result<()> {
        self.inner.set_allowance(caller, spender, id, amount)
    }

    fn increase_allowance(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        id: TokenId,
        delta: Amount,
    ) -> Result<()> {
        self.inner.increase_allowance(caller, spender, id, delta)
    }

    fn decrease_allowance(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        id: TokenId,
        delta: Amount,
    ) -> Result<()> {
        self.inner.decrease_allowance(caller, spender, id, delta)
    }

    fn set_allowance_batch(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) -> Result<()> {
        self.inner.set_allowance_batch(caller, spender, ids, amounts)
    }

    fn increase_allowance_batch(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        ids: &[TokenId],
        deltas: &[Amount],
    ) -> Result<()> {
        self.inner.increase_allowance_batch(caller, spender, ids, deltas)
    }

    fn decrease_allowance_batch(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        ids: &[TokenId],
        deltas: &[Amount],
    ) -> Result<()> {
        self.inner.decrease_allowance_batch(caller, spender, ids, deltas)
    }

    fn register_shadow_token(&mut self, caller: AccountId, id: TokenId) -> Result<ShadowHandle> {
        match (self.fault, self.inner.shadow_token_of(id)) {
            (Fault::OverwriteRegistration, Some(current)) => {
                if self.inner.total_supply(id) == 0 {
                    return Err(LedgerError::ZeroSupply { id });
                }
                // The forgotten duplicate check: a fresh handle replaces the
                // fixed one and orphans every shadow balance under it.
                let next = flipped(current);
                self.inner.install_shadow_raw(id, next);
                Ok(next)
            }
            _ => self.inner.register_shadow_token(caller, id),
        }
    }

    fn transmute_to_shadow(
        &mut self,
        caller: AccountId,
        owner: AccountId,
        id: TokenId,
        amount: Amount,
    ) -> Result<()> {
        match self.fault {
            Fault::ShadowShortfall => {
                self.inner.transmute_to_shadow(caller, owner, id, amount)?;
                if amount > 0 {
                    if let Some(handle) = self.inner.shadow_token_of(id) {
                        self.inner.shadow_sub_raw(handle, owner, 1);
                    }
                }
                Ok(())
            }
            _ => self.inner.transmute_to_shadow(caller, owner, id, amount),
        }
    }

    fn transmute_from_shadow(
        &mut self,
        caller: AccountId,
        id: TokenId,
        amount: Amount,
    ) -> Result<()> {
        self.inner.transmute_from_shadow(caller, id, amount)
    }

    fn batch_transmute_to_shadow(
        &mut self,
        caller: AccountId,
        owner: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) -> Result<()> {
        self.inner.batch_transmute_to_shadow(caller, owner, ids, amounts)
    }

    fn batch_transmute_from_shadow(
        &mut self,
        caller: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) -> Result<()> {
        self.inner.batch_transmute_from_shadow(caller, ids, amounts)
    }

    fn mint(
        &mut self,
        account: AccountId,
        id: TokenId,
        amount: Amount,
        extra: &[u8],
    ) -> Result<()> {
        self.inner.mint(account, id, amount, extra)
    }

    fn balance_of(&self, account: AccountId, id: TokenId) -> Amount {
        self.inner.balance_of(account, id)
    }

    fn total_supply(&self, id: TokenId) -> Amount {
        self.inner.total_supply(id)
    }

    fn allowance(&self, owner: AccountId, spender: AccountId, id: TokenId) -> Amount {
        self.inner.allowance(owner, spender, id)
    }

    fn is_blanket_approved(&self, owner: AccountId, spender: AccountId) -> bool {
        self.inner.is_blanket_approved(owner, spender)
    }

    fn shadow_token_of(&self, id: TokenId) -> Option<ShadowHandle> {
        self.inner.shadow_token_of(id)
    }

    fn shadow_balance_of(&self, handle: ShadowHandle, account: AccountId) -> Amount {
        self.inner.shadow_balance_of(handle, account)
    }
}

macro_rules! fault_double {
    ($(#[$doc:meta])* $name:ident, $fault:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name(Faulty);

        impl $name {
            pub fn new() -> Self {
                Self(Faulty::new(Fault::$fault))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl DualLedger for $name {
            fn transfer(
                &mut self,
                caller: AccountId,
                from: AccountId,
                to: AccountId,
                id: TokenId,
                amount: Amount,
                extra: &[u8],
            ) -> Result<()> {
                self.0.transfer(caller, from, to, id, amount, extra)
            }

            fn batch_transfer(
                &mut self,
                caller: AccountId,
                from: AccountId,
                to: AccountId,
                ids: &[TokenId],
                amounts: &[Amount],
                extra: &[u8],
            ) -> Result<()> {
                self.0.batch_transfer(caller, from, to, ids, amounts, extra)
            }

            fn set_blanket_approval(
                &mut self,
                caller: AccountId,
                operator: AccountId,
                approved: bool,
            ) -> Result<()> {
                self.0.set_blanket_approval(caller, operator, approved)
            }

            fn set_allowance(
                &mut self,
                caller: AccountId,
                spender: AccountId,
                id: TokenId,
                amount: Amount,
            ) -> Result<()> {
                self.0.set_allowance(caller, spender, id, amount)
            }

            fn increase_allowance(
                &mut self,
                caller: AccountId,
                spender: AccountId,
                id: TokenId,
                delta: Amount,
            ) -> Result<()> {
                self.0.increase_allowance(caller, spender, id, delta)
            }

            fn decrease_allowance(
                &mut self,
                caller: AccountId,
                spender: AccountId,
                id: TokenId,
                delta: Amount,
            ) -> Result<()> {
                self.0.decrease_allowance(caller, spender, id, delta)
            }

            fn set_allowance_batch(
                &mut self,
                caller: AccountId,
                spender: AccountId,
                ids: &[TokenId],
                amounts: &[Amount],
            ) -> Result<()> {
                self.0.set_allowance_batch(caller, spender, ids, amounts)
            }

            fn increase_allowance_batch(
                &mut self,
                caller: AccountId,
                spender: AccountId,
                ids: &[TokenId],
                deltas: &[Amount],
            ) -> Result<()> {
                self.0.increase_allowance_batch(caller, spender, ids, deltas)
            }

            fn decrease_allowance_batch(
                &mut self,
                caller: AccountId,
                spender: AccountId,
                ids: &[TokenId],
                deltas: &[Amount],
            ) -> Result<()> {
                self.0.decrease_allowance_batch(caller, spender, ids, deltas)
            }

            fn register_shadow_token(
                &mut self,
                caller: AccountId,
                id: TokenId,
            ) -> Result<ShadowHandle> {
                self.0.register_shadow_token(caller, id)
            }

            fn transmute_to_shadow(
                &mut self,
                caller: AccountId,
                owner: AccountId,
                id: TokenId,
                amount: Amount,
            ) -> Result<()> {
                self.0.transmute_to_shadow(caller, owner, id, amount)
            }

            fn transmute_from_shadow(
                &mut self,
                caller: AccountId,
                id: TokenId,
                amount: Amount,
            ) -> Result<()> {
                self.0.transmute_from_shadow(caller, id, amount)
            }

            fn batch_transmute_to_shadow(
                &mut self,
                caller: AccountId,
                owner: AccountId,
                ids: &[TokenId],
                amounts: &[Amount],
            ) -> Result<()> {
                self.0.batch_transmute_to_shadow(caller, owner, ids, amounts)
            }

            fn batch_transmute_from_shadow(
                &mut self,
                caller: AccountId,
                ids: &[TokenId],
                amounts: &[Amount],
            ) -> Result<()> {
                self.0.batch_transmute_from_shadow(caller, ids, amounts)
            }

            fn mint(
                &mut self,
                account: AccountId,
                id: TokenId,
                amount: Amount,
                extra: &[u8],
            ) -> Result<()> {
                self.0.mint(account, id, amount, extra)
            }

            fn balance_of(&self, account: AccountId, id: TokenId) -> Amount {
                self.0.balance_of(account, id)
            }

            fn total_supply(&self, id: TokenId) -> Amount {
                self.0.total_supply(id)
            }

            fn allowance(&self, owner: AccountId, spender: AccountId, id: TokenId) -> Amount {
                self.0.allowance(owner, spender, id)
            }

            fn is_blanket_approved(&self, owner: AccountId, spender: AccountId) -> bool {
                self.0.is_blanket_approved(owner, spender)
            }

            fn shadow_token_of(&self, id: TokenId) -> Option<ShadowHandle> {
                self.0.shadow_token_of(id)
            }

            fn shadow_balance_of(&self, handle: ShadowHandle, account: AccountId) -> Amount {
                self.0.shadow_balance_of(handle, account)
            }
        }
    };
}

fault_double!(
    /// Forgets the debit half of a transfer: the receiver is credited, the
    /// sender keeps the funds. Every check still runs.
    NoDebitLedger,
    NoDebit
);

fault_double!(
    /// Leaks one unit of recorded supply per successful transfer. Balances
    /// stay correct; only the supply counter drifts.
    SupplyDriftLedger,
    SupplyDrift
);

fault_double!(
    /// Credits one unit less shadow balance than a transmutation debited.
    /// Zero-amount transmutations are unaffected.
    ShadowShortfallLedger,
    ShadowShortfall
);

fault_double!(
    /// Forgets the duplicate-registration check: registering an id again
    /// installs a fresh handle, orphaning the shadow balances under the old
    /// one. The zero-supply check still holds.
    OverwritingRegistrar,
    OverwriteRegistration
);

fault_double!(
    /// Checks the allowance on the allowance path but never consumes it, so
    /// a spender can reuse the same grant forever.
    StickyAllowanceLedger,
    StickyAllowance
);

fault_double!(
    /// Accepts parallel arrays of unequal length and silently applies the
    /// common prefix. Well-formed batches behave normally.
    TruncatingBatchLedger,
    TruncateBatch
);

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(tag: u8) -> AccountId {
        AccountId([tag; 32])
    }

    fn token(tag: u8) -> TokenId {
        TokenId([tag; 32])
    }

    #[test]
    fn no_debit_keeps_the_sender_whole() {
        let mut sut = NoDebitLedger::new();
        let (a, b, t) = (acct(1), acct(2), token(3));
        sut.mint(a, t, 1_000, &[]).unwrap();
        sut.transfer(a, a, b, t, 300, &[]).unwrap();
        assert_eq!(sut.balance_of(a, t), 1_000);
        assert_eq!(sut.balance_of(b, t), 300);
        // The checks still run.
        assert!(sut.transfer(a, a, b, t, 1_001, &[]).is_err());
    }

    #[test]
    fn supply_drift_leaks_a_unit_per_transfer() {
        let mut sut = SupplyDriftLedger::new();
        let (a, b, t) = (acct(1), acct(2), token(3));
        sut.mint(a, t, 1_000, &[]).unwrap();
        sut.transfer(a, a, b, t, 100, &[]).unwrap();
        assert_eq!(sut.total_supply(t), 1_001);
        // A refused transfer leaks nothing.
        assert!(sut.transfer(a, a, b, t, 10_000, &[]).is_err());
        assert_eq!(sut.total_supply(t), 1_001);
    }

    #[test]
    fn shadow_shortfall_credits_one_short() {
        let mut sut = ShadowShortfallLedger::new();
        let (a, t) = (acct(1), token(3));
        sut.mint(a, t, 1_000, &[]).unwrap();
        let handle = sut.register_shadow_token(a, t).unwrap();
        sut.transmute_to_shadow(a, a, t, 400).unwrap();
        assert_eq!(sut.balance_of(a, t), 600);
        assert_eq!(sut.total_supply(t), 600);
        assert_eq!(sut.shadow_balance_of(handle, a), 399);
        // Zero transmutations do not drift.
        sut.transmute_to_shadow(a, a, t, 0).unwrap();
        assert_eq!(sut.shadow_balance_of(handle, a), 399);
    }

    #[test]
    fn overwriting_registrar_rotates_the_handle() {
        let mut sut = OverwritingRegistrar::new();
        let (a, t) = (acct(1), token(3));
        sut.mint(a, t, 1_000, &[]).unwrap();
        let first = sut.register_shadow_token(a, t).unwrap();
        let second = sut.register_shadow_token(a, t).unwrap();
        assert_ne!(first, second);
        assert_eq!(sut.shadow_token_of(t), Some(second));
    }

    #[test]
    fn sticky_allowance_checks_but_never_spends() {
        let mut sut = StickyAllowanceLedger::new();
        let (a, b, t) = (acct(1), acct(2), token(3));
        sut.mint(a, t, 1_000, &[]).unwrap();
        sut.set_allowance(a, b, t, 300).unwrap();
        sut.transfer(b, a, b, t, 200, &[]).unwrap();
        assert_eq!(sut.allowance(a, b, t), 300);
        assert!(matches!(
            sut.transfer(b, a, b, t, 400, &[]),
            Err(LedgerError::InsufficientAllowance { .. })
        ));
    }

    #[test]
    fn truncating_batch_applies_the_common_prefix() {
        let mut sut = TruncatingBatchLedger::new();
        let (a, b) = (acct(1), acct(2));
        let (t1, t2) = (token(3), token(4));
        sut.mint(a, t1, 1_000, &[]).unwrap();
        sut.batch_transfer(a, a, b, &[t1, t2], &[50], &[]).unwrap();
        assert_eq!(sut.balance_of(b, t1), 50);
        assert_eq!(sut.balance_of(b, t2), 0);
        // Equal lengths take the honest path.
        assert!(sut.batch_transfer(a, a, b, &[t2], &[1], &[]).is_err());
    }
}
