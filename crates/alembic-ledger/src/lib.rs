//! Ledger implementations the engine can drive.
//!
//! [`MemoryLedger`] is the reference implementation: a plain in-memory dual
//! ledger that honors every rule the `DualLedger` contract states, with
//! checked arithmetic and atomic batches. Campaigns against it are expected
//! to come up green under the sound policies.
//!
//! The [`faults`] module wraps it in deliberately broken variants, one defect
//! each, for demonstrating what the harness catches and where each policy is
//! blind.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use ledger_abi::{
    AccountId, Amount, DualLedger, LedgerError, Result, ShadowHandle, TokenId, MAX_MINT_AMOUNT,
};

pub mod faults;

type AllowanceKey = (AccountId, AccountId, TokenId);

/// Reference in-memory dual ledger.
///
/// Authorization for transfer-shaped operations resolves owner first, then
/// blanket approval, then the single-id allowance; only the allowance path
/// consumes anything. Within one operation the funds check comes before the
/// allowance check. Batches check array lengths up front and apply on a
/// scratch copy, so a failing element leaves no partial state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryLedger {
    balances: BTreeMap<(AccountId, TokenId), Amount>,
    supplies: BTreeMap<TokenId, Amount>,
    allowances: BTreeMap<AllowanceKey, Amount>,
    blanket: BTreeSet<(AccountId, AccountId)>,
    shadows: BTreeMap<TokenId, ShadowHandle>,
    shadow_balances: BTreeMap<(ShadowHandle, AccountId), Amount>,
}

/// Handles are derived from the id, not random, so a rebuilt ledger assigns
/// the same handle to the same id. The per-byte mix is bijective: distinct
/// ids always get distinct handles.
fn derive_handle(id: &TokenId) -> ShadowHandle {
    let mut bytes = *id.as_bytes();
    for b in &mut bytes {
        *b = b.rotate_left(5) ^ 0xa5;
    }
    ShadowHandle(bytes)
}

fn check_lengths(ids: &[TokenId], amounts: &[Amount]) -> Result<()> {
    if ids.len() == amounts.len() {
        Ok(())
    } else {
        Err(LedgerError::LengthMismatch {
            ids: ids.len(),
            amounts: amounts.len(),
        })
    }
}

/// Zero-valued entries are dropped rather than stored, so two ledgers in the
/// same observable state compare equal.
fn store<K: Ord>(map: &mut BTreeMap<K, Amount>, key: K, value: Amount) {
    if value == 0 {
        map.remove(&key);
    } else {
        map.insert(key, value);
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve authorization for `caller` moving `owner`'s balance of `id`.
    /// On the allowance path the return carries the entry to write back once
    /// the operation commits; the owner and blanket paths consume nothing.
    fn authorize(
        &self,
        caller: AccountId,
        owner: AccountId,
        id: TokenId,
        amount: Amount,
    ) -> Result<Option<(AllowanceKey, Amount)>> {
        if caller == owner || self.blanket.contains(&(owner, caller)) {
            return Ok(None);
        }
        let have = self.allowance(owner, caller, id);
        let left = have
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientAllowance {
                owner,
                spender: caller,
                id,
                have,
                need: amount,
            })?;
        Ok(Some(((owner, caller, id), left)))
    }

    fn transfer_one(
        &mut self,
        caller: AccountId,
        from: AccountId,
        to: AccountId,
        id: TokenId,
        amount: Amount,
    ) -> Result<()> {
        let have = self.balance_of(from, id);
        let debited = have
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance {
                account: from,
                id,
                have,
                need: amount,
            })?;
        let spend = self.authorize(caller, from, id, amount)?;

        // A self-transfer nets to zero once the funds check has passed.
        if from != to {
            let credited = self
                .balance_of(to, id)
                .checked_add(amount)
                .ok_or(LedgerError::Overflow)?;
            store(&mut self.balances, (from, id), debited);
            store(&mut self.balances, (to, id), credited);
        }
        if let Some((key, left)) = spend {
            store(&mut self.allowances, key, left);
        }
        Ok(())
    }

    fn transmute_to_one(
        &mut self,
        caller: AccountId,
        owner: AccountId,
        id: TokenId,
        amount: Amount,
    ) -> Result<()> {
        let handle = self
            .shadow_token_of(id)
            .ok_or(LedgerError::NotRegistered { id })?;
        let have = self.balance_of(owner, id);
        let debited = have
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance {
                account: owner,
                id,
                have,
                need: amount,
            })?;
        let spend = self.authorize(caller, owner, id, amount)?;
        let shadow = self
            .shadow_balance_of(handle, owner)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let supply = self
            .total_supply(id)
            .checked_sub(amount)
            .ok_or(LedgerError::Overflow)?;

        store(&mut self.balances, (owner, id), debited);
        store(&mut self.supplies, id, supply);
        store(&mut self.shadow_balances, (handle, owner), shadow);
        if let Some((key, left)) = spend {
            store(&mut self.allowances, key, left);
        }
        Ok(())
    }

    fn transmute_from_one(&mut self, caller: AccountId, id: TokenId, amount: Amount) -> Result<()> {
        let handle = self
            .shadow_token_of(id)
            .ok_or(LedgerError::NotRegistered { id })?;
        let have = self.shadow_balance_of(handle, caller);
        let shadow_left = have
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientShadowBalance {
                account: caller,
                id,
                have,
                need: amount,
            })?;
        let credited = self
            .balance_of(caller, id)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let supply = self
            .total_supply(id)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;

        store(&mut self.shadow_balances, (handle, caller), shadow_left);
        store(&mut self.balances, (caller, id), credited);
        store(&mut self.supplies, id, supply);
        Ok(())
    }
}

// Raw state hooks for the fault doubles. They skip every check on purpose
// and stay inside this crate.
impl MemoryLedger {
    pub(crate) fn credit_raw(&mut self, account: AccountId, id: TokenId, amount: Amount) {
        let entry = self.balances.entry((account, id)).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub(crate) fn supply_add_raw(&mut self, id: TokenId, amount: Amount) {
        let entry = self.supplies.entry(id).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    pub(crate) fn shadow_sub_raw(&mut self, handle: ShadowHandle, account: AccountId, amount: Amount) {
        let entry = self.shadow_balances.entry((handle, account)).or_insert(0);
        *entry = entry.saturating_sub(amount);
    }

    pub(crate) fn install_shadow_raw(&mut self, id: TokenId, handle: ShadowHandle) {
        self.shadows.insert(id, handle);
    }
}

impl DualLedger for MemoryLedger {
    fn transfer(
        &mut self,
        caller: AccountId,
        from: AccountId,
        to: AccountId,
        id: TokenId,
        amount: Amount,
        _extra: &[u8],
    ) -> Result<()> {
        self.transfer_one(caller, from, to, id, amount)
    }

    fn batch_transfer(
        &mut self,
        caller: AccountId,
        from: AccountId,
        to: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
        _extra: &[u8],
    ) -> Result<()> {
        check_lengths(ids, amounts)?;
        let mut scratch = self.clone();
        for (id, amount) in ids.iter().zip(amounts) {
            scratch.transfer_one(caller, from, to, *id, *amount)?;
        }
        *self = scratch;
        Ok(())
    }

    fn set_blanket_approval(
        &mut self,
        caller: AccountId,
        operator: AccountId,
        approved: bool,
    ) -> Result<()> {
        if approved {
            self.blanket.insert((caller, operator));
        } else {
            self.blanket.remove(&(caller, operator));
        }
        Ok(())
    }

    fn set_allowance(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        id: TokenId,
        amount: Amount,
    ) -> Result<()> {
        store(&mut self.allowances, (caller, spender, id), amount);
        Ok(())
    }

    fn increase_allowance(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        id: TokenId,
        delta: Amount,
    ) -> Result<()> {
        let have = self.allowance(caller, spender, id);
        let now = have.checked_add(delta).ok_or(LedgerError::Overflow)?;
        store(&mut self.allowances, (caller, spender, id), now);
        Ok(())
    }

    fn decrease_allowance(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        id: TokenId,
        delta: Amount,
    ) -> Result<()> {
        let have = self.allowance(caller, spender, id);
        let now = have
            .checked_sub(delta)
            .ok_or(LedgerError::AllowanceUnderflow {
                owner: caller,
                spender,
                id,
                have,
                delta,
            })?;
        store(&mut self.allowances, (caller, spender, id), now);
        Ok(())
    }

    fn set_allowance_batch(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) -> Result<()> {
        check_lengths(ids, amounts)?;
        for (id, amount) in ids.iter().zip(amounts) {
            store(&mut self.allowances, (caller, spender, *id), *amount);
        }
        Ok(())
    }

    fn increase_allowance_batch(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        ids: &[TokenId],
        deltas: &[Amount],
    ) -> Result<()> {
        check_lengths(ids, deltas)?;
        let mut scratch = self.clone();
        for (id, delta) in ids.iter().zip(deltas) {
            scratch.increase_allowance(caller, spender, *id, *delta)?;
        }
        *self = scratch;
        Ok(())
    }

    fn decrease_allowance_batch(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        ids: &[TokenId],
        deltas: &[Amount],
    ) -> Result<()> {
        check_lengths(ids, deltas)?;
        let mut scratch = self.clone();
        for (id, delta) in ids.iter().zip(deltas) {
            scratch.decrease_allowance(caller, spender, *id, *delta)?;
        }
        *self = scratch;
        Ok(())
    }

    fn register_shadow_token(&mut self, _caller: AccountId, id: TokenId) -> Result<ShadowHandle> {
        if self.shadows.contains_key(&id) {
            return Err(LedgerError::AlreadyRegistered { id });
        }
        if self.total_supply(id) == 0 {
            return Err(LedgerError::ZeroSupply { id });
        }
        let handle = derive_handle(&id);
        self.shadows.insert(id, handle);
        Ok(handle)
    }

    fn transmute_to_shadow(
        &mut self,
        caller: AccountId,
        owner: AccountId,
        id: TokenId,
        amount: Amount,
    ) -> Result<()> {
        self.transmute_to_one(caller, owner, id, amount)
    }

    fn transmute_from_shadow(
        &mut self,
        caller: AccountId,
        id: TokenId,
        amount: Amount,
    ) -> Result<()> {
        self.transmute_from_one(caller, id, amount)
    }

    fn batch_transmute_to_shadow(
        &mut self,
        caller: AccountId,
        owner: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) -> Result<()> {
        check_lengths(ids, amounts)?;
        let mut scratch = self.clone();
        for (id, amount) in ids.iter().zip(amounts) {
            scratch.transmute_to_one(caller, owner, *id, *amount)?;
        }
        *self = scratch;
        Ok(())
    }

    fn batch_transmute_from_shadow(
        &mut self,
        caller: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) -> Result<()> {
        check_lengths(ids, amounts)?;
        let mut scratch = self.clone();
        for (id, amount) in ids.iter().zip(amounts) {
            scratch.transmute_from_one(caller, *id, *amount)?;
        }
        *self = scratch;
        Ok(())
    }

    fn mint(
        &mut self,
        account: AccountId,
        id: TokenId,
        amount: Amount,
        _extra: &[u8],
    ) -> Result<()> {
        let amount = amount.min(MAX_MINT_AMOUNT);
        let credited = self
            .balance_of(account, id)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        let supply = self
            .total_supply(id)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        store(&mut self.balances, (account, id), credited);
        store(&mut self.supplies, id, supply);
        Ok(())
    }

    fn balance_of(&self, account: AccountId, id: TokenId) -> Amount {
        self.balances.get(&(account, id)).copied().unwrap_or(0)
    }

    fn total_supply(&self, id: TokenId) -> Amount {
        self.supplies.get(&id).copied().unwrap_or(0)
    }

    fn allowance(&self, owner: AccountId, spender: AccountId, id: TokenId) -> Amount {
        self.allowances
            .get(&(owner, spender, id))
            .copied()
            .unwrap_or(0)
    }

    fn is_blanket_approved(&self, owner: AccountId, spender: AccountId) -> bool {
        self.blanket.contains(&(owner, spender))
    }

    fn shadow_token_of(&self, id: TokenId) -> Option<ShadowHandle> {
        self.shadows.get(&id).copied()
    }

    fn shadow_balance_of(&self, handle: ShadowHandle, account: AccountId) -> Amount {
        self.shadow_balances
            .get(&(handle, account))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(tag: u8) -> AccountId {
        AccountId([tag; 32])
    }

    fn token(tag: u8) -> TokenId {
        TokenId([tag; 32])
    }

    fn funded() -> (MemoryLedger, AccountId, AccountId, TokenId) {
        let mut sut = MemoryLedger::new();
        let (a, b, t) = (acct(1), acct(2), token(9));
        sut.mint(a, t, 1_000, &[]).unwrap();
        (sut, a, b, t)
    }

    #[test]
    fn mint_then_transfer_moves_balance_and_keeps_supply() {
        let (mut sut, a, b, t) = funded();
        sut.transfer(a, a, b, t, 300, &[]).unwrap();
        assert_eq!(sut.balance_of(a, t), 700);
        assert_eq!(sut.balance_of(b, t), 300);
        assert_eq!(sut.total_supply(t), 1_000);
    }

    #[test]
    fn overdraw_is_refused_with_context() {
        let (mut sut, a, b, t) = funded();
        let err = sut.transfer(a, a, b, t, 1_001, &[]).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientBalance {
                account: a,
                id: t,
                have: 1_000,
                need: 1_001,
            }
        );
        assert_eq!(sut.balance_of(a, t), 1_000);
    }

    #[test]
    fn self_transfer_still_needs_the_funds() {
        let (mut sut, a, _, t) = funded();
        sut.transfer(a, a, a, t, 400, &[]).unwrap();
        assert_eq!(sut.balance_of(a, t), 1_000);
        assert!(sut.transfer(a, a, a, t, 1_001, &[]).is_err());
    }

    #[test]
    fn zero_transfers_pass_every_gate() {
        let (mut sut, a, b, t) = funded();
        // No allowance, no blanket: a zero spend still clears the path.
        sut.transfer(b, a, b, t, 0, &[]).unwrap();
        assert_eq!(sut.balance_of(a, t), 1_000);
    }

    #[test]
    fn blanket_approval_shadows_the_allowance() {
        let (mut sut, a, b, t) = funded();
        sut.set_allowance(a, b, t, 50).unwrap();
        sut.set_blanket_approval(a, b, true).unwrap();
        sut.transfer(b, a, b, t, 200, &[]).unwrap();
        assert_eq!(sut.balance_of(b, t), 200);
        assert_eq!(sut.allowance(a, b, t), 50);
    }

    #[test]
    fn allowance_path_consumes_exactly_the_amount() {
        let (mut sut, a, b, t) = funded();
        sut.set_allowance(a, b, t, 300).unwrap();
        sut.transfer(b, a, b, t, 200, &[]).unwrap();
        assert_eq!(sut.allowance(a, b, t), 100);
        let err = sut.transfer(b, a, b, t, 200, &[]).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientAllowance {
                owner: a,
                spender: b,
                id: t,
                have: 100,
                need: 200,
            }
        );
    }

    #[test]
    fn revoked_blanket_falls_back_to_the_allowance() {
        let (mut sut, a, b, t) = funded();
        sut.set_blanket_approval(a, b, true).unwrap();
        sut.set_blanket_approval(a, b, false).unwrap();
        assert!(!sut.is_blanket_approved(a, b));
        assert!(sut.transfer(b, a, b, t, 1, &[]).is_err());
    }

    #[test]
    fn batch_length_mismatch_is_refused_up_front() {
        let (mut sut, a, b, t) = funded();
        let err = sut
            .batch_transfer(a, a, b, &[t, t], &[100], &[])
            .unwrap_err();
        assert_eq!(err, LedgerError::LengthMismatch { ids: 2, amounts: 1 });
        assert_eq!(sut.balance_of(a, t), 1_000);
    }

    #[test]
    fn failing_batch_element_rolls_everything_back() {
        let (mut sut, a, b, t) = funded();
        let empty = token(8);
        let err = sut
            .batch_transfer(a, a, b, &[t, empty], &[100, 1], &[])
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(sut.balance_of(a, t), 1_000);
        assert_eq!(sut.balance_of(b, t), 0);
    }

    #[test]
    fn duplicate_batch_ids_draw_down_a_running_balance() {
        let (mut sut, a, b, t) = funded();
        sut.batch_transfer(a, a, b, &[t, t], &[600, 400], &[]).unwrap();
        assert_eq!(sut.balance_of(a, t), 0);
        assert!(sut
            .batch_transfer(b, b, a, &[t, t], &[600, 600], &[])
            .is_err());
        assert_eq!(sut.balance_of(b, t), 1_000);
    }

    #[test]
    fn allowance_arithmetic_refuses_out_of_range_steps() {
        let (mut sut, a, b, t) = funded();
        sut.set_allowance(a, b, t, 10).unwrap();
        sut.increase_allowance(a, b, t, 5).unwrap();
        assert_eq!(sut.allowance(a, b, t), 15);
        assert_eq!(
            sut.increase_allowance(a, b, t, u128::MAX),
            Err(LedgerError::Overflow)
        );
        let err = sut.decrease_allowance(a, b, t, 20).unwrap_err();
        assert_eq!(
            err,
            LedgerError::AllowanceUnderflow {
                owner: a,
                spender: b,
                id: t,
                have: 15,
                delta: 20,
            }
        );
    }

    #[test]
    fn allowance_batches_are_atomic_too() {
        let (mut sut, a, b, t) = funded();
        let other = token(7);
        sut.set_allowance_batch(a, b, &[t, other], &[40, 60]).unwrap();
        let err = sut
            .decrease_allowance_batch(a, b, &[t, other], &[40, 61])
            .unwrap_err();
        assert!(matches!(err, LedgerError::AllowanceUnderflow { .. }));
        assert_eq!(sut.allowance(a, b, t), 40);
        assert_eq!(sut.allowance(a, b, other), 60);
    }

    #[test]
    fn registration_needs_supply_and_happens_once() {
        let mut sut = MemoryLedger::new();
        let (a, t) = (acct(1), token(9));
        assert_eq!(
            sut.register_shadow_token(a, t),
            Err(LedgerError::ZeroSupply { id: t })
        );
        sut.mint(a, t, 5, &[]).unwrap();
        let handle = sut.register_shadow_token(a, t).unwrap();
        assert_eq!(sut.shadow_token_of(t), Some(handle));
        assert_eq!(
            sut.register_shadow_token(a, t),
            Err(LedgerError::AlreadyRegistered { id: t })
        );
        assert_eq!(sut.shadow_token_of(t), Some(handle));
    }

    #[test]
    fn distinct_ids_get_distinct_handles() {
        let mut sut = MemoryLedger::new();
        let a = acct(1);
        let (t1, t2) = (token(3), token(4));
        sut.mint(a, t1, 1, &[]).unwrap();
        sut.mint(a, t2, 1, &[]).unwrap();
        let h1 = sut.register_shadow_token(a, t1).unwrap();
        let h2 = sut.register_shadow_token(a, t2).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn transmutation_requires_registration() {
        let (mut sut, a, _, t) = funded();
        assert_eq!(
            sut.transmute_to_shadow(a, a, t, 1),
            Err(LedgerError::NotRegistered { id: t })
        );
        assert_eq!(
            sut.transmute_from_shadow(a, t, 1),
            Err(LedgerError::NotRegistered { id: t })
        );
    }

    #[test]
    fn transmute_round_trip_moves_supply_both_ways() {
        let (mut sut, a, _, t) = funded();
        let handle = sut.register_shadow_token(a, t).unwrap();

        sut.transmute_to_shadow(a, a, t, 400).unwrap();
        assert_eq!(sut.balance_of(a, t), 600);
        assert_eq!(sut.total_supply(t), 600);
        assert_eq!(sut.shadow_balance_of(handle, a), 400);

        sut.transmute_from_shadow(a, t, 150).unwrap();
        assert_eq!(sut.balance_of(a, t), 750);
        assert_eq!(sut.total_supply(t), 750);
        assert_eq!(sut.shadow_balance_of(handle, a), 250);

        let err = sut.transmute_from_shadow(a, t, 251).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientShadowBalance {
                account: a,
                id: t,
                have: 250,
                need: 251,
            }
        );
    }

    #[test]
    fn transmute_to_shadow_follows_transfer_authorization() {
        let (mut sut, a, b, t) = funded();
        sut.register_shadow_token(a, t).unwrap();
        assert!(matches!(
            sut.transmute_to_shadow(b, a, t, 100),
            Err(LedgerError::InsufficientAllowance { .. })
        ));
        sut.set_allowance(a, b, t, 400).unwrap();
        sut.transmute_to_shadow(b, a, t, 100).unwrap();
        assert_eq!(sut.allowance(a, b, t), 300);
        assert_eq!(sut.balance_of(a, t), 900);
    }

    #[test]
    fn mint_clamps_to_the_cap() {
        let mut sut = MemoryLedger::new();
        let (a, t) = (acct(1), token(2));
        sut.mint(a, t, MAX_MINT_AMOUNT + 5, &[]).unwrap();
        assert_eq!(sut.balance_of(a, t), MAX_MINT_AMOUNT);
        assert_eq!(sut.total_supply(t), MAX_MINT_AMOUNT);
    }

    #[test]
    fn unknown_reads_are_zero() {
        let sut = MemoryLedger::new();
        assert_eq!(sut.balance_of(acct(1), token(2)), 0);
        assert_eq!(sut.total_supply(token(2)), 0);
        assert_eq!(sut.allowance(acct(1), acct(2), token(3)), 0);
        assert!(!sut.is_blanket_approved(acct(1), acct(2)));
        assert_eq!(sut.shadow_token_of(token(2)), None);
        assert_eq!(sut.shadow_balance_of(ShadowHandle([7; 32]), acct(1)), 0);
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn acct(tag: u8) -> AccountId {
        AccountId([tag; 32])
    }

    fn token(tag: u8) -> TokenId {
        TokenId([tag; 32])
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Supply equals the sum of balances, no matter how a valid transfer
        /// sequence shuffles them.
        #[test]
        fn conservation_survives_valid_transfers(
            funded in 1u128..=1u128 << 60,
            moves in prop::collection::vec((0u8..3, 0u8..3, 0u8..=16), 0..24),
        ) {
            let mut sut = MemoryLedger::new();
            let t = token(0xEE);
            sut.mint(acct(1), t, funded, &[]).unwrap();
            for (from, to, num) in &moves {
                let from = acct(from + 1);
                let to = acct(to + 1);
                let amount = sut.balance_of(from, t) / 16 * u128::from(*num);
                sut.transfer(from, from, to, t, amount, &[]).unwrap();
            }
            let sum: Amount = (1u8..4).map(|tag| sut.balance_of(acct(tag), t)).sum();
            prop_assert_eq!(sut.total_supply(t), sum);
        }

        /// A batch is observably the same as its elements applied in order,
        /// whenever the batch goes through.
        #[test]
        fn batch_matches_sequential_singles(
            funded in 1u128..=1u128 << 60,
            nums in prop::collection::vec(0u8..=4, 1..5),
        ) {
            let mut batched = MemoryLedger::new();
            let (a, b, t) = (acct(1), acct(2), token(3));
            batched.mint(a, t, funded, &[]).unwrap();
            let mut sequential = batched.clone();

            let ids = vec![t; nums.len()];
            // Each element takes at most a sixteenth, so the whole batch
            // stays within the funded balance.
            let amounts: Vec<Amount> =
                nums.iter().map(|num| funded / 16 * u128::from(*num)).collect();

            batched.batch_transfer(a, a, b, &ids, &amounts, &[]).unwrap();
            for amount in &amounts {
                sequential.transfer(a, a, b, t, *amount, &[]).unwrap();
            }
            prop_assert_eq!(batched, sequential);
        }

        /// Transmuting to shadow and back is the identity on every observable
        /// quantity.
        #[test]
        fn transmute_round_trip_is_identity(
            funded in 1u128..=1u128 << 60,
            num in 0u8..=16,
        ) {
            let mut sut = MemoryLedger::new();
            let (a, t) = (acct(1), token(2));
            sut.mint(a, t, funded, &[]).unwrap();
            sut.register_shadow_token(a, t).unwrap();
            let before = sut.clone();

            let amount = funded / 16 * u128::from(num);
            sut.transmute_to_shadow(a, a, t, amount).unwrap();
            sut.transmute_from_shadow(a, t, amount).unwrap();
            prop_assert_eq!(sut, before);
        }
    }
}
