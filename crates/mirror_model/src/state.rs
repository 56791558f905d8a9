//! The mirror state store and its update rules.

use std::collections::{BTreeMap, BTreeSet};

use ledger_abi::{AccountId, Amount, ShadowHandle, TokenId};

use crate::arith::ArithmeticMode;

/// Which rule authorizes a transfer-shaped operation, resolved from the
/// mirror's own view. Blanket approval takes precedence over the single-id
/// allowance; only the allowance path consumes anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPath {
    /// Caller moves their own balance.
    Owner,
    /// Caller holds a blanket approval from the owner.
    Blanket,
    /// Caller spends the per-id allowance, which is consumed by the amount.
    Allowance,
}

/// The reference model the engine maintains in parallel with the SUT.
///
/// All entity state lives here, keyed by the opaque ids from `ledger-abi`,
/// in ordered maps so iteration (and therefore sweep output and failure
/// messages) is deterministic for a given seed. Rosters are append-only and
/// deduplicated on insert.
#[derive(Debug, Clone)]
pub struct MirrorState {
    arithmetic: ArithmeticMode,
    balances: BTreeMap<(AccountId, TokenId), Amount>,
    supplies: BTreeMap<TokenId, Amount>,
    allowances: BTreeMap<(AccountId, AccountId, TokenId), Amount>,
    blanket: BTreeSet<(AccountId, AccountId)>,
    shadows: BTreeMap<TokenId, ShadowHandle>,
    shadow_balances: BTreeMap<(AccountId, TokenId), Amount>,
    accounts: Vec<AccountId>,
    token_ids: Vec<TokenId>,
    registered_ids: Vec<TokenId>,
}

impl Default for MirrorState {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorState {
    pub fn new() -> Self {
        Self::with_arithmetic(ArithmeticMode::default())
    }

    pub fn with_arithmetic(arithmetic: ArithmeticMode) -> Self {
        Self {
            arithmetic,
            balances: BTreeMap::new(),
            supplies: BTreeMap::new(),
            allowances: BTreeMap::new(),
            blanket: BTreeSet::new(),
            shadows: BTreeMap::new(),
            shadow_balances: BTreeMap::new(),
            accounts: Vec::new(),
            token_ids: Vec::new(),
            registered_ids: Vec::new(),
        }
    }

    pub fn arithmetic(&self) -> ArithmeticMode {
        self.arithmetic
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn balance(&self, account: AccountId, id: TokenId) -> Amount {
        self.balances.get(&(account, id)).copied().unwrap_or(0)
    }

    pub fn total_supply(&self, id: TokenId) -> Amount {
        self.supplies.get(&id).copied().unwrap_or(0)
    }

    pub fn allowance(&self, owner: AccountId, spender: AccountId, id: TokenId) -> Amount {
        self.allowances
            .get(&(owner, spender, id))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_blanket_approved(&self, owner: AccountId, spender: AccountId) -> bool {
        self.blanket.contains(&(owner, spender))
    }

    pub fn shadow_token(&self, id: TokenId) -> Option<ShadowHandle> {
        self.shadows.get(&id).copied()
    }

    pub fn is_registered(&self, id: TokenId) -> bool {
        self.shadows.contains_key(&id)
    }

    pub fn shadow_balance(&self, account: AccountId, id: TokenId) -> Amount {
        self.shadow_balances
            .get(&(account, id))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of mirror balances of `id` over every rostered account. The
    /// conservation invariant compares this against [`total_supply`].
    ///
    /// [`total_supply`]: MirrorState::total_supply
    pub fn balance_sum(&self, id: TokenId) -> Amount {
        self.accounts
            .iter()
            .map(|account| self.balance(*account, id))
            .fold(0u128, |sum, b| sum.saturating_add(b))
    }

    /// Resolve which rule lets `caller` move `owner`'s balance, from the
    /// mirror's own view of approvals.
    pub fn authorization_path(&self, caller: AccountId, owner: AccountId) -> AuthPath {
        if caller == owner {
            AuthPath::Owner
        } else if self.is_blanket_approved(owner, caller) {
            AuthPath::Blanket
        } else {
            AuthPath::Allowance
        }
    }

    // ========================================================================
    // Rosters
    // ========================================================================

    /// Record an account the campaign has observed. Returns `true` when the
    /// account was genuinely new. The zero sentinel is never rostered.
    pub fn note_account(&mut self, account: AccountId) -> bool {
        if account.is_zero() || self.accounts.contains(&account) {
            return false;
        }
        self.accounts.push(account);
        true
    }

    /// Record a token id the campaign has observed. Returns `true` when new.
    pub fn note_token_id(&mut self, id: TokenId) -> bool {
        if self.token_ids.contains(&id) {
            return false;
        }
        self.token_ids.push(id);
        true
    }

    pub fn known_accounts(&self) -> &[AccountId] {
        &self.accounts
    }

    pub fn known_token_ids(&self) -> &[TokenId] {
        &self.token_ids
    }

    pub fn known_registered_ids(&self) -> &[TokenId] {
        &self.registered_ids
    }

    // ========================================================================
    // Update rules, one per ledger effect
    // ========================================================================

    /// Balance movement. The zero sentinel skips its side: a sender of zero
    /// creates balance out of nothing, a receiver of zero destroys it.
    /// Supply is only touched by the initial-mint path.
    fn transfer_inner(
        &mut self,
        from: AccountId,
        to: AccountId,
        id: TokenId,
        amount: Amount,
        bump_supply: bool,
    ) {
        if !from.is_zero() {
            let have = self.balance(from, id);
            let left = self.arithmetic.sub(have, amount, "balance");
            self.balances.insert((from, id), left);
        }
        if !to.is_zero() {
            let have = self.balance(to, id);
            let now = self.arithmetic.add(have, amount, "balance");
            self.balances.insert((to, id), now);
        }
        if bump_supply {
            let have = self.total_supply(id);
            let now = self.arithmetic.add(have, amount, "total supply");
            self.supplies.insert(id, now);
        }
    }

    /// Plain transfer between two accounts; supply untouched.
    pub fn record_transfer(&mut self, from: AccountId, to: AccountId, id: TokenId, amount: Amount) {
        self.transfer_inner(from, to, id, amount, false);
    }

    /// The funding path: balance appears from the sentinel and total supply
    /// grows by the same amount.
    pub fn record_initial_mint(&mut self, account: AccountId, id: TokenId, amount: Amount) {
        self.transfer_inner(AccountId::ZERO, account, id, amount, true);
    }

    /// Element-wise transfer over parallel arrays. Length agreement is the
    /// handler's precondition, not the mirror's: unequal arrays zip down to
    /// the pairs that exist.
    pub fn record_batch_transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) {
        for (id, amount) in ids.iter().zip(amounts) {
            self.record_transfer(from, to, *id, *amount);
        }
    }

    pub fn record_allowance_set(
        &mut self,
        owner: AccountId,
        spender: AccountId,
        id: TokenId,
        amount: Amount,
    ) {
        self.allowances.insert((owner, spender, id), amount);
    }

    pub fn record_allowance_increase(
        &mut self,
        owner: AccountId,
        spender: AccountId,
        id: TokenId,
        delta: Amount,
    ) {
        let have = self.allowance(owner, spender, id);
        let now = self.arithmetic.add(have, delta, "allowance");
        self.allowances.insert((owner, spender, id), now);
    }

    pub fn record_allowance_decrease(
        &mut self,
        owner: AccountId,
        spender: AccountId,
        id: TokenId,
        delta: Amount,
    ) {
        let have = self.allowance(owner, spender, id);
        let now = self.arithmetic.sub(have, delta, "allowance");
        self.allowances.insert((owner, spender, id), now);
    }

    /// Allowance consumed by a transfer-shaped operation on the allowance
    /// path. Kept separate from [`record_allowance_decrease`] so handler code
    /// says which of the two happened.
    ///
    /// [`record_allowance_decrease`]: MirrorState::record_allowance_decrease
    pub fn record_allowance_spend(
        &mut self,
        owner: AccountId,
        spender: AccountId,
        id: TokenId,
        amount: Amount,
    ) {
        self.record_allowance_decrease(owner, spender, id, amount);
    }

    pub fn record_allowance_set_batch(
        &mut self,
        owner: AccountId,
        spender: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) {
        for (id, amount) in ids.iter().zip(amounts) {
            self.record_allowance_set(owner, spender, *id, *amount);
        }
    }

    pub fn record_allowance_increase_batch(
        &mut self,
        owner: AccountId,
        spender: AccountId,
        ids: &[TokenId],
        deltas: &[Amount],
    ) {
        for (id, delta) in ids.iter().zip(deltas) {
            self.record_allowance_increase(owner, spender, *id, *delta);
        }
    }

    pub fn record_allowance_decrease_batch(
        &mut self,
        owner: AccountId,
        spender: AccountId,
        ids: &[TokenId],
        deltas: &[Amount],
    ) {
        for (id, delta) in ids.iter().zip(deltas) {
            self.record_allowance_decrease(owner, spender, *id, *delta);
        }
    }

    pub fn record_blanket_approval(
        &mut self,
        owner: AccountId,
        operator: AccountId,
        approved: bool,
    ) {
        if approved {
            self.blanket.insert((owner, operator));
        } else {
            self.blanket.remove(&(owner, operator));
        }
    }

    /// Fix the shadow handle for `id` and roster it. A handle, once set, is
    /// never overwritten; repeated registration keeps the first handle and
    /// returns `false`.
    pub fn record_shadow_registration(&mut self, id: TokenId, handle: ShadowHandle) -> bool {
        if self.shadows.contains_key(&id) {
            return false;
        }
        self.shadows.insert(id, handle);
        if !self.registered_ids.contains(&id) {
            self.registered_ids.push(id);
        }
        true
    }

    /// Ledger balance and supply shrink, shadow balance grows, all by the
    /// same amount.
    pub fn record_transmute_to_shadow(&mut self, owner: AccountId, id: TokenId, amount: Amount) {
        let have = self.balance(owner, id);
        let left = self.arithmetic.sub(have, amount, "balance");
        self.balances.insert((owner, id), left);

        let supply = self.total_supply(id);
        let supply_left = self.arithmetic.sub(supply, amount, "total supply");
        self.supplies.insert(id, supply_left);

        let shadow = self.shadow_balance(owner, id);
        let shadow_now = self.arithmetic.add(shadow, amount, "shadow balance");
        self.shadow_balances.insert((owner, id), shadow_now);
    }

    /// Exact inverse of [`record_transmute_to_shadow`].
    pub fn record_transmute_from_shadow(&mut self, owner: AccountId, id: TokenId, amount: Amount) {
        let shadow = self.shadow_balance(owner, id);
        let shadow_left = self.arithmetic.sub(shadow, amount, "shadow balance");
        self.shadow_balances.insert((owner, id), shadow_left);

        let have = self.balance(owner, id);
        let now = self.arithmetic.add(have, amount, "balance");
        self.balances.insert((owner, id), now);

        let supply = self.total_supply(id);
        let supply_now = self.arithmetic.add(supply, amount, "total supply");
        self.supplies.insert(id, supply_now);
    }

    pub fn record_batch_transmute_to_shadow(
        &mut self,
        owner: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) {
        for (id, amount) in ids.iter().zip(amounts) {
            self.record_transmute_to_shadow(owner, *id, *amount);
        }
    }

    pub fn record_batch_transmute_from_shadow(
        &mut self,
        owner: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) {
        for (id, amount) in ids.iter().zip(amounts) {
            self.record_transmute_from_shadow(owner, *id, *amount);
        }
    }

    // ========================================================================
    // Composite updates: authorization-aware, shared by every policy
    // ========================================================================

    /// Transfer plus allowance consumption when the mirror's view says the
    /// allowance path applies. The precedence rule lives here exactly once.
    pub fn apply_authorized_transfer(
        &mut self,
        caller: AccountId,
        from: AccountId,
        to: AccountId,
        id: TokenId,
        amount: Amount,
    ) {
        if self.authorization_path(caller, from) == AuthPath::Allowance {
            self.record_allowance_spend(from, caller, id, amount);
        }
        self.record_transfer(from, to, id, amount);
    }

    pub fn apply_authorized_batch_transfer(
        &mut self,
        caller: AccountId,
        from: AccountId,
        to: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) {
        for (id, amount) in ids.iter().zip(amounts) {
            self.apply_authorized_transfer(caller, from, to, *id, *amount);
        }
    }

    pub fn apply_authorized_transmute_to_shadow(
        &mut self,
        caller: AccountId,
        owner: AccountId,
        id: TokenId,
        amount: Amount,
    ) {
        if self.authorization_path(caller, owner) == AuthPath::Allowance {
            self.record_allowance_spend(owner, caller, id, amount);
        }
        self.record_transmute_to_shadow(owner, id, amount);
    }

    pub fn apply_authorized_batch_transmute_to_shadow(
        &mut self,
        caller: AccountId,
        owner: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) {
        for (id, amount) in ids.iter().zip(amounts) {
            self.apply_authorized_transmute_to_shadow(caller, owner, *id, *amount);
        }
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

    fn handle(tag: u8) -> ShadowHandle {
        ShadowHandle([tag; 32])
    }

    /// Mirror with two funded accounts on one id, rosters populated.
    fn funded_mirror() -> (MirrorState, AccountId, AccountId, TokenId) {
        let mut mirror = MirrorState::new();
        let (u1, u2, t1) = (acct(1), acct(2), token(9));
        mirror.note_account(u1);
        mirror.note_account(u2);
        mirror.note_token_id(t1);
        mirror.record_initial_mint(u1, t1, 1_000);
        mirror.record_initial_mint(u2, t1, 500);
        (mirror, u1, u2, t1)
    }

    #[test]
    fn initial_mint_raises_balance_and_supply() {
        let (mirror, u1, u2, t1) = funded_mirror();
        assert_eq!(mirror.balance(u1, t1), 1_000);
        assert_eq!(mirror.balance(u2, t1), 500);
        assert_eq!(mirror.total_supply(t1), 1_500);
        assert_eq!(mirror.balance_sum(t1), 1_500);
    }

    #[test]
    fn transfer_conserves_supply() {
        let (mut mirror, u1, u2, t1) = funded_mirror();
        mirror.record_transfer(u1, u2, t1, 300);
        assert_eq!(mirror.balance(u1, t1), 700);
        assert_eq!(mirror.balance(u2, t1), 800);
        assert_eq!(mirror.total_supply(t1), 1_500);
        assert_eq!(mirror.balance_sum(t1), 1_500);
    }

    #[test]
    fn self_transfer_is_a_no_op() {
        let (mut mirror, u1, _, t1) = funded_mirror();
        mirror.record_transfer(u1, u1, t1, 400);
        assert_eq!(mirror.balance(u1, t1), 1_000);
    }

    #[test]
    fn sentinel_receiver_destroys_balance_without_supply_bump() {
        let (mut mirror, u1, _, t1) = funded_mirror();
        mirror.record_transfer(u1, AccountId::ZERO, t1, 250);
        assert_eq!(mirror.balance(u1, t1), 750);
        // Only the initial-mint path bumps supply.
        assert_eq!(mirror.total_supply(t1), 1_500);
    }

    #[test]
    fn saturating_underflow_floors_at_zero() {
        let (mut mirror, u1, u2, t1) = funded_mirror();
        mirror.record_transfer(u1, u2, t1, 5_000);
        assert_eq!(mirror.balance(u1, t1), 0);
        assert_eq!(mirror.balance(u2, t1), 5_500);
    }

    #[test]
    #[should_panic(expected = "mirror balance underflow")]
    fn panicking_underflow_panics() {
        let mut mirror = MirrorState::with_arithmetic(ArithmeticMode::Panicking);
        let (u1, u2, t1) = (acct(1), acct(2), token(9));
        mirror.note_account(u1);
        mirror.record_initial_mint(u1, t1, 10);
        mirror.record_transfer(u1, u2, t1, 11);
    }

    #[test]
    fn allowance_set_increase_decrease() {
        let (mut mirror, u1, u2, t1) = funded_mirror();
        mirror.record_allowance_set(u1, u2, t1, 100);
        mirror.record_allowance_increase(u1, u2, t1, 50);
        mirror.record_allowance_decrease(u1, u2, t1, 30);
        assert_eq!(mirror.allowance(u1, u2, t1), 120);
        // Independent per id.
        assert_eq!(mirror.allowance(u1, u2, token(8)), 0);
    }

    #[test]
    fn blanket_approval_toggles() {
        let (mut mirror, u1, u2, _) = funded_mirror();
        assert!(!mirror.is_blanket_approved(u1, u2));
        mirror.record_blanket_approval(u1, u2, true);
        assert!(mirror.is_blanket_approved(u1, u2));
        // Directional: u2 has not approved u1.
        assert!(!mirror.is_blanket_approved(u2, u1));
        mirror.record_blanket_approval(u1, u2, false);
        assert!(!mirror.is_blanket_approved(u1, u2));
    }

    #[test]
    fn registration_keeps_first_handle() {
        let (mut mirror, _, _, t1) = funded_mirror();
        assert!(mirror.record_shadow_registration(t1, handle(0xaa)));
        assert!(!mirror.record_shadow_registration(t1, handle(0xbb)));
        assert_eq!(mirror.shadow_token(t1), Some(handle(0xaa)));
        assert_eq!(mirror.known_registered_ids(), &[t1]);
    }

    #[test]
    fn rosters_deduplicate_and_keep_order() {
        let mut mirror = MirrorState::new();
        assert!(mirror.note_account(acct(3)));
        assert!(mirror.note_account(acct(1)));
        assert!(!mirror.note_account(acct(3)));
        assert!(!mirror.note_account(AccountId::ZERO));
        assert_eq!(mirror.known_accounts(), &[acct(3), acct(1)]);

        assert!(mirror.note_token_id(token(7)));
        assert!(!mirror.note_token_id(token(7)));
        assert_eq!(mirror.known_token_ids(), &[token(7)]);
    }

    #[test]
    fn transmute_round_trip_restores_all_three_quantities() {
        let (mut mirror, u1, _, t1) = funded_mirror();
        mirror.record_shadow_registration(t1, handle(0xaa));

        mirror.record_transmute_to_shadow(u1, t1, 1_000);
        assert_eq!(mirror.balance(u1, t1), 0);
        assert_eq!(mirror.total_supply(t1), 500);
        assert_eq!(mirror.shadow_balance(u1, t1), 1_000);

        mirror.record_transmute_from_shadow(u1, t1, 1_000);
        assert_eq!(mirror.balance(u1, t1), 1_000);
        assert_eq!(mirror.total_supply(t1), 1_500);
        assert_eq!(mirror.shadow_balance(u1, t1), 0);
    }

    #[test]
    fn authorized_transfer_consumes_allowance_only_on_allowance_path() {
        let (mut mirror, u1, u2, t1) = funded_mirror();
        mirror.record_allowance_set(u1, u2, t1, 400);

        // Allowance path: spender is not the owner and holds no blanket.
        assert_eq!(mirror.authorization_path(u2, u1), AuthPath::Allowance);
        mirror.apply_authorized_transfer(u2, u1, u2, t1, 150);
        assert_eq!(mirror.allowance(u1, u2, t1), 250);

        // Blanket precedence: allowance untouched.
        mirror.record_blanket_approval(u1, u2, true);
        assert_eq!(mirror.authorization_path(u2, u1), AuthPath::Blanket);
        mirror.apply_authorized_transfer(u2, u1, u2, t1, 150);
        assert_eq!(mirror.allowance(u1, u2, t1), 250);

        // Owner path: own transfers never touch allowances.
        mirror.apply_authorized_transfer(u1, u1, u2, t1, 100);
        assert_eq!(mirror.allowance(u1, u2, t1), 250);
    }

    #[test]
    fn batch_updates_apply_per_element() {
        let (mut mirror, u1, u2, t1) = funded_mirror();
        let t2 = token(8);
        mirror.note_token_id(t2);
        mirror.record_initial_mint(u1, t2, 60);

        mirror.record_batch_transfer(u1, u2, &[t1, t2, t1], &[10, 20, 30]);
        assert_eq!(mirror.balance(u1, t1), 960);
        assert_eq!(mirror.balance(u1, t2), 40);
        assert_eq!(mirror.balance(u2, t1), 540);
        assert_eq!(mirror.balance(u2, t2), 20);
    }

    #[test]
    fn mismatched_batch_zips_the_common_prefix() {
        let (mut mirror, u1, u2, t1) = funded_mirror();
        let t2 = token(8);
        // Length agreement is the handler's problem; the mirror applies the
        // pairs that exist.
        mirror.record_batch_transfer(u1, u2, &[t1, t2], &[100]);
        assert_eq!(mirror.balance(u1, t1), 900);
        assert_eq!(mirror.balance(u2, t1), 600);
        assert_eq!(mirror.balance(u1, t2), 0);
    }

    #[test]
    fn batch_allowance_spend_accumulates_across_duplicate_ids() {
        let (mut mirror, u1, u2, t1) = funded_mirror();
        mirror.record_allowance_set(u1, u2, t1, 100);
        mirror.apply_authorized_batch_transfer(u2, u1, u2, &[t1, t1], &[40, 35]);
        assert_eq!(mirror.allowance(u1, u2, t1), 25);
        assert_eq!(mirror.balance(u1, t1), 925);
    }
}
