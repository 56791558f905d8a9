//! Shared vocabulary for the dual-representation ledger boundary.
//!
//! This crate defines the opaque identifiers, the amount range, the refusal
//! vocabulary (`LedgerError`), and the `DualLedger` trait every system under
//! test implements. It deliberately contains no harness logic: the engine,
//! the mirror model, and any ledger implementation all speak through these
//! types and nothing else.

#![forbid(unsafe_code)]

use core::fmt;
use thiserror::Error;

/// Token amounts. The privileged mint clamps to [`MAX_MINT_AMOUNT`], so all
/// circulating quantities fit comfortably below `u128::MAX` and checked
/// arithmetic on them cannot overflow under realistic campaign depths.
pub type Amount = u128;

/// Largest amount a single privileged mint may create: `2^96 - 1`.
pub const MAX_MINT_AMOUNT: Amount = (1 << 96) - 1;

pub type Result<T> = core::result::Result<T, LedgerError>;

// ============================================================================
// Opaque identifiers
// ============================================================================

macro_rules! opaque_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub const fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":"))?;
                for byte in &self.0[..6] {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }
    };
}

opaque_id!(
    /// An actor on the ledger. The all-zero value is the burn/mint sentinel
    /// ([`AccountId::ZERO`]) and never holds a balance of its own.
    AccountId,
    "acct"
);

opaque_id!(
    /// One slot of the multi-identifier ledger. Identifiers span the full
    /// 256-bit range; the harness derives them from seeds, the ledger treats
    /// them as opaque.
    TokenId,
    "id"
);

opaque_id!(
    /// Handle of the single-id shadow token an id transmutes into once
    /// registered. Assigned by the ledger, opaque to everyone else.
    ShadowHandle,
    "shadow"
);

impl AccountId {
    /// Burn/mint sentinel: transfers from it create balance, transfers to it
    /// destroy balance. It is never selected as an actor.
    pub const ZERO: AccountId = AccountId([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

// ============================================================================
// Refusals
// ============================================================================

/// Why a ledger refused an operation. Shared by every implementation so the
/// harness can classify refusals without knowing which ledger it is driving.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient balance of {id} for {account}: have {have}, need {need}")]
    InsufficientBalance {
        account: AccountId,
        id: TokenId,
        have: Amount,
        need: Amount,
    },

    #[error("insufficient shadow balance of {id} for {account}: have {have}, need {need}")]
    InsufficientShadowBalance {
        account: AccountId,
        id: TokenId,
        have: Amount,
        need: Amount,
    },

    #[error("allowance of {owner} for {spender} on {id} too low: have {have}, need {need}")]
    InsufficientAllowance {
        owner: AccountId,
        spender: AccountId,
        id: TokenId,
        have: Amount,
        need: Amount,
    },

    #[error("allowance of {owner} for {spender} on {id} cannot decrease by {delta}: have {have}")]
    AllowanceUnderflow {
        owner: AccountId,
        spender: AccountId,
        id: TokenId,
        have: Amount,
        delta: Amount,
    },

    #[error("parallel arrays disagree: {ids} ids vs {amounts} amounts")]
    LengthMismatch { ids: usize, amounts: usize },

    #[error("{id} is already registered for transmutation")]
    AlreadyRegistered { id: TokenId },

    #[error("{id} is not registered for transmutation")]
    NotRegistered { id: TokenId },

    #[error("{id} has zero circulating supply")]
    ZeroSupply { id: TokenId },

    #[error("arithmetic overflow")]
    Overflow,
}

// ============================================================================
// The SUT boundary
// ============================================================================

/// A dual-representation fungible-token ledger: many independent token ids,
/// each reversibly transmutable into its own single-id shadow token.
///
/// Mutating calls take the acting `caller` explicitly; there is no ambient
/// transaction context. Read accessors are total: unknown accounts, ids, and
/// handles read as zero/absent rather than failing.
///
/// # Semantics every implementation must honor
///
/// - A blanket approval satisfies any transfer by the operator regardless of
///   the single-id allowance, and leaves that allowance untouched. The
///   single-id allowance is consulted, and consumed, only when
///   `caller != from` and no blanket approval exists.
/// - Batch operations are atomic: parallel arrays of unequal length, or any
///   failing element, leave no partial state behind.
/// - Registration requires an unregistered id with strictly positive supply
///   and permanently fixes the shadow handle for that id.
/// - Transmutation in either direction requires a registered id; to-shadow
///   follows the transfer authorization rules, from-shadow converts the
///   caller's own shadow balance.
pub trait DualLedger {
    /// Move `amount` of `id` from `from` to `to` on behalf of `caller`.
    fn transfer(
        &mut self,
        caller: AccountId,
        from: AccountId,
        to: AccountId,
        id: TokenId,
        amount: Amount,
        extra: &[u8],
    ) -> Result<()>;

    /// Element-wise transfer over parallel `ids`/`amounts` arrays.
    fn batch_transfer(
        &mut self,
        caller: AccountId,
        from: AccountId,
        to: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
        extra: &[u8],
    ) -> Result<()>;

    /// Grant or revoke `operator`'s blanket approval over all of `caller`'s
    /// ids.
    fn set_blanket_approval(
        &mut self,
        caller: AccountId,
        operator: AccountId,
        approved: bool,
    ) -> Result<()>;

    /// Set `caller`'s allowance for `spender` on `id` to exactly `amount`.
    fn set_allowance(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        id: TokenId,
        amount: Amount,
    ) -> Result<()>;

    fn increase_allowance(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        id: TokenId,
        delta: Amount,
    ) -> Result<()>;

    fn decrease_allowance(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        id: TokenId,
        delta: Amount,
    ) -> Result<()>;

    fn set_allowance_batch(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) -> Result<()>;

    fn increase_allowance_batch(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        ids: &[TokenId],
        deltas: &[Amount],
    ) -> Result<()>;

    fn decrease_allowance_batch(
        &mut self,
        caller: AccountId,
        spender: AccountId,
        ids: &[TokenId],
        deltas: &[Amount],
    ) -> Result<()>;

    /// Register `id` for transmutation and return the handle of its shadow
    /// token. Fails on double registration or zero supply.
    fn register_shadow_token(&mut self, caller: AccountId, id: TokenId) -> Result<ShadowHandle>;

    /// Convert `amount` of `owner`'s ledger balance of `id` into shadow
    /// balance. Authorization follows the transfer rules.
    fn transmute_to_shadow(
        &mut self,
        caller: AccountId,
        owner: AccountId,
        id: TokenId,
        amount: Amount,
    ) -> Result<()>;

    /// Convert `amount` of the caller's shadow balance of `id` back into
    /// ledger balance.
    fn transmute_from_shadow(
        &mut self,
        caller: AccountId,
        id: TokenId,
        amount: Amount,
    ) -> Result<()>;

    fn batch_transmute_to_shadow(
        &mut self,
        caller: AccountId,
        owner: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) -> Result<()>;

    fn batch_transmute_from_shadow(
        &mut self,
        caller: AccountId,
        ids: &[TokenId],
        amounts: &[Amount],
    ) -> Result<()>;

    /// Privileged supply creation. Only the harness universe generator calls
    /// this, to fund newly-created accounts.
    fn mint(
        &mut self,
        account: AccountId,
        id: TokenId,
        amount: Amount,
        extra: &[u8],
    ) -> Result<()>;

    // ------------------------------------------------------------------
    // Read accessors
    // ------------------------------------------------------------------

    fn balance_of(&self, account: AccountId, id: TokenId) -> Amount;

    fn total_supply(&self, id: TokenId) -> Amount;

    fn allowance(&self, owner: AccountId, spender: AccountId, id: TokenId) -> Amount;

    fn is_blanket_approved(&self, owner: AccountId, spender: AccountId) -> bool;

    /// Handle of the shadow token for `id`, or `None` before registration.
    fn shadow_token_of(&self, id: TokenId) -> Option<ShadowHandle>;

    /// Balance held on the shadow token addressed by `handle`. Unknown
    /// handles read as zero.
    fn shadow_balance_of(&self, handle: ShadowHandle, account: AccountId) -> Amount;
}
