//! The invariant sweep: cross-cutting checks over the whole observed
//! universe, independent of which policy produced the state.
//!
//! Five properties are swept, in order: conservation inside the mirror
//! (supply equals the balance sum, per id), supply agreement between SUT
//! and mirror, balance agreement per (account, id), handle agreement per
//! registered id, and shadow balance agreement per (account, registered
//! id). Registration permanence is not swept directly: the mirror keeps
//! the first handle it ever saw, so a SUT that lets a handle change
//! surfaces as a handle mismatch here.
//!
//! The sweep reads both sides and mutates neither, so it is safe to call
//! at any cadence, from every step to run boundaries only.

use ledger_abi::{AccountId, Amount, DualLedger, ShadowHandle, TokenId};
use thiserror::Error;

use crate::universe::LedgerWorld;

/// First violated property found by a sweep. Fatal to the run: the SUT and
/// the model disagree, or the model itself lost conservation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("conservation broken for {id}: recorded supply {supply}, balances sum to {sum}")]
    SupplyConservation {
        id: TokenId,
        supply: Amount,
        sum: Amount,
    },

    #[error("balance of {account} on {id} diverged: SUT {sut}, mirror {mirror}")]
    BalanceMismatch {
        account: AccountId,
        id: TokenId,
        sut: Amount,
        mirror: Amount,
    },

    #[error("total supply of {id} diverged: SUT {sut}, mirror {mirror}")]
    SupplyMismatch {
        id: TokenId,
        sut: Amount,
        mirror: Amount,
    },

    #[error("shadow balance of {account} on {id} diverged: SUT {sut}, mirror {mirror}")]
    ShadowBalanceMismatch {
        account: AccountId,
        id: TokenId,
        sut: Amount,
        mirror: Amount,
    },

    #[error("shadow handle of {id} diverged: SUT {sut:?}, mirror {mirror}")]
    ShadowHandleMismatch {
        id: TokenId,
        sut: Option<ShadowHandle>,
        mirror: ShadowHandle,
    },
}

/// Sweep the full known-account × known-id cross product, plus the
/// registered-id set, and return the first disagreement.
pub fn check_invariants<S: DualLedger>(world: &LedgerWorld<S>) -> Result<(), InvariantViolation> {
    let mirror = world.mirror();

    for &id in mirror.known_token_ids() {
        // Conservation within the mirror itself.
        let supply = mirror.total_supply(id);
        let sum = mirror.balance_sum(id);
        if supply != sum {
            return Err(InvariantViolation::SupplyConservation { id, supply, sum });
        }

        let sut_supply = world.sut.total_supply(id);
        if sut_supply != supply {
            return Err(InvariantViolation::SupplyMismatch {
                id,
                sut: sut_supply,
                mirror: supply,
            });
        }

        for &account in mirror.known_accounts() {
            let sut = world.sut.balance_of(account, id);
            let mirrored = mirror.balance(account, id);
            if sut != mirrored {
                return Err(InvariantViolation::BalanceMismatch {
                    account,
                    id,
                    sut,
                    mirror: mirrored,
                });
            }
        }
    }

    for &id in mirror.known_registered_ids() {
        // Roster entries always carry a handle.
        let Some(mirror_handle) = mirror.shadow_token(id) else {
            continue;
        };

        // Handle agreement first: shadow balances are addressed through the
        // handle, so reading them through a wrong one proves nothing.
        let sut_handle = world.sut.shadow_token_of(id);
        if sut_handle != Some(mirror_handle) {
            return Err(InvariantViolation::ShadowHandleMismatch {
                id,
                sut: sut_handle,
                mirror: mirror_handle,
            });
        }

        for &account in mirror.known_accounts() {
            let sut = world.sut.shadow_balance_of(mirror_handle, account);
            let mirrored = mirror.shadow_balance(account, id);
            if sut != mirrored {
                return Err(InvariantViolation::ShadowBalanceMismatch {
                    account,
                    id,
                    sut,
                    mirror: mirrored,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::testkit::{funded_world, funded_world_with, register_both};
    use crate::universe::LedgerWorld;
    use alembic_ledger::faults::ShadowShortfallLedger;
    use alembic_ledger::MemoryLedger;

    #[test]
    fn empty_world_passes() {
        let w = LedgerWorld::new(MemoryLedger::new());
        check_invariants(&w).unwrap();
    }

    #[test]
    fn aligned_world_passes() {
        let (w, _, _, _) = funded_world();
        check_invariants(&w).unwrap();
    }

    #[test]
    fn broken_conservation_in_the_mirror_is_found_first() {
        let (mut w, u1, _, t1) = funded_world();
        // Burn in the mirror only: balance drops, supply stays.
        w.mirror_mut()
            .record_transfer(u1, ledger_abi::AccountId::ZERO, t1, 100);
        assert!(matches!(
            check_invariants(&w),
            Err(InvariantViolation::SupplyConservation {
                supply: 1_500,
                sum: 1_400,
                ..
            })
        ));
    }

    #[test]
    fn sut_only_transfer_shows_up_as_balance_mismatch() {
        let (mut w, u1, u2, t1) = funded_world();
        w.sut.transfer(u1, u1, u2, t1, 100, &[]).unwrap();
        assert!(matches!(
            check_invariants(&w),
            Err(InvariantViolation::BalanceMismatch {
                sut: 900,
                mirror: 1_000,
                ..
            })
        ));
    }

    #[test]
    fn handle_disagreement_is_reported_before_shadow_balances() {
        let (mut w, u1, _, t1) = funded_world();
        let real = w.sut.register_shadow_token(u1, t1).unwrap();
        let mut forged = *real.as_bytes();
        forged[0] ^= 0xff;
        w.mirror_mut()
            .record_shadow_registration(t1, ShadowHandle(forged));
        assert!(matches!(
            check_invariants(&w),
            Err(InvariantViolation::ShadowHandleMismatch { .. })
        ));
    }

    #[test]
    fn short_credited_shadow_balance_is_found() {
        let (mut w, u1, _, t1) = funded_world_with(ShadowShortfallLedger::new());
        register_both(&mut w, u1, t1);
        w.sut.transmute_to_shadow(u1, u1, t1, 400).unwrap();
        w.mirror_mut().record_transmute_to_shadow(u1, t1, 400);
        assert!(matches!(
            check_invariants(&w),
            Err(InvariantViolation::ShadowBalanceMismatch {
                sut: 399,
                mirror: 400,
                ..
            })
        ));
    }
}
