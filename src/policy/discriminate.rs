//! Screen first, then call.
//!
//! Discriminate evaluates the same predicates Strict asserts, but as
//! early-return guards: a draw that fails one is rejected without touching
//! the SUT or the mirror. Everything that does reach the SUT is known
//! valid, so a refusal there is itself a failure, and the post-call audit
//! runs unconditionally. Rejections are frequent and normal; they buy a
//! valid-input density no other policy has, at the price of never
//! exercising the SUT's own refusal paths.

use ledger_abi::DualLedger;

use crate::universe::LedgerWorld;

use super::{
    allowance_violation, check_allowance_batch_post, check_allowance_post,
    check_batch_transfer_post, check_batch_transmute_post, check_blanket_post,
    check_register_post, check_transfer_post, check_transmute_post, draw_allowance,
    draw_allowance_batch, draw_batch_transfer, draw_batch_transmute_from,
    draw_batch_transmute_to, draw_blanket, draw_register, draw_transfer, draw_transmute_from,
    draw_transmute_to, evaluate_allowance_batch, evaluate_batch_transfer,
    evaluate_batch_transmute, expect_allowance, expect_transfer, expect_transmute_from,
    expect_transmute_to, observe_register, observe_transfer, observe_transmute,
    register_violation, transfer_violation, transmute_from_violation, transmute_to_violation,
    AllowanceAction, HarnessError, LedgerTestPolicy, StepOutcome, StepResult,
};

#[derive(Debug, Default)]
pub struct DiscriminatePolicy;

impl DiscriminatePolicy {
    pub fn new() -> Self {
        Self
    }
}

impl<S: DualLedger> LedgerTestPolicy<S> for DiscriminatePolicy {
    fn name(&self) -> &'static str {
        "discriminate"
    }

    fn transfer(
        &mut self,
        world: &mut LedgerWorld<S>,
        caller_seed: u64,
        from_seed: u64,
        to_seed: u64,
        id_seed: u64,
        amount_seed: u128,
    ) -> StepResult {
        let d = draw_transfer(world, caller_seed, from_seed, to_seed, id_seed, amount_seed)?;
        let view = observe_transfer(&world.sut, &d);
        if let Some(reason) = transfer_violation(&view, &d) {
            log::debug!("transfer rejected: {reason} ({d})");
            return Ok(StepOutcome::Rejected(reason));
        }
        world
            .sut
            .transfer(d.caller, d.from, d.to, d.id, d.amount, &[])
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "transfer",
                source,
            })?;
        let expect = expect_transfer(&view, &d);
        check_transfer_post(&world.sut, &d, &expect, "transfer")?;
        world
            .mirror_mut()
            .apply_authorized_transfer(d.caller, d.from, d.to, d.id, d.amount);
        Ok(StepOutcome::Executed)
    }

    fn batch_transfer(
        &mut self,
        world: &mut LedgerWorld<S>,
        caller_seed: u64,
        from_seed: u64,
        to_seed: u64,
        id_seeds: &[u64],
        amount_seeds: &[u128],
    ) -> StepResult {
        let d = draw_batch_transfer(world, caller_seed, from_seed, to_seed, id_seeds, amount_seeds)?;
        let expect = match evaluate_batch_transfer(&world.sut, &d) {
            Ok(expect) => expect,
            Err(reason) => {
                log::debug!("batch transfer rejected: {reason} ({d})");
                return Ok(StepOutcome::Rejected(reason));
            }
        };
        world
            .sut
            .batch_transfer(d.caller, d.from, d.to, &d.ids, &d.amounts, &[])
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "batch_transfer",
                source,
            })?;
        check_batch_transfer_post(&world.sut, &d, &expect, "batch_transfer")?;
        world
            .mirror_mut()
            .apply_authorized_batch_transfer(d.caller, d.from, d.to, &d.ids, &d.amounts);
        Ok(StepOutcome::Executed)
    }

    fn set_blanket_approval(
        &mut self,
        world: &mut LedgerWorld<S>,
        owner_seed: u64,
        operator_seed: u64,
        approved: bool,
    ) -> StepResult {
        let d = draw_blanket(world, owner_seed, operator_seed, approved)?;
        world
            .sut
            .set_blanket_approval(d.owner, d.operator, d.approved)
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "set_blanket_approval",
                source,
            })?;
        check_blanket_post(&world.sut, &d, "set_blanket_approval")?;
        world
            .mirror_mut()
            .record_blanket_approval(d.owner, d.operator, d.approved);
        Ok(StepOutcome::Executed)
    }

    fn set_allowance(
        &mut self,
        world: &mut LedgerWorld<S>,
        owner_seed: u64,
        spender_seed: u64,
        id_seed: u64,
        amount_seed: u128,
    ) -> StepResult {
        let d = draw_allowance(world, owner_seed, spender_seed, id_seed, amount_seed)?;
        world
            .sut
            .set_allowance(d.owner, d.spender, d.id, d.amount)
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "set_allowance",
                source,
            })?;
        check_allowance_post(&world.sut, &d, d.amount, "set_allowance")?;
        world
            .mirror_mut()
            .record_allowance_set(d.owner, d.spender, d.id, d.amount);
        Ok(StepOutcome::Executed)
    }

    fn increase_allowance(
        &mut self,
        world: &mut LedgerWorld<S>,
        owner_seed: u64,
        spender_seed: u64,
        id_seed: u64,
        delta_seed: u128,
    ) -> StepResult {
        let d = draw_allowance(world, owner_seed, spender_seed, id_seed, delta_seed)?;
        let current = world.sut.allowance(d.owner, d.spender, d.id);
        if let Some(reason) = allowance_violation(AllowanceAction::Increase, current, d.amount) {
            log::debug!("allowance increase rejected: {reason} ({d})");
            return Ok(StepOutcome::Rejected(reason));
        }
        world
            .sut
            .increase_allowance(d.owner, d.spender, d.id, d.amount)
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "increase_allowance",
                source,
            })?;
        let want = expect_allowance(AllowanceAction::Increase, current, d.amount);
        check_allowance_post(&world.sut, &d, want, "increase_allowance")?;
        world
            .mirror_mut()
            .record_allowance_increase(d.owner, d.spender, d.id, d.amount);
        Ok(StepOutcome::Executed)
    }

    fn decrease_allowance(
        &mut self,
        world: &mut LedgerWorld<S>,
        owner_seed: u64,
        spender_seed: u64,
        id_seed: u64,
        delta_seed: u128,
    ) -> StepResult {
        let d = draw_allowance(world, owner_seed, spender_seed, id_seed, delta_seed)?;
        let current = world.sut.allowance(d.owner, d.spender, d.id);
        if let Some(reason) = allowance_violation(AllowanceAction::Decrease, current, d.amount) {
            log::debug!("allowance decrease rejected: {reason} ({d})");
            return Ok(StepOutcome::Rejected(reason));
        }
        world
            .sut
            .decrease_allowance(d.owner, d.spender, d.id, d.amount)
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "decrease_allowance",
                source,
            })?;
        let want = expect_allowance(AllowanceAction::Decrease, current, d.amount);
        check_allowance_post(&world.sut, &d, want, "decrease_allowance")?;
        world
            .mirror_mut()
            .record_allowance_decrease(d.owner, d.spender, d.id, d.amount);
        Ok(StepOutcome::Executed)
    }

    fn set_allowance_batch(
        &mut self,
        world: &mut LedgerWorld<S>,
        owner_seed: u64,
        spender_seed: u64,
        id_seeds: &[u64],
        amount_seeds: &[u128],
    ) -> StepResult {
        let d = draw_allowance_batch(world, owner_seed, spender_seed, id_seeds, amount_seeds)?;
        let want = match evaluate_allowance_batch(&world.sut, &d, AllowanceAction::Set) {
            Ok(want) => want,
            Err(reason) => {
                log::debug!("allowance set batch rejected: {reason} ({d})");
                return Ok(StepOutcome::Rejected(reason));
            }
        };
        world
            .sut
            .set_allowance_batch(d.owner, d.spender, &d.ids, &d.amounts)
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "set_allowance_batch",
                source,
            })?;
        check_allowance_batch_post(&world.sut, &d, &want, "set_allowance_batch")?;
        world
            .mirror_mut()
            .record_allowance_set_batch(d.owner, d.spender, &d.ids, &d.amounts);
        Ok(StepOutcome::Executed)
    }

    fn increase_allowance_batch(
        &mut self,
        world: &mut LedgerWorld<S>,
        owner_seed: u64,
        spender_seed: u64,
        id_seeds: &[u64],
        delta_seeds: &[u128],
    ) -> StepResult {
        let d = draw_allowance_batch(world, owner_seed, spender_seed, id_seeds, delta_seeds)?;
        let want = match evaluate_allowance_batch(&world.sut, &d, AllowanceAction::Increase) {
            Ok(want) => want,
            Err(reason) => {
                log::debug!("allowance increase batch rejected: {reason} ({d})");
                return Ok(StepOutcome::Rejected(reason));
            }
        };
        world
            .sut
            .increase_allowance_batch(d.owner, d.spender, &d.ids, &d.amounts)
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "increase_allowance_batch",
                source,
            })?;
        check_allowance_batch_post(&world.sut, &d, &want, "increase_allowance_batch")?;
        world
            .mirror_mut()
            .record_allowance_increase_batch(d.owner, d.spender, &d.ids, &d.amounts);
        Ok(StepOutcome::Executed)
    }

    fn decrease_allowance_batch(
        &mut self,
        world: &mut LedgerWorld<S>,
        owner_seed: u64,
        spender_seed: u64,
        id_seeds: &[u64],
        delta_seeds: &[u128],
    ) -> StepResult {
        let d = draw_allowance_batch(world, owner_seed, spender_seed, id_seeds, delta_seeds)?;
        let want = match evaluate_allowance_batch(&world.sut, &d, AllowanceAction::Decrease) {
            Ok(want) => want,
            Err(reason) => {
                log::debug!("allowance decrease batch rejected: {reason} ({d})");
                return Ok(StepOutcome::Rejected(reason));
            }
        };
        world
            .sut
            .decrease_allowance_batch(d.owner, d.spender, &d.ids, &d.amounts)
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "decrease_allowance_batch",
                source,
            })?;
        check_allowance_batch_post(&world.sut, &d, &want, "decrease_allowance_batch")?;
        world
            .mirror_mut()
            .record_allowance_decrease_batch(d.owner, d.spender, &d.ids, &d.amounts);
        Ok(StepOutcome::Executed)
    }

    fn register_shadow_token(
        &mut self,
        world: &mut LedgerWorld<S>,
        caller_seed: u64,
        id_seed: u64,
    ) -> StepResult {
        let d = draw_register(world, caller_seed, id_seed)?;
        let view = observe_register(&world.sut, &d);
        if let Some(reason) = register_violation(&view) {
            log::debug!("registration rejected: {reason} ({d})");
            return Ok(StepOutcome::Rejected(reason));
        }
        let handle = world
            .sut
            .register_shadow_token(d.caller, d.id)
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "register_shadow_token",
                source,
            })?;
        check_register_post(&world.sut, &d, handle, "register_shadow_token")?;
        world.mirror_mut().record_shadow_registration(d.id, handle);
        Ok(StepOutcome::Executed)
    }

    fn transmute_to_shadow(
        &mut self,
        world: &mut LedgerWorld<S>,
        caller_seed: u64,
        owner_seed: u64,
        id_seed: u64,
        amount_seed: u128,
    ) -> StepResult {
        let d = draw_transmute_to(world, caller_seed, owner_seed, id_seed, amount_seed)?;
        let view = observe_transmute(&world.sut, &d);
        if let Some(reason) = transmute_to_violation(&view, &d) {
            log::debug!("transmute to shadow rejected: {reason} ({d})");
            return Ok(StepOutcome::Rejected(reason));
        }
        world
            .sut
            .transmute_to_shadow(d.caller, d.owner, d.id, d.amount)
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "transmute_to_shadow",
                source,
            })?;
        let expect = expect_transmute_to(&view, &d);
        check_transmute_post(&world.sut, &d, &expect, "transmute_to_shadow")?;
        world
            .mirror_mut()
            .apply_authorized_transmute_to_shadow(d.caller, d.owner, d.id, d.amount);
        Ok(StepOutcome::Executed)
    }

    fn transmute_from_shadow(
        &mut self,
        world: &mut LedgerWorld<S>,
        caller_seed: u64,
        id_seed: u64,
        amount_seed: u128,
    ) -> StepResult {
        let d = draw_transmute_from(world, caller_seed, id_seed, amount_seed)?;
        let view = observe_transmute(&world.sut, &d);
        if let Some(reason) = transmute_from_violation(&view, &d) {
            log::debug!("transmute from shadow rejected: {reason} ({d})");
            return Ok(StepOutcome::Rejected(reason));
        }
        world
            .sut
            .transmute_from_shadow(d.caller, d.id, d.amount)
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "transmute_from_shadow",
                source,
            })?;
        let expect = expect_transmute_from(&view, &d);
        check_transmute_post(&world.sut, &d, &expect, "transmute_from_shadow")?;
        world
            .mirror_mut()
            .record_transmute_from_shadow(d.owner, d.id, d.amount);
        Ok(StepOutcome::Executed)
    }

    fn batch_transmute_to_shadow(
        &mut self,
        world: &mut LedgerWorld<S>,
        caller_seed: u64,
        owner_seed: u64,
        id_seeds: &[u64],
        amount_seeds: &[u128],
    ) -> StepResult {
        let d = draw_batch_transmute_to(world, caller_seed, owner_seed, id_seeds, amount_seeds)?;
        let expect = match evaluate_batch_transmute(&world.sut, &d, true) {
            Ok(expect) => expect,
            Err(reason) => {
                log::debug!("batch transmute to shadow rejected: {reason} ({d})");
                return Ok(StepOutcome::Rejected(reason));
            }
        };
        world
            .sut
            .batch_transmute_to_shadow(d.caller, d.owner, &d.ids, &d.amounts)
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "batch_transmute_to_shadow",
                source,
            })?;
        check_batch_transmute_post(&world.sut, &d, &expect, "batch_transmute_to_shadow")?;
        world
            .mirror_mut()
            .apply_authorized_batch_transmute_to_shadow(d.caller, d.owner, &d.ids, &d.amounts);
        Ok(StepOutcome::Executed)
    }

    fn batch_transmute_from_shadow(
        &mut self,
        world: &mut LedgerWorld<S>,
        caller_seed: u64,
        id_seeds: &[u64],
        amount_seeds: &[u128],
    ) -> StepResult {
        let d = draw_batch_transmute_from(world, caller_seed, id_seeds, amount_seeds)?;
        let expect = match evaluate_batch_transmute(&world.sut, &d, false) {
            Ok(expect) => expect,
            Err(reason) => {
                log::debug!("batch transmute from shadow rejected: {reason} ({d})");
                return Ok(StepOutcome::Rejected(reason));
            }
        };
        world
            .sut
            .batch_transmute_from_shadow(d.caller, &d.ids, &d.amounts)
            .map_err(|source| HarnessError::ScreenedCallRefused {
                op: "batch_transmute_from_shadow",
                source,
            })?;
        check_batch_transmute_post(&world.sut, &d, &expect, "batch_transmute_from_shadow")?;
        world
            .mirror_mut()
            .record_batch_transmute_from_shadow(d.owner, &d.ids, &d.amounts);
        Ok(StepOutcome::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::{funded_world, funded_world_with, T1, U1, U2};
    use super::super::RejectReason;
    use super::*;
    use crate::invariants::check_invariants;
    use alembic_ledger::faults::StickyAllowanceLedger;
    use alembic_ledger::MemoryLedger;
    use ledger_abi::{AccountId, TokenId};
    use mirror_model::ArithmeticMode;

    #[test]
    fn valid_transfer_executes_and_reconciles() {
        let (mut w, u1, u2, t1) = funded_world();
        let mut p = DiscriminatePolicy::new();

        let outcome = p.transfer(&mut w, U1, U1, U2, T1, 100).unwrap();
        assert_eq!(outcome, StepOutcome::Executed);
        assert_eq!(w.sut.balance_of(u1, t1), 900);
        assert_eq!(w.mirror().balance(u2, t1), 600);
        check_invariants(&w).unwrap();
    }

    #[test]
    fn overdraw_is_screened_before_the_call() {
        let (mut w, _, u2, t1) = funded_world();
        let mut p = DiscriminatePolicy::new();

        let outcome = p.transfer(&mut w, U2, U2, U1, T1, 600).unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Rejected(RejectReason::InsufficientBalance)
        );
        assert_eq!(w.sut.balance_of(u2, t1), 500);
        assert_eq!(w.mirror().balance(u2, t1), 500);
        check_invariants(&w).unwrap();
    }

    #[test]
    fn length_mismatch_never_reaches_the_sut() {
        let (mut w, u1, _, t1) = funded_world();
        let mut p = DiscriminatePolicy::new();

        let outcome = p
            .batch_transfer(&mut w, U1, U1, U2, &[T1, T1], &[100])
            .unwrap();
        assert_eq!(outcome, StepOutcome::Rejected(RejectReason::LengthMismatch));
        assert_eq!(w.sut.balance_of(u1, t1), 1_000);
        check_invariants(&w).unwrap();
    }

    #[test]
    fn registration_lifecycle_screens_both_edges() {
        let (mut w, _, _, t1) = funded_world();
        let mut p = DiscriminatePolicy::new();

        // 777 creates a fresh id with zero supply.
        assert_eq!(
            p.register_shadow_token(&mut w, U1, 777).unwrap(),
            StepOutcome::Rejected(RejectReason::ZeroSupply)
        );

        assert_eq!(
            p.register_shadow_token(&mut w, U1, T1).unwrap(),
            StepOutcome::Executed
        );
        let handle = w.mirror().shadow_token(t1).unwrap();
        assert_eq!(w.known_registered_ids(), &[t1]);

        assert_eq!(
            p.register_shadow_token(&mut w, U2, T1).unwrap(),
            StepOutcome::Rejected(RejectReason::AlreadyRegistered)
        );
        assert_eq!(w.mirror().shadow_token(t1), Some(handle));
        check_invariants(&w).unwrap();
    }

    #[test]
    fn guards_hold_even_under_panicking_mirror_arithmetic() {
        let mut w = crate::universe::LedgerWorld::with_arithmetic(
            MemoryLedger::new(),
            ArithmeticMode::Panicking,
        );
        let (u1, u2, t1) = (AccountId([1; 32]), AccountId([2; 32]), TokenId([9; 32]));
        w.sut.mint(u1, t1, 1_000, &[]).unwrap();
        w.sut.mint(u2, t1, 500, &[]).unwrap();
        let m = w.mirror_mut();
        m.note_account(u1);
        m.note_account(u2);
        m.note_token_id(t1);
        m.record_initial_mint(u1, t1, 1_000);
        m.record_initial_mint(u2, t1, 500);

        let mut p = DiscriminatePolicy::new();
        // Overdraw and allowance underflow both screen out before any
        // mirror subtraction could panic.
        assert_eq!(
            p.transfer(&mut w, U2, U2, U1, T1, 600).unwrap(),
            StepOutcome::Rejected(RejectReason::InsufficientBalance)
        );
        assert_eq!(
            p.decrease_allowance(&mut w, U1, U2, T1, 1).unwrap(),
            StepOutcome::Rejected(RejectReason::AllowanceUnderflow)
        );
        check_invariants(&w).unwrap();
    }

    #[test]
    fn sticky_allowance_is_caught_by_the_post_audit() {
        let (mut w, _, _, _) = funded_world_with(StickyAllowanceLedger::new());
        let mut p = DiscriminatePolicy::new();

        assert_eq!(
            p.set_allowance(&mut w, U1, U2, T1, 300).unwrap(),
            StepOutcome::Executed
        );
        let err = p.transfer(&mut w, U2, U1, U2, T1, 200).unwrap_err();
        assert!(matches!(
            err,
            HarnessError::PostconditionFailed { op: "transfer", .. }
        ));
    }
}
