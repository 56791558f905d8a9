//! Call first, prove afterward.
//!
//! Strict invokes the SUT on whatever the draw produced, tolerates a
//! refusal (the SUT rolled back, the mirror never moved, nothing to check),
//! and treats success as a claim to be audited: the preconditions that
//! would have justified the call must have held, and the post-call state
//! must match the arithmetic the mirror is about to apply. Either audit
//! failing is fatal.
//!
//! Where the post-state depends on the approval path, the expectation is
//! computed path-aware: the single-id allowance must have dropped by the
//! amount on the allowance path and must be untouched on the owner and
//! blanket paths.

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
pub struct StrictPolicy;

impl StrictPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl<S: DualLedger> LedgerTestPolicy<S> for StrictPolicy {
    fn name(&self) -> &'static str {
        "strict"
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
        if let Err(e) = world
            .sut
            .transfer(d.caller, d.from, d.to, d.id, d.amount, &[])
        {
            log::trace!("transfer refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
        if let Some(reason) = transfer_violation(&view, &d) {
            return Err(HarnessError::PreconditionUnmet {
                op: "transfer",
                reason,
                draw: d.to_string(),
            });
        }
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
        // Pre-state evaluation has to happen before the call either way.
        let eval = evaluate_batch_transfer(&world.sut, &d);
        if let Err(e) = world
            .sut
            .batch_transfer(d.caller, d.from, d.to, &d.ids, &d.amounts, &[])
        {
            log::trace!("batch transfer refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
        let expect = eval.map_err(|reason| HarnessError::PreconditionUnmet {
            op: "batch_transfer",
            reason,
            draw: d.to_string(),
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
        if let Err(e) = world
            .sut
            .set_blanket_approval(d.owner, d.operator, d.approved)
        {
            log::trace!("blanket approval refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
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
        if let Err(e) = world.sut.set_allowance(d.owner, d.spender, d.id, d.amount) {
            log::trace!("allowance set refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
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
        if let Err(e) = world
            .sut
            .increase_allowance(d.owner, d.spender, d.id, d.amount)
        {
            log::trace!("allowance increase refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
        if let Some(reason) = allowance_violation(AllowanceAction::Increase, current, d.amount) {
            return Err(HarnessError::PreconditionUnmet {
                op: "increase_allowance",
                reason,
                draw: d.to_string(),
            });
        }
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
        if let Err(e) = world
            .sut
            .decrease_allowance(d.owner, d.spender, d.id, d.amount)
        {
            log::trace!("allowance decrease refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
        if let Some(reason) = allowance_violation(AllowanceAction::Decrease, current, d.amount) {
            return Err(HarnessError::PreconditionUnmet {
                op: "decrease_allowance",
                reason,
                draw: d.to_string(),
            });
        }
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
        let eval = evaluate_allowance_batch(&world.sut, &d, AllowanceAction::Set);
        if let Err(e) = world
            .sut
            .set_allowance_batch(d.owner, d.spender, &d.ids, &d.amounts)
        {
            log::trace!("allowance set batch refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
        let want = eval.map_err(|reason| HarnessError::PreconditionUnmet {
            op: "set_allowance_batch",
            reason,
            draw: d.to_string(),
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
        let eval = evaluate_allowance_batch(&world.sut, &d, AllowanceAction::Increase);
        if let Err(e) = world
            .sut
            .increase_allowance_batch(d.owner, d.spender, &d.ids, &d.amounts)
        {
            log::trace!("allowance increase batch refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
        let want = eval.map_err(|reason| HarnessError::PreconditionUnmet {
            op: "increase_allowance_batch",
            reason,
            draw: d.to_string(),
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
        let eval = evaluate_allowance_batch(&world.sut, &d, AllowanceAction::Decrease);
        if let Err(e) = world
            .sut
            .decrease_allowance_batch(d.owner, d.spender, &d.ids, &d.amounts)
        {
            log::trace!("allowance decrease batch refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
        let want = eval.map_err(|reason| HarnessError::PreconditionUnmet {
            op: "decrease_allowance_batch",
            reason,
            draw: d.to_string(),
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
        let handle = match world.sut.register_shadow_token(d.caller, d.id) {
            Ok(handle) => handle,
            Err(e) => {
                log::trace!("registration refused: {e} ({d})");
                return Ok(StepOutcome::SutRefused(e));
            }
        };
        if let Some(reason) = register_violation(&view) {
            return Err(HarnessError::PreconditionUnmet {
                op: "register_shadow_token",
                reason,
                draw: d.to_string(),
            });
        }
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
        if let Err(e) = world
            .sut
            .transmute_to_shadow(d.caller, d.owner, d.id, d.amount)
        {
            log::trace!("transmute to shadow refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
        if let Some(reason) = transmute_to_violation(&view, &d) {
            return Err(HarnessError::PreconditionUnmet {
                op: "transmute_to_shadow",
                reason,
                draw: d.to_string(),
            });
        }
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
        if let Err(e) = world.sut.transmute_from_shadow(d.caller, d.id, d.amount) {
            log::trace!("transmute from shadow refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
        if let Some(reason) = transmute_from_violation(&view, &d) {
            return Err(HarnessError::PreconditionUnmet {
                op: "transmute_from_shadow",
                reason,
                draw: d.to_string(),
            });
        }
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
        let eval = evaluate_batch_transmute(&world.sut, &d, true);
        if let Err(e) = world
            .sut
            .batch_transmute_to_shadow(d.caller, d.owner, &d.ids, &d.amounts)
        {
            log::trace!("batch transmute to shadow refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
        let expect = eval.map_err(|reason| HarnessError::PreconditionUnmet {
            op: "batch_transmute_to_shadow",
            reason,
            draw: d.to_string(),
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
        let eval = evaluate_batch_transmute(&world.sut, &d, false);
        if let Err(e) = world
            .sut
            .batch_transmute_from_shadow(d.caller, &d.ids, &d.amounts)
        {
            log::trace!("batch transmute from shadow refused: {e} ({d})");
            return Ok(StepOutcome::SutRefused(e));
        }
        let expect = eval.map_err(|reason| HarnessError::PreconditionUnmet {
            op: "batch_transmute_from_shadow",
            reason,
            draw: d.to_string(),
        })?;
        check_batch_transmute_post(&world.sut, &d, &expect, "batch_transmute_from_shadow")?;
        world
            .mirror_mut()
            .record_batch_transmute_from_shadow(d.owner, &d.ids, &d.amounts);
        Ok(StepOutcome::Executed)
    }
}
