//! Fire-and-record: invoke the SUT, ignore its verdict, update the mirror
//! as if the call succeeded.
//!
//! This is intentionally unsound. A refused call leaves the SUT where it
//! was while the mirror moves on, and the resulting divergence is exactly
//! what the next invariant sweep exists to surface. The payoff is breadth:
//! every call shape reaches the SUT, including ones no validating policy
//! would let through. Run it with draws that are valid by construction when
//! a clean sweep is the expectation.

use ledger_abi::DualLedger;

use crate::universe::LedgerWorld;

use super::{
    draw_allowance, draw_allowance_batch, draw_batch_transfer, draw_batch_transmute_from,
    draw_batch_transmute_to, draw_blanket, draw_register, draw_transfer, draw_transmute_from,
    draw_transmute_to, LedgerTestPolicy, StepOutcome, StepResult,
};

#[derive(Debug, Default)]
pub struct LoosePolicy;

impl LoosePolicy {
    pub fn new() -> Self {
        Self
    }
}

impl<S: DualLedger> LedgerTestPolicy<S> for LoosePolicy {
    fn name(&self) -> &'static str {
        "loose"
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
        let _ = world
            .sut
            .transfer(d.caller, d.from, d.to, d.id, d.amount, &[]);
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
        let _ = world
            .sut
            .batch_transfer(d.caller, d.from, d.to, &d.ids, &d.amounts, &[]);
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
        let _ = world
            .sut
            .set_blanket_approval(d.owner, d.operator, d.approved);
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
        let _ = world.sut.set_allowance(d.owner, d.spender, d.id, d.amount);
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
        let _ = world
            .sut
            .increase_allowance(d.owner, d.spender, d.id, d.amount);
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
        let _ = world
            .sut
            .decrease_allowance(d.owner, d.spender, d.id, d.amount);
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
        let _ = world
            .sut
            .set_allowance_batch(d.owner, d.spender, &d.ids, &d.amounts);
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
        let _ = world
            .sut
            .increase_allowance_batch(d.owner, d.spender, &d.ids, &d.amounts);
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
        let _ = world
            .sut
            .decrease_allowance_batch(d.owner, d.spender, &d.ids, &d.amounts);
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
        // The one verdict Loose cannot ignore: a refusal yields no handle,
        // so there is nothing to record.
        if let Ok(handle) = world.sut.register_shadow_token(d.caller, d.id) {
            world.mirror_mut().record_shadow_registration(d.id, handle);
        }
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
        let _ = world
            .sut
            .transmute_to_shadow(d.caller, d.owner, d.id, d.amount);
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
        let _ = world.sut.transmute_from_shadow(d.caller, d.id, d.amount);
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
        let _ = world
            .sut
            .batch_transmute_to_shadow(d.caller, d.owner, &d.ids, &d.amounts);
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
        let _ = world
            .sut
            .batch_transmute_from_shadow(d.caller, &d.ids, &d.amounts);
        world
            .mirror_mut()
            .record_batch_transmute_from_shadow(d.owner, &d.ids, &d.amounts);
        Ok(StepOutcome::Executed)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::{funded_world, register_both, T1, U1, U2};
    use super::*;
    use crate::invariants::check_invariants;

    #[test]
    fn valid_transfer_keeps_both_sides_aligned() {
        let (mut w, u1, u2, t1) = funded_world();
        let mut p = LoosePolicy::new();

        let outcome = p.transfer(&mut w, U1, U1, U2, T1, 100).unwrap();
        assert_eq!(outcome, StepOutcome::Executed);
        assert_eq!(w.sut.balance_of(u1, t1), 900);
        assert_eq!(w.sut.balance_of(u2, t1), 600);
        assert_eq!(w.mirror().balance(u1, t1), 900);
        assert_eq!(w.mirror().balance(u2, t1), 600);
        check_invariants(&w).unwrap();
    }

    #[test]
    fn refused_call_still_updates_the_mirror() {
        let (mut w, _, u2, t1) = funded_world();
        let mut p = LoosePolicy::new();

        // 600 exceeds the second account's 500: the SUT refuses, the mirror
        // saturates to zero anyway.
        let outcome = p.transfer(&mut w, U2, U2, U1, T1, 600).unwrap();
        assert_eq!(outcome, StepOutcome::Executed);
        assert_eq!(w.sut.balance_of(u2, t1), 500);
        assert_eq!(w.mirror().balance(u2, t1), 0);

        // The divergence is the sweep's to find.
        assert!(check_invariants(&w).is_err());
    }

    #[test]
    fn unauthorized_transfer_diverges_until_the_sweep() {
        let (mut w, u1, _, t1) = funded_world();
        let mut p = LoosePolicy::new();

        // Second account moves the first's balance with no approval at all.
        // The SUT refuses; the mirror books the transfer and burns the
        // (zero) allowance without looking.
        let outcome = p.transfer(&mut w, U2, U1, U2, T1, 200).unwrap();
        assert_eq!(outcome, StepOutcome::Executed);
        assert_eq!(w.sut.balance_of(u1, t1), 1_000);
        assert_eq!(w.mirror().balance(u1, t1), 800);
        assert!(check_invariants(&w).is_err());
    }

    #[test]
    fn refused_registration_records_no_handle() {
        let (mut w, _, _, _) = funded_world();
        let mut p = LoosePolicy::new();

        // 777 takes the create path: a fresh id with zero supply, which the
        // SUT refuses to register.
        let outcome = p.register_shadow_token(&mut w, U1, 777).unwrap();
        assert_eq!(outcome, StepOutcome::Executed);
        assert!(w.known_registered_ids().is_empty());
        assert_eq!(w.known_token_ids().len(), 2);
        check_invariants(&w).unwrap();
    }

    #[test]
    fn transmute_round_trip_stays_aligned() {
        let (mut w, u1, _, t1) = funded_world();
        let mut p = LoosePolicy::new();
        register_both(&mut w, u1, t1);

        p.transmute_to_shadow(&mut w, U1, U1, T1, 400).unwrap();
        assert_eq!(w.sut.balance_of(u1, t1), 600);
        assert_eq!(w.sut.total_supply(t1), 1_100);
        check_invariants(&w).unwrap();

        p.transmute_from_shadow(&mut w, U1, T1, 400).unwrap();
        assert_eq!(w.sut.balance_of(u1, t1), 1_000);
        assert_eq!(w.sut.total_supply(t1), 1_500);
        assert_eq!(w.mirror().shadow_balance(u1, t1), 0);
        check_invariants(&w).unwrap();
    }
}
