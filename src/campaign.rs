//! The outer fuzz loop: independent runs of weighted, seed-driven
//! operation sequences against a fresh (SUT, mirror) pair, with invariant
//! sweeps at a configurable cadence and always at run end.
//!
//! Runs are fully deterministic: run `i` of a campaign seeded `s` draws
//! every seed from an xorshift generator seeded `s + i`, so any failure
//! report names the exact run seed that reproduces it.

use std::collections::BTreeMap;
use std::fmt;

use ledger_abi::DualLedger;
use mirror_model::ArithmeticMode;
use thiserror::Error;

use crate::invariants::check_invariants;
use crate::policy::{
    DiscriminatePolicy, HarnessError, LedgerTestPolicy, LoosePolicy, StepOutcome, StrictPolicy,
};
use crate::universe::LedgerWorld;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PolicyKind {
    Loose,
    Strict,
    Discriminate,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 3] = [
        PolicyKind::Loose,
        PolicyKind::Strict,
        PolicyKind::Discriminate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyKind::Loose => "loose",
            PolicyKind::Strict => "strict",
            PolicyKind::Discriminate => "discriminate",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub policy: PolicyKind,
    /// Independent runs, each with fresh SUT and mirror state.
    pub runs: u32,
    /// Operations per run.
    pub depth: u32,
    /// Base seed; run `i` uses `seed + i`.
    pub seed: u64,
    /// End the current run (not the campaign) when the SUT refuses a call.
    /// Only Strict ever observes refusals; the other policies either never
    /// look (Loose) or never submit refusable calls (Discriminate).
    pub abort_on_failure: bool,
    /// Sweep every N steps; 0 sweeps only at run end. The closing sweep
    /// always happens.
    pub check_every: u32,
    pub arithmetic: ArithmeticMode,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Discriminate,
            runs: 8,
            depth: 256,
            seed: 1,
            abort_on_failure: false,
            check_every: 1,
            arithmetic: ArithmeticMode::Saturating,
        }
    }
}

// ============================================================================
// Operation mix
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OpKind {
    Transfer,
    BatchTransfer,
    SetBlanketApproval,
    SetAllowance,
    IncreaseAllowance,
    DecreaseAllowance,
    SetAllowanceBatch,
    IncreaseAllowanceBatch,
    DecreaseAllowanceBatch,
    RegisterShadowToken,
    TransmuteToShadow,
    TransmuteFromShadow,
    BatchTransmuteToShadow,
    BatchTransmuteFromShadow,
}

impl OpKind {
    pub const ALL: [OpKind; 14] = [
        OpKind::Transfer,
        OpKind::BatchTransfer,
        OpKind::SetBlanketApproval,
        OpKind::SetAllowance,
        OpKind::IncreaseAllowance,
        OpKind::DecreaseAllowance,
        OpKind::SetAllowanceBatch,
        OpKind::IncreaseAllowanceBatch,
        OpKind::DecreaseAllowanceBatch,
        OpKind::RegisterShadowToken,
        OpKind::TransmuteToShadow,
        OpKind::TransmuteFromShadow,
        OpKind::BatchTransmuteToShadow,
        OpKind::BatchTransmuteFromShadow,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OpKind::Transfer => "transfer",
            OpKind::BatchTransfer => "batch_transfer",
            OpKind::SetBlanketApproval => "set_blanket_approval",
            OpKind::SetAllowance => "set_allowance",
            OpKind::IncreaseAllowance => "increase_allowance",
            OpKind::DecreaseAllowance => "decrease_allowance",
            OpKind::SetAllowanceBatch => "set_allowance_batch",
            OpKind::IncreaseAllowanceBatch => "increase_allowance_batch",
            OpKind::DecreaseAllowanceBatch => "decrease_allowance_batch",
            OpKind::RegisterShadowToken => "register_shadow_token",
            OpKind::TransmuteToShadow => "transmute_to_shadow",
            OpKind::TransmuteFromShadow => "transmute_from_shadow",
            OpKind::BatchTransmuteToShadow => "batch_transmute_to_shadow",
            OpKind::BatchTransmuteFromShadow => "batch_transmute_from_shadow",
        }
    }

    /// Draw weight out of 100. Single transfers and transmutations carry
    /// the mix; batch forms and approvals fill in the rest.
    fn weight(self) -> u32 {
        match self {
            OpKind::Transfer => 20,
            OpKind::BatchTransfer => 8,
            OpKind::SetBlanketApproval => 8,
            OpKind::SetAllowance => 10,
            OpKind::IncreaseAllowance => 6,
            OpKind::DecreaseAllowance => 6,
            OpKind::SetAllowanceBatch => 4,
            OpKind::IncreaseAllowanceBatch => 3,
            OpKind::DecreaseAllowanceBatch => 3,
            OpKind::RegisterShadowToken => 8,
            OpKind::TransmuteToShadow => 10,
            OpKind::TransmuteFromShadow => 8,
            OpKind::BatchTransmuteToShadow => 3,
            OpKind::BatchTransmuteFromShadow => 3,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Seed stream
// ============================================================================

/// xorshift64. Plenty for draw streams; zero seeds are bumped so the
/// generator cannot wedge.
struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_u128(&mut self) -> u128 {
        (u128::from(self.next()) << 64) | u128::from(self.next())
    }

    fn seeds(&mut self, n: usize) -> Vec<u64> {
        (0..n).map(|_| self.next()).collect()
    }

    fn amount_seeds(&mut self, n: usize) -> Vec<u128> {
        (0..n).map(|_| self.next_u128()).collect()
    }
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpStats {
    pub executed: u64,
    pub rejected: u64,
    pub refused: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignReport {
    pub policy: PolicyKind,
    /// Runs that reached full depth.
    pub runs_completed: u32,
    /// Runs ended early by a tolerated refusal under `abort_on_failure`.
    pub runs_aborted: u32,
    pub ops: BTreeMap<OpKind, OpStats>,
    pub sweeps: u64,
    /// Largest populations any single run grew.
    pub max_accounts: usize,
    pub max_token_ids: usize,
    pub max_registered: usize,
}

impl CampaignReport {
    fn new(policy: PolicyKind) -> Self {
        Self {
            policy,
            runs_completed: 0,
            runs_aborted: 0,
            ops: BTreeMap::new(),
            sweeps: 0,
            max_accounts: 0,
            max_token_ids: 0,
            max_registered: 0,
        }
    }

    pub fn stats(&self, op: OpKind) -> OpStats {
        self.ops.get(&op).copied().unwrap_or_default()
    }

    pub fn total_executed(&self) -> u64 {
        self.ops.values().map(|s| s.executed).sum()
    }

    pub fn total_rejected(&self) -> u64 {
        self.ops.values().map(|s| s.rejected).sum()
    }

    pub fn total_refused(&self) -> u64 {
        self.ops.values().map(|s| s.refused).sum()
    }
}

/// A campaign stops at the first fatal failure and reports exactly where.
#[derive(Debug, Error)]
#[error("run {run_index} (seed {run_seed:#x}) failed at step {step}, op {op}: {source}")]
pub struct CampaignError {
    pub run_index: u32,
    pub run_seed: u64,
    pub step: u32,
    pub op: &'static str,
    pub source: HarnessError,
}

// ============================================================================
// The loop
// ============================================================================

/// Run a full campaign of `config.runs` independent runs, each against a
/// fresh SUT from `make_sut`.
pub fn run_campaign<S, F>(
    config: &CampaignConfig,
    mut make_sut: F,
) -> Result<CampaignReport, CampaignError>
where
    S: DualLedger,
    F: FnMut() -> S,
{
    match config.policy {
        PolicyKind::Loose => drive(config, &mut make_sut, LoosePolicy::new()),
        PolicyKind::Strict => drive(config, &mut make_sut, StrictPolicy::new()),
        PolicyKind::Discriminate => drive(config, &mut make_sut, DiscriminatePolicy::new()),
    }
}

fn drive<S, F, P>(
    config: &CampaignConfig,
    make_sut: &mut F,
    mut policy: P,
) -> Result<CampaignReport, CampaignError>
where
    S: DualLedger,
    F: FnMut() -> S,
    P: LedgerTestPolicy<S>,
{
    let mut report = CampaignReport::new(config.policy);
    log::info!(
        "campaign: policy={} runs={} depth={} seed={:#x}",
        policy.name(),
        config.runs,
        config.depth,
        config.seed
    );

    for run_index in 0..config.runs {
        let run_seed = config.seed.wrapping_add(u64::from(run_index));
        let mut rng = Rng::new(run_seed);
        let mut world = LedgerWorld::with_arithmetic(make_sut(), config.arithmetic);
        let mut aborted = false;
        log::debug!("run {run_index} starting (seed {run_seed:#x})");

        for step in 0..config.depth {
            let op = pick_op(&mut rng);
            let outcome = dispatch(&mut policy, &mut world, &mut rng, op)
                .map_err(|source| fail(run_index, run_seed, step, op.name(), source))?;

            let stats = report.ops.entry(op).or_default();
            match outcome {
                StepOutcome::Executed => stats.executed += 1,
                StepOutcome::Rejected(_) => stats.rejected += 1,
                StepOutcome::SutRefused(e) => {
                    stats.refused += 1;
                    if config.abort_on_failure {
                        log::debug!("run {run_index} aborted at step {step}: {e}");
                        aborted = true;
                    }
                }
            }
            if aborted {
                break;
            }

            if config.check_every > 0 && (step + 1) % config.check_every == 0 {
                check_invariants(&world).map_err(|violation| {
                    fail(run_index, run_seed, step, op.name(), HarnessError::Invariant(violation))
                })?;
                report.sweeps += 1;
            }
        }

        // Closing sweep, regardless of cadence or an early abort.
        check_invariants(&world).map_err(|violation| {
            fail(
                run_index,
                run_seed,
                config.depth,
                "closing sweep",
                HarnessError::Invariant(violation),
            )
        })?;
        report.sweeps += 1;

        if aborted {
            report.runs_aborted += 1;
        } else {
            report.runs_completed += 1;
        }
        report.max_accounts = report.max_accounts.max(world.known_accounts().len());
        report.max_token_ids = report.max_token_ids.max(world.known_token_ids().len());
        report.max_registered = report.max_registered.max(world.known_registered_ids().len());
        log::debug!(
            "run {run_index} done: {} accounts, {} ids, {} registered",
            world.known_accounts().len(),
            world.known_token_ids().len(),
            world.known_registered_ids().len()
        );
    }

    Ok(report)
}

/// Every fatal path funnels through here so the divergence is on the log
/// before the error starts unwinding.
fn fail(
    run_index: u32,
    run_seed: u64,
    step: u32,
    op: &'static str,
    source: HarnessError,
) -> CampaignError {
    let err = CampaignError {
        run_index,
        run_seed,
        step,
        op,
        source,
    };
    log::error!("{err}");
    err
}

fn pick_op(rng: &mut Rng) -> OpKind {
    let total: u32 = OpKind::ALL.iter().map(|op| op.weight()).sum();
    let mut roll = (rng.next() % u64::from(total)) as u32;
    for op in OpKind::ALL {
        let weight = op.weight();
        if roll < weight {
            return op;
        }
        roll -= weight;
    }
    OpKind::Transfer
}

/// Batch shapes: one to four elements, and one draw in eight comes out an
/// amount short so the length-mismatch path gets exercised too.
fn batch_seeds(rng: &mut Rng) -> (Vec<u64>, Vec<u128>) {
    let n = 1 + (rng.next() % 4) as usize;
    let m = if rng.next() % 8 == 0 { n - 1 } else { n };
    let ids = rng.seeds(n);
    let amounts = rng.amount_seeds(m);
    (ids, amounts)
}

fn dispatch<S, P>(
    policy: &mut P,
    world: &mut LedgerWorld<S>,
    rng: &mut Rng,
    op: OpKind,
) -> crate::policy::StepResult
where
    S: DualLedger,
    P: LedgerTestPolicy<S>,
{
    match op {
        OpKind::Transfer => policy.transfer(
            world,
            rng.next(),
            rng.next(),
            rng.next(),
            rng.next(),
            rng.next_u128(),
        ),
        OpKind::BatchTransfer => {
            let (caller, from, to) = (rng.next(), rng.next(), rng.next());
            let (ids, amounts) = batch_seeds(rng);
            policy.batch_transfer(world, caller, from, to, &ids, &amounts)
        }
        OpKind::SetBlanketApproval => {
            policy.set_blanket_approval(world, rng.next(), rng.next(), rng.next() % 2 == 0)
        }
        OpKind::SetAllowance => policy.set_allowance(
            world,
            rng.next(),
            rng.next(),
            rng.next(),
            rng.next_u128(),
        ),
        OpKind::IncreaseAllowance => policy.increase_allowance(
            world,
            rng.next(),
            rng.next(),
            rng.next(),
            rng.next_u128(),
        ),
        OpKind::DecreaseAllowance => policy.decrease_allowance(
            world,
            rng.next(),
            rng.next(),
            rng.next(),
            rng.next_u128(),
        ),
        OpKind::SetAllowanceBatch => {
            let (owner, spender) = (rng.next(), rng.next());
            let (ids, amounts) = batch_seeds(rng);
            policy.set_allowance_batch(world, owner, spender, &ids, &amounts)
        }
        OpKind::IncreaseAllowanceBatch => {
            let (owner, spender) = (rng.next(), rng.next());
            let (ids, deltas) = batch_seeds(rng);
            policy.increase_allowance_batch(world, owner, spender, &ids, &deltas)
        }
        OpKind::DecreaseAllowanceBatch => {
            let (owner, spender) = (rng.next(), rng.next());
            let (ids, deltas) = batch_seeds(rng);
            policy.decrease_allowance_batch(world, owner, spender, &ids, &deltas)
        }
        OpKind::RegisterShadowToken => {
            policy.register_shadow_token(world, rng.next(), rng.next())
        }
        OpKind::TransmuteToShadow => policy.transmute_to_shadow(
            world,
            rng.next(),
            rng.next(),
            rng.next(),
            rng.next_u128(),
        ),
        OpKind::TransmuteFromShadow => {
            policy.transmute_from_shadow(world, rng.next(), rng.next(), rng.next_u128())
        }
        OpKind::BatchTransmuteToShadow => {
            let (caller, owner) = (rng.next(), rng.next());
            let (ids, amounts) = batch_seeds(rng);
            policy.batch_transmute_to_shadow(world, caller, owner, &ids, &amounts)
        }
        OpKind::BatchTransmuteFromShadow => {
            let caller = rng.next();
            let (ids, amounts) = batch_seeds(rng);
            policy.batch_transmute_from_shadow(world, caller, &ids, &amounts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alembic_ledger::MemoryLedger;

    #[test]
    fn rng_streams_are_deterministic_and_never_wedge() {
        let mut a = Rng::new(0);
        let mut b = Rng::new(0);
        let first = a.next();
        assert_ne!(first, 0);
        assert_eq!(first, b.next());
        assert_ne!(a.next(), first);
    }

    #[test]
    fn every_op_has_positive_weight() {
        for op in OpKind::ALL {
            assert!(op.weight() > 0, "{op}");
        }
        let total: u32 = OpKind::ALL.iter().map(|op| op.weight()).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn discriminate_campaign_is_green_on_the_reference_ledger() {
        let config = CampaignConfig {
            runs: 4,
            depth: 200,
            seed: 0xDEAD_BEEF,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config, MemoryLedger::new).unwrap();
        assert_eq!(report.runs_completed, 4);
        assert_eq!(report.runs_aborted, 0);
        assert!(report.total_executed() > 0);
        assert_eq!(report.total_refused(), 0);
        assert!(report.max_accounts > 0);
    }

    #[test]
    fn strict_campaign_tolerates_refusals_and_stays_green() {
        let config = CampaignConfig {
            policy: PolicyKind::Strict,
            runs: 4,
            depth: 200,
            seed: 0xFEED,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config, MemoryLedger::new).unwrap();
        assert_eq!(report.runs_completed, 4);
        assert!(report.total_executed() > 0);
    }

    #[test]
    fn campaigns_are_reproducible() {
        let config = CampaignConfig {
            runs: 2,
            depth: 100,
            seed: 42,
            ..CampaignConfig::default()
        };
        let first = run_campaign(&config, MemoryLedger::new).unwrap();
        let second = run_campaign(&config, MemoryLedger::new).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn closing_sweep_runs_even_without_a_cadence() {
        let config = CampaignConfig {
            runs: 3,
            depth: 50,
            check_every: 0,
            seed: 7,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config, MemoryLedger::new).unwrap();
        assert_eq!(report.sweeps, 3);
    }

    #[test]
    fn abort_on_failure_ends_runs_at_the_first_refusal() {
        let config = CampaignConfig {
            policy: PolicyKind::Strict,
            runs: 4,
            depth: 400,
            seed: 0xAB0B,
            abort_on_failure: true,
            ..CampaignConfig::default()
        };
        let report = run_campaign(&config, MemoryLedger::new).unwrap();
        assert_eq!(report.runs_completed + report.runs_aborted, 4);
        // Uniform random amounts overdraw constantly; over 4 x 400 draws at
        // least one refusal is a statistical certainty.
        assert!(report.runs_aborted > 0);
        assert_eq!(report.total_refused(), u64::from(report.runs_aborted));
    }
}
