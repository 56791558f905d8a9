//! # Alembic: model-based fuzzing for dual-representation ledgers
//!
//! Alembic drives a ledger implementation (the system under test) through
//! long pseudorandom operation sequences while maintaining an independent
//! reference model (the mirror) of what the ledger state ought to be, and
//! sweeps a fixed set of global invariants over everything either side has
//! ever seen.
//!
//! The pieces, leaves first:
//!
//! 1. [`universe`] grows the actor/token population from raw seeds, with a
//!    reuse bias so runs converge on a bounded universe, and funds every new
//!    account through the ledger's privileged mint.
//! 2. [`mirror_model`](mirror_model) (separate crate) holds the reference
//!    state and its update rules.
//! 3. [`policy`] exposes one seed-driven entry point per ledger operation,
//!    in three flavors: Loose (fire and record), Strict (call, then prove
//!    the call was legitimate), Discriminate (screen first, call only on
//!    known-valid input).
//! 4. [`invariants`] compares ledger and mirror across the full
//!    account × id cross product.
//! 5. [`campaign`] is the driver: weighted operation selection from a
//!    deterministic generator, fresh state per run, reproduction coordinates
//!    on failure.
//!
//! The engine is single-threaded and synchronous; determinism comes from the
//! seed alone.

#![forbid(unsafe_code)]

pub mod campaign;
pub mod invariants;
pub mod policy;
pub mod universe;

pub use campaign::{
    run_campaign, CampaignConfig, CampaignError, CampaignReport, OpKind, OpStats, PolicyKind,
};
pub use invariants::{check_invariants, InvariantViolation};
pub use policy::{
    DiscriminatePolicy, HarnessError, LedgerTestPolicy, LoosePolicy, RejectReason, StepOutcome,
    StepResult, StrictPolicy,
};
pub use universe::{LedgerWorld, MintEvent};

// Re-exported so drivers configure the mirror without naming the model crate.
pub use mirror_model::ArithmeticMode;
