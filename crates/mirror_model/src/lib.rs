//! Pure reference model ("mirror") of the dual-representation ledger.
//!
//! The mirror is the hand-maintained state machine the fuzzing engine checks
//! a real ledger against. It holds balances, supplies, allowances, blanket
//! approvals, shadow handles and shadow balances, plus the append-only
//! rosters of every account and token id the campaign has ever seen.
//!
//! Guarantees:
//! 1. Update functions are pure state arithmetic: no I/O, no logging, no
//!    calls back into any ledger.
//! 2. The mirror never validates preconditions. Handlers decide what gets
//!    recorded; the mirror records it. The one structural exception is
//!    shadow registration, which keeps the first handle forever.
//! 3. Subtraction behavior is explicit: [`ArithmeticMode`] selects saturation
//!    (divergence survives to the next invariant sweep) or panic (fail fast
//!    at the update site).
//! 4. Rosters deduplicate on insert and preserve insertion order, so sweep
//!    iteration is deterministic for a given seed.

#![forbid(unsafe_code)]

pub mod arith;
pub mod state;

pub use arith::ArithmeticMode;
pub use state::{AuthPath, MirrorState};
