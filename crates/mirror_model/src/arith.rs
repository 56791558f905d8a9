//! Mirror arithmetic with explicit under/overflow behavior.
//!
//! The Loose and Strict policies feed the mirror unscreened amounts, so a
//! subtraction can legitimately exceed what the mirror holds. Which way that
//! falls is a campaign-level choice, never an accident of wrapping.

use ledger_abi::Amount;

/// How the mirror resolves arithmetic that would leave the representable
/// range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArithmeticMode {
    /// Clamp at the range boundary and keep going. The resulting mirror/SUT
    /// divergence is surfaced by the next invariant sweep. Default.
    #[default]
    Saturating,
    /// Panic at the update site with the offending slot and operands.
    Panicking,
}

impl ArithmeticMode {
    /// `have - take`, resolved per mode. `slot` names the quantity for the
    /// panic message ("balance", "total supply", ...).
    #[inline]
    pub fn sub(self, have: Amount, take: Amount, slot: &str) -> Amount {
        match self {
            ArithmeticMode::Saturating => have.saturating_sub(take),
            ArithmeticMode::Panicking => match have.checked_sub(take) {
                Some(left) => left,
                None => panic!("mirror {slot} underflow: {have} < {take}"),
            },
        }
    }

    /// `have + add`, resolved per mode.
    #[inline]
    pub fn add(self, have: Amount, add: Amount, slot: &str) -> Amount {
        match self {
            ArithmeticMode::Saturating => have.saturating_add(add),
            ArithmeticMode::Panicking => match have.checked_add(add) {
                Some(total) => total,
                None => panic!("mirror {slot} overflow: {have} + {add}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_clamps_at_zero() {
        assert_eq!(ArithmeticMode::Saturating.sub(5, 9, "balance"), 0);
        assert_eq!(ArithmeticMode::Saturating.sub(9, 5, "balance"), 4);
    }

    #[test]
    fn saturating_clamps_at_max() {
        assert_eq!(
            ArithmeticMode::Saturating.add(Amount::MAX, 1, "balance"),
            Amount::MAX
        );
    }

    #[test]
    #[should_panic(expected = "mirror balance underflow: 5 < 9")]
    fn panicking_sub_panics_on_underflow() {
        ArithmeticMode::Panicking.sub(5, 9, "balance");
    }

    #[test]
    #[should_panic(expected = "mirror supply overflow")]
    fn panicking_add_panics_on_overflow() {
        ArithmeticMode::Panicking.add(Amount::MAX, 1, "supply");
    }

    #[test]
    fn panicking_passes_in_range() {
        assert_eq!(ArithmeticMode::Panicking.sub(9, 9, "balance"), 0);
        assert_eq!(ArithmeticMode::Panicking.add(1, 2, "balance"), 3);
    }
}
