// 6.2: socialized loss. when a forced settlement owes more than the market
// balance plus insurance can pay, every positive payout is scaled by the
// same factor. the side that caused the deficit gets zero, never a debt.

use crate::types::SubaccountId;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaircutResult {
    /// Scaled payouts, same order as the input
    pub payouts: Vec<(SubaccountId, Decimal)>,
    /// available / owed, one when nothing was cut
    pub factor: Decimal,
    pub total_owed: Decimal,
    pub total_paid: Decimal,
    /// Amount no one receives
    pub shortfall: Decimal,
}

/// Scales payouts so they fit in `available`. Negative payouts count as
/// zero. scaled amounts round down to `scale` decimal places so the sum
/// never overshoots.
pub fn apply_haircut(payouts: &[(SubaccountId, Decimal)], available: Decimal, scale: u32) -> HaircutResult {
    let clamped: Vec<(SubaccountId, Decimal)> = payouts
        .iter()
        .map(|(sub, amount)| (*sub, (*amount).max(Decimal::ZERO)))
        .collect();
    let total_owed: Decimal = clamped.iter().map(|(_, a)| *a).sum();
    let available = available.max(Decimal::ZERO);

    if total_owed <= available {
        return HaircutResult {
            payouts: clamped,
            factor: Decimal::ONE,
            total_owed,
            total_paid: total_owed,
            shortfall: Decimal::ZERO,
        };
    }

    let factor = available / total_owed;
    let scaled: Vec<(SubaccountId, Decimal)> = clamped
        .into_iter()
        .map(|(sub, amount)| {
            let paid = (amount * factor).round_dp_with_strategy(scale, RoundingStrategy::ToZero);
            (sub, paid)
        })
        .collect();
    let total_paid: Decimal = scaled.iter().map(|(_, a)| *a).sum();

    HaircutResult {
        payouts: scaled,
        factor,
        total_owed,
        total_paid,
        shortfall: total_owed - total_paid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountId;
    use rust_decimal_macros::dec;

    fn sub(n: u64) -> SubaccountId {
        SubaccountId::new(AccountId(n), 0)
    }

    #[test]
    fn no_haircut_when_funded() {
        let result = apply_haircut(&[(sub(1), dec!(10)), (sub(2), dec!(-4))], dec!(10), 18);
        assert_eq!(result.factor, dec!(1));
        assert_eq!(result.payouts, vec![(sub(1), dec!(10)), (sub(2), dec!(0))]);
        assert_eq!(result.shortfall, dec!(0));
    }

    #[test]
    fn pro_rata_haircut() {
        let result = apply_haircut(&[(sub(1), dec!(30)), (sub(2), dec!(10))], dec!(20), 18);
        assert_eq!(result.factor, dec!(0.5));
        assert_eq!(result.payouts, vec![(sub(1), dec!(15)), (sub(2), dec!(5))]);
        assert_eq!(result.total_paid, dec!(20));
    }

    #[test]
    fn rounding_never_overpays() {
        let payouts = [(sub(1), dec!(1)), (sub(2), dec!(1)), (sub(3), dec!(1))];
        let result = apply_haircut(&payouts, dec!(1), 6);
        assert!(result.total_paid <= dec!(1));
        assert_eq!(result.payouts[0].1, dec!(0.333333));
        assert!(result.shortfall > dec!(0));
    }

    #[test]
    fn empty_market_pays_nothing() {
        let result = apply_haircut(&[(sub(1), dec!(5))], dec!(0), 18);
        assert_eq!(result.factor, dec!(0));
        assert_eq!(result.payouts[0].1, dec!(0));
    }
}
