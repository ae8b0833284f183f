// fee arithmetic. a positive fee is split between the order's fee recipient
// and the auction pool, a negative fee is a rebate paid out of the pool.

use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeeSplit {
    pub relayer: Decimal,
    pub auction: Decimal,
}

impl FeeSplit {
    pub fn total(&self) -> Decimal {
        self.relayer + self.auction
    }
}

pub fn trading_fee(notional: Decimal, rate: Decimal) -> Decimal {
    notional * rate
}

/// Splits a collected fee. negative or zero fees produce no split.
pub fn split_fee(fee: Decimal, relayer_share_rate: Decimal) -> FeeSplit {
    if fee <= Decimal::ZERO {
        return FeeSplit::default();
    }
    let relayer = fee * relayer_share_rate;
    FeeSplit {
        relayer,
        auction: fee - relayer,
    }
}
