// 10.0: subaccount deposits. every balance the exchange holds for a user lives here.
// total - available is what outstanding orders have on hold.

use crate::types::{Denom, MarketId, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Deposit {
    pub available: Decimal,
    pub total: Decimal,
}

impl Deposit {
    pub fn new(available: Decimal, total: Decimal) -> Self {
        Self { available, total }
    }

    pub fn held(&self) -> Decimal {
        self.total - self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available.is_zero() && self.total.is_zero()
    }
}

/// Which side of a deposit a ledger write touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceField {
    Available,
    Total,
    Both,
}

/// A computed state that must never be written. block halting class.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("negative available balance {available} for {subaccount} in {denom}")]
    NegativeAvailable {
        subaccount: SubaccountId,
        denom: Denom,
        available: Decimal,
    },
    #[error("available {available} exceeds total {total} for {subaccount} in {denom}")]
    AvailableExceedsTotal {
        subaccount: SubaccountId,
        denom: Denom,
        available: Decimal,
        total: Decimal,
    },
    #[error("negative ledger amount {0}")]
    NegativeAmount(Decimal),
    #[error("market {market} balance would go negative: {balance}")]
    NegativeMarketBalance { market: MarketId, balance: Decimal },
    #[error("auction pool for {denom} would go negative: {balance}")]
    NegativeAuctionPool { denom: Denom, balance: Decimal },
    #[error("insurance fund for market {market} would go negative")]
    NegativeInsuranceFund { market: MarketId },
    #[error("liquidation in market {market} left {remaining} unfilled after a passing dry run")]
    LiquidationUnfilled { market: MarketId, remaining: Decimal },
}

/// Balance holder contract. Writes are atomic: a write that would break
/// `0 <= available <= total` is refused and nothing changes.
pub trait Ledger {
    fn get_balance(&self, subaccount: &SubaccountId, denom: &Denom) -> Deposit;

    fn credit(
        &mut self,
        subaccount: &SubaccountId,
        denom: &Denom,
        amount: Decimal,
        field: BalanceField,
    ) -> Result<Deposit, InvariantViolation>;

    fn debit(
        &mut self,
        subaccount: &SubaccountId,
        denom: &Denom,
        amount: Decimal,
        field: BalanceField,
    ) -> Result<Deposit, InvariantViolation>;

    /// Lock funds for an order. total unchanged.
    fn hold(&mut self, subaccount: &SubaccountId, denom: &Denom, amount: Decimal) -> Result<Deposit, InvariantViolation> {
        self.debit(subaccount, denom, amount, BalanceField::Available)
    }

    /// Give back a lock. total unchanged.
    fn release(&mut self, subaccount: &SubaccountId, denom: &Denom, amount: Decimal) -> Result<Deposit, InvariantViolation> {
        self.credit(subaccount, denom, amount, BalanceField::Available)
    }

    /// Funds leave the subaccount.
    fn charge(&mut self, subaccount: &SubaccountId, denom: &Denom, amount: Decimal) -> Result<Deposit, InvariantViolation> {
        self.debit(subaccount, denom, amount, BalanceField::Both)
    }

    /// Funds enter the subaccount.
    fn pay(&mut self, subaccount: &SubaccountId, denom: &Denom, amount: Decimal) -> Result<Deposit, InvariantViolation> {
        self.credit(subaccount, denom, amount, BalanceField::Both)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DepositLedger {
    deposits: BTreeMap<(SubaccountId, Denom), Deposit>,
}

impl DepositLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(SubaccountId, Denom), &Deposit)> {
        self.deposits.iter()
    }

    /// Sum of totals across subaccounts for one denom.
    pub fn total_of(&self, denom: &Denom) -> Decimal {
        self.deposits
            .iter()
            .filter(|((_, d), _)| d == denom)
            .map(|(_, dep)| dep.total)
            .sum()
    }

    pub(crate) fn insert_raw(&mut self, subaccount: SubaccountId, denom: Denom, deposit: Deposit) {
        self.deposits.insert((subaccount, denom), deposit);
    }

    fn apply(
        &mut self,
        subaccount: &SubaccountId,
        denom: &Denom,
        delta: Decimal,
        field: BalanceField,
    ) -> Result<Deposit, InvariantViolation> {
        let key = (*subaccount, denom.clone());
        let mut next = self.deposits.get(&key).copied().unwrap_or_default();
        match field {
            BalanceField::Available => next.available += delta,
            BalanceField::Total => next.total += delta,
            BalanceField::Both => {
                next.available += delta;
                next.total += delta;
            }
        }

        if next.available < Decimal::ZERO {
            return Err(InvariantViolation::NegativeAvailable {
                subaccount: *subaccount,
                denom: denom.clone(),
                available: next.available,
            });
        }
        if next.available > next.total {
            return Err(InvariantViolation::AvailableExceedsTotal {
                subaccount: *subaccount,
                denom: denom.clone(),
                available: next.available,
                total: next.total,
            });
        }

        if next.is_empty() {
            self.deposits.remove(&key);
        } else {
            self.deposits.insert(key, next);
        }
        Ok(next)
    }
}

impl Ledger for DepositLedger {
    fn get_balance(&self, subaccount: &SubaccountId, denom: &Denom) -> Deposit {
        self.deposits
            .get(&(*subaccount, denom.clone()))
            .copied()
            .unwrap_or_default()
    }

    fn credit(
        &mut self,
        subaccount: &SubaccountId,
        denom: &Denom,
        amount: Decimal,
        field: BalanceField,
    ) -> Result<Deposit, InvariantViolation> {
        if amount < Decimal::ZERO {
            return Err(InvariantViolation::NegativeAmount(amount));
        }
        self.apply(subaccount, denom, amount, field)
    }

    fn debit(
        &mut self,
        subaccount: &SubaccountId,
        denom: &Denom,
        amount: Decimal,
        field: BalanceField,
    ) -> Result<Deposit, InvariantViolation> {
        if amount < Decimal::ZERO {
            return Err(InvariantViolation::NegativeAmount(amount));
        }
        self.apply(subaccount, denom, -amount, field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountId;
    use rust_decimal_macros::dec;

    fn sub() -> SubaccountId {
        SubaccountId::new(AccountId(1), 0)
    }

    #[test]
    fn hold_and_release_keep_total() {
        let mut ledger = DepositLedger::new();
        let usdt = Denom::new("usdt");
        ledger.pay(&sub(), &usdt, dec!(100)).unwrap();

        let after_hold = ledger.hold(&sub(), &usdt, dec!(40)).unwrap();
        assert_eq!(after_hold, Deposit::new(dec!(60), dec!(100)));
        assert_eq!(after_hold.held(), dec!(40));

        let after_release = ledger.release(&sub(), &usdt, dec!(40)).unwrap();
        assert_eq!(after_release, Deposit::new(dec!(100), dec!(100)));
    }

    #[test]
    fn overdraw_is_refused_and_atomic() {
        let mut ledger = DepositLedger::new();
        let usdt = Denom::new("usdt");
        ledger.pay(&sub(), &usdt, dec!(10)).unwrap();

        let result = ledger.charge(&sub(), &usdt, dec!(11));
        assert!(matches!(result, Err(InvariantViolation::NegativeAvailable { .. })));
        assert_eq!(ledger.get_balance(&sub(), &usdt), Deposit::new(dec!(10), dec!(10)));
    }

    #[test]
    fn release_beyond_hold_is_refused() {
        let mut ledger = DepositLedger::new();
        let usdt = Denom::new("usdt");
        ledger.pay(&sub(), &usdt, dec!(10)).unwrap();
        let result = ledger.release(&sub(), &usdt, dec!(1));
        assert!(matches!(result, Err(InvariantViolation::AvailableExceedsTotal { .. })));
    }

    #[test]
    fn empty_deposits_are_pruned() {
        let mut ledger = DepositLedger::new();
        let usdt = Denom::new("usdt");
        ledger.pay(&sub(), &usdt, dec!(5)).unwrap();
        ledger.charge(&sub(), &usdt, dec!(5)).unwrap();
        assert_eq!(ledger.iter().count(), 0);
    }
}
