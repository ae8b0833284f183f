// 6.1: per market insurance funds. they absorb liquidation deficits before
// any loss is socialized, and receive the surplus of a forced settlement.

use crate::types::MarketId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InsuranceError {
    #[error("insurance fund of {market} holds {balance}, {requested} requested")]
    InsufficientFund {
        market: MarketId,
        balance: Decimal,
        requested: Decimal,
    },
    #[error("negative insurance amount {0}")]
    NegativeAmount(Decimal),
}

pub trait InsuranceFundStore {
    fn balance(&self, market: MarketId) -> Decimal;
    fn withdraw(&mut self, market: MarketId, amount: Decimal) -> Result<(), InsuranceError>;
    fn deposit(&mut self, market: MarketId, amount: Decimal) -> Result<(), InsuranceError>;

    /// Withdraws up to `amount`, returns what was taken.
    fn cover(&mut self, market: MarketId, amount: Decimal) -> Result<Decimal, InsuranceError> {
        let covered = amount.min(self.balance(market)).max(Decimal::ZERO);
        if !covered.is_zero() {
            self.withdraw(market, covered)?;
        }
        Ok(covered)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceFund {
    pub balance: Decimal,
    pub total_deposits: Decimal,
    pub total_payouts: Decimal,
}

impl InsuranceFund {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            balance: initial_balance,
            total_deposits: initial_balance,
            total_payouts: Decimal::ZERO,
        }
    }

    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceFunds {
    funds: BTreeMap<MarketId, InsuranceFund>,
}

impl InsuranceFunds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fund(&self, market: MarketId) -> Option<&InsuranceFund> {
        self.funds.get(&market)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MarketId, &InsuranceFund)> {
        self.funds.iter()
    }

    pub(crate) fn insert(&mut self, market: MarketId, fund: InsuranceFund) {
        self.funds.insert(market, fund);
    }
}

impl InsuranceFundStore for InsuranceFunds {
    fn balance(&self, market: MarketId) -> Decimal {
        self.funds.get(&market).map(|f| f.balance).unwrap_or_default()
    }

    fn withdraw(&mut self, market: MarketId, amount: Decimal) -> Result<(), InsuranceError> {
        if amount < Decimal::ZERO {
            return Err(InsuranceError::NegativeAmount(amount));
        }
        let balance = self.balance(market);
        if amount > balance {
            return Err(InsuranceError::InsufficientFund {
                market,
                balance,
                requested: amount,
            });
        }
        let fund = self.funds.entry(market).or_default();
        fund.balance -= amount;
        fund.total_payouts += amount;
        Ok(())
    }

    fn deposit(&mut self, market: MarketId, amount: Decimal) -> Result<(), InsuranceError> {
        if amount < Decimal::ZERO {
            return Err(InsuranceError::NegativeAmount(amount));
        }
        let fund = self.funds.entry(market).or_default();
        fund.balance += amount;
        fund.total_deposits += amount;
        Ok(())
    }
}
