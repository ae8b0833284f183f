//! Bank collaborator: account level token balances outside the exchange.
//!
//! Deposits move tokens from an account into the exchange module, withdrawals
//! move them back. The in-memory bank stands in for the chain's bank module.

use crate::types::{AccountId, Denom};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BankError {
    #[error("account {account:?} holds {balance} {denom}, needs {needed}")]
    InsufficientBalance {
        account: AccountId,
        denom: Denom,
        balance: Decimal,
        needed: Decimal,
    },
    #[error("module holds {balance} {denom}, needs {needed}")]
    InsufficientModuleBalance {
        denom: Denom,
        balance: Decimal,
        needed: Decimal,
    },
}

pub trait Bank {
    fn balance(&self, account: AccountId, denom: &Denom) -> Decimal;
    fn mint(&mut self, account: AccountId, denom: &Denom, amount: Decimal);
    fn burn(&mut self, account: AccountId, denom: &Denom, amount: Decimal) -> Result<(), BankError>;
    fn send_to_module(&mut self, account: AccountId, denom: &Denom, amount: Decimal) -> Result<(), BankError>;
    fn send_from_module(&mut self, account: AccountId, denom: &Denom, amount: Decimal) -> Result<(), BankError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBank {
    balances: BTreeMap<(AccountId, Denom), Decimal>,
    module: BTreeMap<Denom, Decimal>,
}

impl InMemoryBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module_balance(&self, denom: &Denom) -> Decimal {
        self.module.get(denom).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(AccountId, Denom), &Decimal)> {
        self.balances.iter()
    }

    pub fn module_iter(&self) -> impl Iterator<Item = (&Denom, &Decimal)> {
        self.module.iter()
    }

    pub(crate) fn set_module_balance(&mut self, denom: Denom, amount: Decimal) {
        self.module.insert(denom, amount);
    }

    fn take(&mut self, account: AccountId, denom: &Denom, amount: Decimal) -> Result<(), BankError> {
        let balance = self.balance(account, denom);
        if balance < amount {
            return Err(BankError::InsufficientBalance {
                account,
                denom: denom.clone(),
                balance,
                needed: amount,
            });
        }
        self.balances.insert((account, denom.clone()), balance - amount);
        Ok(())
    }
}

impl Bank for InMemoryBank {
    fn balance(&self, account: AccountId, denom: &Denom) -> Decimal {
        self.balances
            .get(&(account, denom.clone()))
            .copied()
            .unwrap_or_default()
    }

    fn mint(&mut self, account: AccountId, denom: &Denom, amount: Decimal) {
        *self.balances.entry((account, denom.clone())).or_default() += amount;
    }

    fn burn(&mut self, account: AccountId, denom: &Denom, amount: Decimal) -> Result<(), BankError> {
        self.take(account, denom, amount)
    }

    fn send_to_module(&mut self, account: AccountId, denom: &Denom, amount: Decimal) -> Result<(), BankError> {
        self.take(account, denom, amount)?;
        *self.module.entry(denom.clone()).or_default() += amount;
        Ok(())
    }

    fn send_from_module(&mut self, account: AccountId, denom: &Denom, amount: Decimal) -> Result<(), BankError> {
        let balance = self.module_balance(denom);
        if balance < amount {
            return Err(BankError::InsufficientModuleBalance {
                denom: denom.clone(),
                balance,
                needed: amount,
            });
        }
        self.module.insert(denom.clone(), balance - amount);
        self.mint(account, denom, amount);
        Ok(())
    }
}
