// 8.0 engine/core.rs: the exchange. owns the state, the oracle and the event log.

use super::config::EngineConfig;
use super::results::ExchangeError;
use crate::bank::{Bank, InMemoryBank};
use crate::conditional::ConditionalOrderBook;
use crate::config::ExchangeParams;
use crate::deposit::{Deposit, Ledger};
use crate::events::{
    DepositEvent, Event, EventId, EventPayload, MarketStatusChangedEvent, WithdrawalEvent, WithdrawalRejectedEvent,
};
use crate::insurance::InsuranceFundStore;
use crate::funding::FundingState;
use crate::market::{Market, MarketKind, MarketStatus};
use crate::oracle::{resolve_mark_price, PriceOracle, StaticPriceOracle};
use crate::order::Order;
use crate::orderbook::{OrderBook, TransientOrders};
use crate::position::Position;
use crate::state::{ExchangeGenesis, ExchangeState};
use crate::types::{AccountId, Denom, MarketId, OrderHash, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use tracing::{debug, info};

/** 8.1: main exchange struct. all mutable state sits in `state` */
#[derive(Debug)]
pub struct Exchange<O: PriceOracle = StaticPriceOracle> {
    pub(super) config: EngineConfig,
    pub(super) state: ExchangeState,
    pub(super) oracle: O,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) current_time: Timestamp,
}

impl Exchange<StaticPriceOracle> {
    pub fn new(config: EngineConfig, params: ExchangeParams) -> Result<Self, ExchangeError> {
        Self::with_oracle(config, params, StaticPriceOracle::new())
    }
}

impl<O: PriceOracle> Exchange<O> {
    pub fn with_oracle(config: EngineConfig, params: ExchangeParams, oracle: O) -> Result<Self, ExchangeError> {
        params.validate()?;
        Ok(Self::from_state(config, ExchangeState::new(params), oracle))
    }

    pub fn from_genesis(config: EngineConfig, genesis: ExchangeGenesis, oracle: O) -> Result<Self, ExchangeError> {
        let state = ExchangeState::import_genesis(genesis)?;
        Ok(Self::from_state(config, state, oracle))
    }

    pub fn from_state(config: EngineConfig, state: ExchangeState, oracle: O) -> Self {
        Self {
            config,
            state,
            oracle,
            events: Vec::new(),
            next_event_id: 1,
            current_time: Timestamp::from_millis(0),
        }
    }

    pub fn export_genesis(&self) -> ExchangeGenesis {
        self.state.export_genesis()
    }

    pub fn state(&self) -> &ExchangeState {
        &self.state
    }

    pub fn params(&self) -> &ExchangeParams {
        &self.state.params
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    /// The bank collaborator. tests and the simulator mint through it.
    pub fn bank(&self) -> &InMemoryBank {
        &self.state.bank
    }

    pub fn bank_mut(&mut self) -> &mut InMemoryBank {
        &mut self.state.bank
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: i64) {
        self.current_time = Timestamp::from_millis(self.current_time.as_millis() + millis);
    }

    // 8.2: market registry

    pub fn add_market(&mut self, market: Market) -> Result<MarketId, ExchangeError> {
        market.validate()?;
        let market_id = market.id;
        if self.state.markets.contains_key(&market_id) {
            return Err(ExchangeError::MarketExists(market_id));
        }
        info!(market = %market_id, ticker = %market.ticker, kind = ?market.kind, "market added");
        self.state.books.insert(market_id, OrderBook::new(market_id));
        self.state.transients.insert(market_id, TransientOrders::new());
        self.state
            .conditionals
            .insert(market_id, ConditionalOrderBook::new(market_id));
        if market.kind == MarketKind::Perpetual {
            self.state.funding.insert(market_id, FundingState::new(self.current_time));
        }
        self.state.markets.insert(market_id, market);
        Ok(market_id)
    }

    /// Admin status change. demolishing a market closes it first: every
    /// order is cancelled and derivative positions settle at mark.
    pub fn set_market_status(&mut self, market_id: MarketId, status: MarketStatus) -> Result<(), ExchangeError> {
        let from = self
            .state
            .markets
            .get(&market_id)
            .map(|m| m.status)
            .ok_or(ExchangeError::InvalidMarket(market_id))?;
        if from == MarketStatus::Demolished && status != from {
            return Err(ExchangeError::InvalidMarket(market_id));
        }
        if status == MarketStatus::Demolished && from != status {
            self.close_market(market_id, None, status)?;
            return Ok(());
        }
        self.apply_market_status(market_id, status)
    }

    pub(super) fn apply_market_status(&mut self, market_id: MarketId, status: MarketStatus) -> Result<(), ExchangeError> {
        let market = self
            .state
            .markets
            .get_mut(&market_id)
            .ok_or(ExchangeError::InvalidMarket(market_id))?;
        let from = market.status;
        if from == status {
            return Ok(());
        }
        market.status = status;
        info!(market = %market_id, from = ?from, to = ?status, "market status changed");
        self.emit_event(EventPayload::MarketStatusChanged(MarketStatusChangedEvent {
            market_id,
            from,
            to: status,
        }));
        Ok(())
    }

    pub fn market(&self, market_id: MarketId) -> Option<&Market> {
        self.state.markets.get(&market_id)
    }

    /// Market that accepts new orders.
    pub(super) fn active_market(&self, market_id: MarketId) -> Result<Market, ExchangeError> {
        let market = self
            .state
            .markets
            .get(&market_id)
            .ok_or(ExchangeError::InvalidMarket(market_id))?;
        if !market.is_active() {
            return Err(ExchangeError::MarketPaused(market_id));
        }
        Ok(market.clone())
    }

    /// Oracle price, else the resting book mid.
    pub fn mark_price(&self, market_id: MarketId) -> Option<Decimal> {
        resolve_mark_price(&self.oracle, market_id, self.state.books.get(&market_id))
    }

    // 8.3: deposits and withdrawals

    /// Moves `amount` from the account's bank balance into a subaccount deposit.
    pub fn deposit(
        &mut self,
        account: AccountId,
        subaccount: SubaccountId,
        denom: &Denom,
        amount: Decimal,
    ) -> Result<Deposit, ExchangeError> {
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidAmount(amount));
        }
        self.state.bank.send_to_module(account, denom, amount)?;
        let deposit = self.state.deposits.pay(&subaccount, denom, amount)?;
        debug!(subaccount = %subaccount, denom = %denom, amount = %amount, "deposit");

        self.emit_event(EventPayload::Deposit(DepositEvent {
            subaccount,
            denom: denom.clone(),
            amount,
            new_total: deposit.total,
        }));
        Ok(deposit)
    }

    /// Moves `amount` of available balance back to the owning account's bank balance.
    pub fn withdraw(&mut self, subaccount: SubaccountId, denom: &Denom, amount: Decimal) -> Result<Deposit, ExchangeError> {
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidAmount(amount));
        }
        let current = self.state.deposits.get_balance(&subaccount, denom);
        if current.available < amount {
            let err = ExchangeError::InsufficientDeposit {
                subaccount,
                denom: denom.clone(),
                available: current.available,
                requested: amount,
            };
            // audit trail keeps rejected withdrawals too
            self.emit_event(EventPayload::WithdrawalRejected(WithdrawalRejectedEvent {
                subaccount,
                denom: denom.clone(),
                amount,
                reason: err.to_string(),
            }));
            return Err(err);
        }

        let deposit = self.state.deposits.charge(&subaccount, denom, amount)?;
        self.state.bank.send_from_module(subaccount.account, denom, amount)?;
        debug!(subaccount = %subaccount, denom = %denom, amount = %amount, "withdrawal");

        self.emit_event(EventPayload::Withdrawal(WithdrawalEvent {
            subaccount,
            denom: denom.clone(),
            amount,
            new_total: deposit.total,
        }));
        Ok(deposit)
    }

    /// Seeds a derivative market's insurance fund from the funder's bank balance.
    pub fn fund_insurance(&mut self, funder: AccountId, market_id: MarketId, amount: Decimal) -> Result<(), ExchangeError> {
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidAmount(amount));
        }
        let denom = self
            .state
            .markets
            .get(&market_id)
            .filter(|m| m.is_derivative())
            .map(|m| m.quote_denom.clone())
            .ok_or(ExchangeError::InvalidMarket(market_id))?;
        self.state.bank.send_to_module(funder, &denom, amount)?;
        self.state.insurance.deposit(market_id, amount)?;
        info!(market = %market_id, amount = %amount, "insurance fund topped up");
        Ok(())
    }

    // 8.4: read accessors

    pub fn deposit_of(&self, subaccount: &SubaccountId, denom: &Denom) -> Deposit {
        self.state.deposits.get_balance(subaccount, denom)
    }

    pub fn position(&self, market_id: MarketId, subaccount: &SubaccountId) -> Option<&Position> {
        self.state.position(market_id, subaccount)
    }

    pub fn order(&self, market_id: MarketId, hash: &OrderHash) -> Option<&Order> {
        self.state.find_order(market_id, hash).map(|(order, _)| order)
    }

    pub fn book(&self, market_id: MarketId) -> Option<&OrderBook> {
        self.state.books.get(&market_id)
    }

    pub fn insurance_fund_balance(&self, market_id: MarketId) -> Decimal {
        self.state.insurance.balance(market_id)
    }

    pub fn market_balance(&self, market_id: MarketId) -> Decimal {
        self.state.market_balance(market_id)
    }

    pub fn auction_pool_balance(&self, denom: &Denom) -> Decimal {
        self.state.auction_pool_balance(denom)
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;
        self.events.push(event);

        if self.events.len() > self.config.max_events {
            let drain_count = self.events.len() - self.config.max_events;
            self.events.drain(0..drain_count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountId;
    use rust_decimal_macros::dec;

    fn exchange() -> Exchange {
        Exchange::new(EngineConfig::default(), ExchangeParams::default()).unwrap()
    }

    #[test]
    fn deposit_then_overdraw() {
        let mut ex = exchange();
        let usdt = Denom::new("usdt");
        let sub = SubaccountId::new(AccountId(1), 0);
        ex.bank_mut().mint(AccountId(1), &usdt, dec!(50));

        let deposit = ex.deposit(AccountId(1), sub, &usdt, dec!(50)).unwrap();
        assert_eq!(deposit, Deposit::new(dec!(50), dec!(50)));

        let err = ex.withdraw(sub, &usdt, dec!(51)).unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientDeposit { .. }));
        assert_eq!(ex.deposit_of(&sub, &usdt), Deposit::new(dec!(50), dec!(50)));
        assert_eq!(ex.bank().balance(AccountId(1), &usdt), dec!(0));
        assert!(matches!(
            ex.events().last().unwrap().payload,
            EventPayload::WithdrawalRejected(_)
        ));

        ex.withdraw(sub, &usdt, dec!(20)).unwrap();
        assert_eq!(ex.bank().balance(AccountId(1), &usdt), dec!(20));
        assert_eq!(ex.deposit_of(&sub, &usdt), Deposit::new(dec!(30), dec!(30)));
    }

    #[test]
    fn deposit_needs_bank_funds() {
        let mut ex = exchange();
        let usdt = Denom::new("usdt");
        let sub = SubaccountId::new(AccountId(1), 0);
        let err = ex.deposit(AccountId(1), sub, &usdt, dec!(1)).unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientBankBalance(_)));
        assert!(matches!(
            ex.deposit(AccountId(1), sub, &usdt, dec!(0)),
            Err(ExchangeError::InvalidAmount(_))
        ));
    }

    #[test]
    fn market_registry() {
        let mut ex = exchange();
        let market = Market::perpetual(MarketId(1), "BTC/USDT PERP", Denom::new("usdt"), ex.params());
        ex.add_market(market.clone()).unwrap();
        assert!(matches!(ex.add_market(market), Err(ExchangeError::MarketExists(_))));

        ex.set_market_status(MarketId(1), MarketStatus::Paused).unwrap();
        assert!(matches!(ex.active_market(MarketId(1)), Err(ExchangeError::MarketPaused(_))));
        assert!(matches!(ex.active_market(MarketId(9)), Err(ExchangeError::InvalidMarket(_))));

        ex.set_market_status(MarketId(1), MarketStatus::Demolished).unwrap();
        assert_eq!(ex.market(MarketId(1)).unwrap().status, MarketStatus::Demolished);
        // no way back
        assert!(matches!(
            ex.set_market_status(MarketId(1), MarketStatus::Active),
            Err(ExchangeError::InvalidMarket(_))
        ));
    }

    #[test]
    fn event_log_is_bounded() {
        let mut ex = Exchange::new(EngineConfig { max_events: 2 }, ExchangeParams::default()).unwrap();
        let usdt = Denom::new("usdt");
        let sub = SubaccountId::new(AccountId(1), 0);
        ex.bank_mut().mint(AccountId(1), &usdt, dec!(10));
        for _ in 0..5 {
            ex.deposit(AccountId(1), sub, &usdt, dec!(1)).unwrap();
        }
        assert_eq!(ex.events().len(), 2);
        assert_eq!(ex.events()[1].id, EventId(5));
    }
}
