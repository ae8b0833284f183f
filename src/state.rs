// 14.0: all mutable exchange state in one owned value. the engine threads it
// through every operation, nothing lives in globals.
// 14.1 has order lookups across book and transients, 14.2 module accounts,
// 14.3 genesis export and import.

use crate::bank::{Bank, InMemoryBank};
use crate::conditional::{ConditionalOrder, ConditionalOrderBook};
use crate::config::{ConfigError, ExchangeParams};
use crate::deposit::{Deposit, DepositLedger, InvariantViolation};
use crate::funding::FundingState;
use crate::insurance::{InsuranceFund, InsuranceFundStore, InsuranceFunds};
use crate::market::Market;
use crate::order::Order;
use crate::orderbook::{OrderBook, TransientOrders};
use crate::position::Position;
use crate::types::{AccountId, Denom, MarketId, OrderHash, OrderSide, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a live order currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderLocation {
    Transient,
    Resting,
}

#[derive(Debug, Clone, Default)]
pub struct ExchangeState {
    pub params: ExchangeParams,
    pub markets: BTreeMap<MarketId, Market>,
    pub deposits: DepositLedger,
    pub bank: InMemoryBank,
    pub books: BTreeMap<MarketId, OrderBook>,
    pub transients: BTreeMap<MarketId, TransientOrders>,
    pub positions: BTreeMap<(MarketId, SubaccountId), Position>,
    /// Parked trigger orders, per market
    pub conditionals: BTreeMap<MarketId, ConditionalOrderBook>,
    /// Perpetual markets only
    pub funding: BTreeMap<MarketId, FundingState>,
    pub insurance: InsuranceFunds,
    /// Quote held by a derivative market: position margin plus collected deficits
    pub market_balances: BTreeMap<MarketId, Decimal>,
    /// Auction share of fees, per denom
    pub auction_pool: BTreeMap<Denom, Decimal>,
    /// Live client order ids
    pub client_ids: BTreeMap<(MarketId, SubaccountId, String), OrderHash>,
    pub nonces: BTreeMap<SubaccountId, u64>,
    pub next_sequence: u64,
}

impl ExchangeState {
    pub fn new(params: ExchangeParams) -> Self {
        Self {
            params,
            next_sequence: 1,
            ..Self::default()
        }
    }

    pub fn next_sequence(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    pub fn next_nonce(&mut self, subaccount: SubaccountId) -> u64 {
        let nonce = self.nonces.entry(subaccount).or_default();
        *nonce += 1;
        *nonce
    }

    // 14.1: order lookups

    pub fn find_order(&self, market: MarketId, hash: &OrderHash) -> Option<(&Order, OrderLocation)> {
        if let Some(order) = self.transients.get(&market).and_then(|t| t.get(hash)) {
            return Some((order, OrderLocation::Transient));
        }
        self.books
            .get(&market)
            .and_then(|b| b.get(hash))
            .map(|o| (o, OrderLocation::Resting))
    }

    pub fn remove_order(&mut self, market: MarketId, hash: &OrderHash) -> Option<Order> {
        let order = match self.transients.get_mut(&market).and_then(|t| t.remove(hash)) {
            Some(order) => order,
            None => self.books.get_mut(&market)?.remove(hash)?,
        };
        if let Some(cid) = &order.info.client_order_id {
            self.client_ids.remove(&(market, order.subaccount(), cid.clone()));
        }
        Some(order)
    }

    pub fn hash_for_client_id(&self, market: MarketId, subaccount: SubaccountId, cid: &str) -> Option<OrderHash> {
        self.client_ids.get(&(market, subaccount, cid.to_string())).copied()
    }

    /// Live orders of a subaccount in a market: transients in admission
    /// order, then the resting book best first.
    pub fn orders_of(&self, market: MarketId, subaccount: &SubaccountId) -> Vec<&Order> {
        let transient = self
            .transients
            .get(&market)
            .into_iter()
            .flat_map(|t| t.iter())
            .filter(|o| o.subaccount() == *subaccount);
        let resting = self
            .books
            .get(&market)
            .into_iter()
            .flat_map(|b| b.iter())
            .filter(|o| o.subaccount() == *subaccount);
        transient.chain(resting).collect()
    }

    pub fn order_hashes_of(&self, market: MarketId, subaccount: &SubaccountId) -> Vec<OrderHash> {
        self.orders_of(market, subaccount).iter().map(|o| o.hash).collect()
    }

    /// Live and conditional orders on one side, the per side limit counts both.
    pub fn count_orders(&self, market: MarketId, subaccount: &SubaccountId, side: OrderSide) -> usize {
        let live = self
            .orders_of(market, subaccount)
            .iter()
            .filter(|o| o.side == side)
            .count();
        live + self
            .conditional_orders_of(market, subaccount)
            .iter()
            .filter(|o| o.side() == side)
            .count()
    }

    pub fn conditional_orders_of(&self, market: MarketId, subaccount: &SubaccountId) -> Vec<&ConditionalOrder> {
        self.conditionals
            .get(&market)
            .map(|book| book.orders_of(subaccount))
            .unwrap_or_default()
    }

    /// Every market holding live orders of the subaccount with holds in `denom`.
    pub fn markets_with_holds(&self, subaccount: &SubaccountId, denom: &Denom) -> Vec<MarketId> {
        self.markets
            .keys()
            .copied()
            .filter(|m| {
                self.orders_of(*m, subaccount)
                    .iter()
                    .any(|o| o.hold.denom == *denom && o.hold.remaining > Decimal::ZERO)
            })
            .collect()
    }

    pub fn position(&self, market: MarketId, subaccount: &SubaccountId) -> Option<&Position> {
        self.positions.get(&(market, *subaccount))
    }

    pub fn positions_in(&self, market: MarketId) -> impl Iterator<Item = (&SubaccountId, &Position)> {
        self.positions
            .range((market, SubaccountId::new(AccountId(0), 0))..)
            .take_while(move |((m, _), _)| *m == market)
            .map(|((_, sub), pos)| (sub, pos))
    }

    // 14.2: module accounts

    pub fn market_balance(&self, market: MarketId) -> Decimal {
        self.market_balances.get(&market).copied().unwrap_or_default()
    }

    pub fn credit_market_balance(&mut self, market: MarketId, amount: Decimal) {
        *self.market_balances.entry(market).or_default() += amount;
    }

    pub fn debit_market_balance(&mut self, market: MarketId, amount: Decimal) -> Result<(), InvariantViolation> {
        let balance = self.market_balance(market) - amount;
        if balance < Decimal::ZERO {
            return Err(InvariantViolation::NegativeMarketBalance { market, balance });
        }
        self.market_balances.insert(market, balance);
        Ok(())
    }

    pub fn auction_pool_balance(&self, denom: &Denom) -> Decimal {
        self.auction_pool.get(denom).copied().unwrap_or_default()
    }

    pub fn credit_auction_pool(&mut self, denom: &Denom, amount: Decimal) {
        *self.auction_pool.entry(denom.clone()).or_default() += amount;
    }

    pub fn debit_auction_pool(&mut self, denom: &Denom, amount: Decimal) -> Result<(), InvariantViolation> {
        let balance = self.auction_pool_balance(denom) - amount;
        if balance < Decimal::ZERO {
            return Err(InvariantViolation::NegativeAuctionPool {
                denom: denom.clone(),
                balance,
            });
        }
        self.auction_pool.insert(denom.clone(), balance);
        Ok(())
    }

    /// Everything the exchange module owes in `denom`. must equal the bank's
    /// module balance at all times.
    pub fn module_liabilities(&self, denom: &Denom) -> Decimal {
        let markets: Decimal = self
            .markets
            .values()
            .filter(|m| m.is_derivative() && m.quote_denom == *denom)
            .map(|m| self.market_balance(m.id) + self.insurance.balance(m.id))
            .sum();
        self.deposits.total_of(denom) + markets + self.auction_pool_balance(denom)
    }

    // 14.3: genesis

    pub fn export_genesis(&self) -> ExchangeGenesis {
        ExchangeGenesis {
            params: self.params.clone(),
            markets: self.markets.values().cloned().collect(),
            deposits: self
                .deposits
                .iter()
                .map(|((subaccount, denom), deposit)| DepositRecord {
                    subaccount: *subaccount,
                    denom: denom.clone(),
                    deposit: *deposit,
                })
                .collect(),
            bank_balances: self
                .bank
                .iter()
                .map(|((account, denom), amount)| (*account, denom.clone(), *amount))
                .collect(),
            module_balances: self.bank.module_iter().map(|(d, a)| (d.clone(), *a)).collect(),
            resting_orders: self.books.values().flat_map(|b| b.iter().cloned()).collect(),
            transient_orders: self.transients.values().flat_map(|t| t.iter().cloned()).collect(),
            conditional_orders: self.conditionals.values().flat_map(|b| b.iter().cloned()).collect(),
            funding: self.funding.iter().map(|(m, f)| (*m, f.clone())).collect(),
            positions: self
                .positions
                .iter()
                .map(|((market, subaccount), position)| PositionRecord {
                    market: *market,
                    subaccount: *subaccount,
                    position: position.clone(),
                })
                .collect(),
            insurance_funds: self.insurance.iter().map(|(m, f)| (*m, f.clone())).collect(),
            market_balances: self.market_balances.iter().map(|(m, b)| (*m, *b)).collect(),
            auction_pool: self.auction_pool.iter().map(|(d, b)| (d.clone(), *b)).collect(),
            nonces: self.nonces.iter().map(|(s, n)| (*s, *n)).collect(),
            next_sequence: self.next_sequence,
        }
    }

    pub fn import_genesis(genesis: ExchangeGenesis) -> Result<Self, ConfigError> {
        genesis.params.validate()?;
        let mut state = Self::new(genesis.params);

        for market in genesis.markets {
            state.books.insert(market.id, OrderBook::new(market.id));
            state.transients.insert(market.id, TransientOrders::new());
            state.markets.insert(market.id, market);
        }
        for record in genesis.deposits {
            state.deposits.insert_raw(record.subaccount, record.denom, record.deposit);
        }
        for (account, denom, amount) in genesis.bank_balances {
            state.bank.mint(account, &denom, amount);
        }
        for (denom, amount) in genesis.module_balances {
            state.bank.set_module_balance(denom, amount);
        }
        for order in genesis.resting_orders {
            state.index_client_id(&order);
            state.books.entry(order.market_id).or_insert_with(|| OrderBook::new(order.market_id)).insert(order);
        }
        for order in genesis.transient_orders {
            state.index_client_id(&order);
            state.transients.entry(order.market_id).or_default().push(order);
        }
        for order in genesis.conditional_orders {
            let market = order.request.market_id;
            state
                .conditionals
                .entry(market)
                .or_insert_with(|| ConditionalOrderBook::new(market))
                .insert(order);
        }
        state.funding = genesis.funding.into_iter().collect();
        for record in genesis.positions {
            state.positions.insert((record.market, record.subaccount), record.position);
        }
        for (market, fund) in genesis.insurance_funds {
            state.insurance.insert(market, fund);
        }
        state.market_balances = genesis.market_balances.into_iter().collect();
        state.auction_pool = genesis.auction_pool.into_iter().collect();
        state.nonces = genesis.nonces.into_iter().collect();
        state.next_sequence = genesis.next_sequence;
        Ok(state)
    }

    pub(crate) fn index_client_id(&mut self, order: &Order) {
        if let Some(cid) = &order.info.client_order_id {
            self.client_ids
                .insert((order.market_id, order.subaccount(), cid.clone()), order.hash);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositRecord {
    pub subaccount: SubaccountId,
    pub denom: Denom,
    pub deposit: Deposit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub market: MarketId,
    pub subaccount: SubaccountId,
    pub position: Position,
}

/// Serializable snapshot. vectors in key order so two nodes export the same bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeGenesis {
    pub params: ExchangeParams,
    pub markets: Vec<Market>,
    pub deposits: Vec<DepositRecord>,
    pub bank_balances: Vec<(AccountId, Denom, Decimal)>,
    pub module_balances: Vec<(Denom, Decimal)>,
    pub resting_orders: Vec<Order>,
    pub transient_orders: Vec<Order>,
    #[serde(default)]
    pub conditional_orders: Vec<ConditionalOrder>,
    #[serde(default)]
    pub funding: Vec<(MarketId, FundingState)>,
    pub positions: Vec<PositionRecord>,
    pub insurance_funds: Vec<(MarketId, InsuranceFund)>,
    pub market_balances: Vec<(MarketId, Decimal)>,
    pub auction_pool: Vec<(Denom, Decimal)>,
    pub nonces: Vec<(SubaccountId, u64)>,
    pub next_sequence: u64,
}

impl ExchangeGenesis {
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}
