//! Per-block matching.
//!
//! Pure functions over the book and the transient set: they decide who trades
//! with whom, at what price and for how much, and consume the matched quantity
//! (plus its share of hold and margin) from the orders. Balances and positions
//! are settled afterwards from the returned `ClearingResult`.
//!
//! Three passes exist:
//! - a sweep of one taker against the resting book, makers fill at their own price
//! - a uniform price batch auction among the block's transient limit orders
//! - a dry run of a sweep, used to decide whether a liquidation can fill at all

use crate::order::{Order, OrderType};
use crate::orderbook::{OrderBook, TransientOrders};
use crate::position::Position;
use crate::types::{round_to_tick, AccountId, MarketId, OrderHash, OrderSide, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidityRole {
    Maker,
    Taker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMode {
    /// Market order against the resting book
    MarketSweep,
    /// Transient limit order against the resting book
    RestingSweep,
    /// Transient limits against each other
    BatchAuction,
    /// Synthetic liquidation order against the resting book
    Liquidation,
}

/// One order's side of one trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillDelta {
    pub order_hash: OrderHash,
    pub subaccount: SubaccountId,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub fee_recipient: Option<AccountId>,
    pub client_order_id: Option<String>,
    pub fill_quantity: Decimal,
    pub execution_price: Decimal,
    pub execution_margin: Decimal,
    pub hold_released: Decimal,
    pub role: LiquidityRole,
    pub order_completed: bool,
}

impl FillDelta {
    pub fn notional(&self) -> Decimal {
        self.fill_quantity * self.execution_price
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    pub buy: FillDelta,
    pub sell: FillDelta,
}

impl Trade {
    fn pair(a: FillDelta, b: FillDelta) -> Self {
        if a.side == OrderSide::Buy {
            Self { buy: a, sell: b }
        } else {
            Self { buy: b, sell: a }
        }
    }

    pub fn quantity(&self) -> Decimal {
        self.buy.fill_quantity
    }

    pub fn price(&self) -> Decimal {
        self.buy.execution_price
    }

    pub fn legs(&self) -> [&FillDelta; 2] {
        [&self.buy, &self.sell]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearingResult {
    pub market_id: MarketId,
    pub mode: MatchMode,
    /// Uniform price for a batch auction, VWAP on the tick grid for sweeps
    pub clearing_price: Option<Decimal>,
    pub matched_quantity: Decimal,
    pub trades: Vec<Trade>,
    /// Orders whose unfilled remainder may not rest
    pub cancellations: Vec<OrderHash>,
}

impl ClearingResult {
    pub fn empty(market_id: MarketId, mode: MatchMode) -> Self {
        Self {
            market_id,
            mode,
            clearing_price: None,
            matched_quantity: Decimal::ZERO,
            trades: Vec::new(),
            cancellations: Vec::new(),
        }
    }

    fn from_sweep(market_id: MarketId, mode: MatchMode, trades: Vec<Trade>, tick: Decimal) -> Self {
        let matched_quantity: Decimal = trades.iter().map(Trade::quantity).sum();
        let clearing_price = if matched_quantity.is_zero() {
            None
        } else {
            let notional: Decimal = trades.iter().map(|t| t.quantity() * t.price()).sum();
            Some(round_to_tick(notional / matched_quantity, tick))
        };
        Self {
            market_id,
            mode,
            clearing_price,
            matched_quantity,
            trades,
            cancellations: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty() && self.cancellations.is_empty()
    }

    pub fn legs(&self) -> impl Iterator<Item = &FillDelta> {
        self.trades.iter().flat_map(|t| t.legs())
    }

    pub fn touched_subaccounts(&self) -> BTreeSet<SubaccountId> {
        self.legs().map(|l| l.subaccount).collect()
    }
}

/// Keeps reduce-only fills inside the position they close while a pass runs.
/// Net positions are signed (+long, -short) and move with every fill.
#[derive(Debug, Clone, Default)]
pub struct ReduceOnlyGuard {
    net: BTreeMap<SubaccountId, Decimal>,
}

impl ReduceOnlyGuard {
    pub fn from_positions<'a>(positions: impl IntoIterator<Item = (&'a SubaccountId, &'a Position)>) -> Self {
        let net = positions
            .into_iter()
            .map(|(sub, pos)| (*sub, pos.quantity * pos.direction_sign()))
            .collect();
        Self { net }
    }

    pub fn net_position(&self, subaccount: &SubaccountId) -> Decimal {
        self.net.get(subaccount).copied().unwrap_or_default()
    }

    /// How much of `fillable` the order may trade right now.
    pub fn capacity_with(&self, order: &Order, fillable: Decimal) -> Decimal {
        if !order.is_reduce_only() {
            return fillable;
        }
        let net = self.net_position(&order.subaccount());
        let closable = match order.side {
            OrderSide::Buy => (-net).max(Decimal::ZERO),
            OrderSide::Sell => net.max(Decimal::ZERO),
        };
        fillable.min(closable)
    }

    pub fn capacity(&self, order: &Order) -> Decimal {
        self.capacity_with(order, order.fillable_quantity)
    }

    pub fn record(&mut self, subaccount: SubaccountId, side: OrderSide, quantity: Decimal) {
        *self.net.entry(subaccount).or_default() += side.sign() * quantity;
    }
}

fn fill(order: &mut Order, quantity: Decimal, price: Decimal, role: LiquidityRole) -> FillDelta {
    let share = order.take_fill(quantity);
    FillDelta {
        order_hash: order.hash,
        subaccount: order.subaccount(),
        side: order.side,
        order_type: order.order_type,
        fee_recipient: order.fee_recipient(),
        client_order_id: order.info.client_order_id.clone(),
        fill_quantity: quantity,
        execution_price: price,
        execution_margin: share.execution_margin,
        hold_released: share.hold_released,
        role,
        order_completed: share.completed,
    }
}

/// Walks the opposite side best first, taking makers at their own price
/// until the taker is done or the next maker is beyond `limit`.
fn sweep(book: &mut OrderBook, taker: &mut Order, limit: Decimal, guard: &mut ReduceOnlyGuard) -> Vec<Trade> {
    let mut trades = Vec::new();
    for hash in book.hashes(taker.side.opposite()) {
        let taker_capacity = guard.capacity(taker);
        if taker_capacity.is_zero() {
            break;
        }
        let Some(maker) = book.get_mut(&hash) else {
            continue;
        };
        if !taker.side.accepts(limit, maker.price()) {
            break;
        }
        let maker_capacity = guard.capacity(maker);
        if maker_capacity.is_zero() {
            // reduce-only maker with nothing left to close
            continue;
        }

        let quantity = taker_capacity.min(maker_capacity);
        let price = maker.price();
        let maker_fill = fill(maker, quantity, price, LiquidityRole::Maker);
        guard.record(maker_fill.subaccount, maker_fill.side, quantity);
        let taker_fill = fill(taker, quantity, price, LiquidityRole::Taker);
        guard.record(taker_fill.subaccount, taker_fill.side, quantity);

        if maker_fill.order_completed {
            book.remove(&hash);
        }
        trades.push(Trade::pair(taker_fill, maker_fill));
    }
    trades
}

/// Market order against the resting book. the unfilled remainder is
/// reported for cancellation, market orders never rest.
pub fn match_market_order(
    market_id: MarketId,
    book: &mut OrderBook,
    taker: &mut Order,
    guard: &mut ReduceOnlyGuard,
    tick: Decimal,
) -> ClearingResult {
    let limit = taker.price();
    let trades = sweep(book, taker, limit, guard);
    let mut result = ClearingResult::from_sweep(market_id, MatchMode::MarketSweep, trades, tick);
    if !taker.is_filled() {
        result.cancellations.push(taker.hash);
    }
    result
}

/// Transient limit order against the resting book. post-only orders never take.
pub fn match_transient_against_resting(
    market_id: MarketId,
    book: &mut OrderBook,
    order: &mut Order,
    guard: &mut ReduceOnlyGuard,
    tick: Decimal,
) -> ClearingResult {
    if order.is_post_only() || order.is_market() {
        return ClearingResult::empty(market_id, MatchMode::RestingSweep);
    }
    let limit = order.price();
    let trades = sweep(book, order, limit, guard);
    ClearingResult::from_sweep(market_id, MatchMode::RestingSweep, trades, tick)
}

/// Liquidation order against the resting book. the caller decides what
/// happens to a remainder.
pub fn match_liquidation_order(
    market_id: MarketId,
    book: &mut OrderBook,
    order: &mut Order,
    guard: &mut ReduceOnlyGuard,
    tick: Decimal,
) -> ClearingResult {
    let limit = order.price();
    let trades = sweep(book, order, limit, guard);
    ClearingResult::from_sweep(market_id, MatchMode::Liquidation, trades, tick)
}

/// Dry run of a sweep. returns the quantity that would fill, touches nothing.
pub fn simulate_sweep(book: &OrderBook, taker: &Order, guard: &ReduceOnlyGuard) -> Decimal {
    let mut book = book.clone();
    let mut taker = taker.clone();
    let mut guard = guard.clone();
    let limit = taker.price();
    sweep(&mut book, &mut taker, limit, &mut guard)
        .iter()
        .map(Trade::quantity)
        .sum()
}

/// Uniform price batch auction among transient limit and post-only orders.
///
/// Buys are walked from the highest price, sells from the lowest, earlier
/// admission first within a price. Pairs keep matching while the best
/// remaining buy is at or above the best remaining sell. All matched units
/// clear at one price: the quantity weighted mean of both sides' matched
/// prices, kept inside [highest matched sell, lowest matched buy] and rounded
/// half-even to the price tick. Both legs trade as takers.
pub fn run_batch_auction(
    market_id: MarketId,
    transients: &mut TransientOrders,
    guard: &mut ReduceOnlyGuard,
    tick: Decimal,
) -> ClearingResult {
    let orders = transients.as_mut_slice();
    let eligible = |o: &Order| !o.is_market() && !o.is_filled();

    let mut buys: Vec<usize> = (0..orders.len())
        .filter(|&i| orders[i].side == OrderSide::Buy && eligible(&orders[i]))
        .collect();
    buys.sort_by(|&a, &b| {
        orders[b]
            .price()
            .cmp(&orders[a].price())
            .then(orders[a].sequence.cmp(&orders[b].sequence))
    });
    let mut sells: Vec<usize> = (0..orders.len())
        .filter(|&i| orders[i].side == OrderSide::Sell && eligible(&orders[i]))
        .collect();
    sells.sort_by(|&a, &b| {
        orders[a]
            .price()
            .cmp(&orders[b].price())
            .then(orders[a].sequence.cmp(&orders[b].sequence))
    });

    let mut remaining: Vec<Decimal> = orders.iter().map(|o| o.fillable_quantity).collect();
    let mut matches: Vec<(usize, usize, Decimal)> = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < buys.len() && j < sells.len() {
        let (b, s) = (buys[i], sells[j]);
        if orders[b].price() < orders[s].price() {
            break;
        }
        let buy_capacity = guard.capacity_with(&orders[b], remaining[b]);
        if buy_capacity.is_zero() {
            i += 1;
            continue;
        }
        let sell_capacity = guard.capacity_with(&orders[s], remaining[s]);
        if sell_capacity.is_zero() {
            j += 1;
            continue;
        }

        let quantity = buy_capacity.min(sell_capacity);
        guard.record(orders[b].subaccount(), OrderSide::Buy, quantity);
        guard.record(orders[s].subaccount(), OrderSide::Sell, quantity);
        remaining[b] -= quantity;
        remaining[s] -= quantity;
        matches.push((b, s, quantity));
    }

    let Some(&(last_buy, last_sell, _)) = matches.last() else {
        return ClearingResult::empty(market_id, MatchMode::BatchAuction);
    };

    let matched_quantity: Decimal = matches.iter().map(|m| m.2).sum();
    let weighted: Decimal = matches
        .iter()
        .map(|&(b, s, q)| q * (orders[b].price() + orders[s].price()))
        .sum();
    let lower = orders[last_sell].price();
    let upper = orders[last_buy].price();
    let mean = (weighted / (Decimal::TWO * matched_quantity)).clamp(lower, upper);
    let clearing_price = round_to_tick(mean, tick).clamp(lower, upper);

    let mut trades = Vec::with_capacity(matches.len());
    for (b, s, quantity) in matches {
        let buy = fill(&mut orders[b], quantity, clearing_price, LiquidityRole::Taker);
        let sell = fill(&mut orders[s], quantity, clearing_price, LiquidityRole::Taker);
        trades.push(Trade { buy, sell });
    }

    ClearingResult {
        market_id,
        mode: MatchMode::BatchAuction,
        clearing_price: Some(clearing_price),
        matched_quantity,
        trades,
        cancellations: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::tests::limit_order;
    use crate::order::TimeInForce;
    use crate::types::{AccountId, Price};
    use rust_decimal_macros::dec;

    fn market_buy(owner: u64, worst: Decimal, quantity: Decimal, sequence: u64) -> Order {
        let mut order = limit_order(owner, OrderSide::Buy, worst, quantity, sequence);
        order.time_in_force = TimeInForce::Market;
        order
    }

    #[test]
    fn market_sweep_reports_vwap_and_maker_prices() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(limit_order(1, OrderSide::Sell, dec!(100), dec!(1), 1));
        book.insert(limit_order(2, OrderSide::Sell, dec!(101), dec!(2), 2));

        let mut taker = market_buy(3, dec!(105), dec!(2), 3);
        let mut guard = ReduceOnlyGuard::default();
        let result = match_market_order(MarketId(1), &mut book, &mut taker, &mut guard, dec!(0.01));

        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].sell.execution_price, dec!(100));
        assert_eq!(result.trades[1].sell.execution_price, dec!(101));
        assert_eq!(result.trades[0].sell.role, LiquidityRole::Maker);
        assert_eq!(result.trades[0].buy.role, LiquidityRole::Taker);
        assert_eq!(result.matched_quantity, dec!(2));
        assert_eq!(result.clearing_price, Some(dec!(100.5)));
        assert!(result.cancellations.is_empty());
        assert_eq!(book.len(), 1);
        assert_eq!(book.iter().next().unwrap().fillable_quantity, dec!(1));
    }

    #[test]
    fn market_remainder_is_cancelled() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(limit_order(1, OrderSide::Sell, dec!(100), dec!(1), 1));
        book.insert(limit_order(2, OrderSide::Sell, dec!(110), dec!(1), 2));

        let mut taker = market_buy(3, dec!(105), dec!(3), 3);
        let result = match_market_order(MarketId(1), &mut book, &mut taker, &mut ReduceOnlyGuard::default(), dec!(1));
        assert_eq!(result.matched_quantity, dec!(1));
        assert_eq!(result.cancellations, vec![taker.hash]);
        assert_eq!(taker.fillable_quantity, dec!(2));
    }

    #[test]
    fn post_only_never_takes() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(limit_order(1, OrderSide::Sell, dec!(100), dec!(1), 1));
        let mut order = limit_order(2, OrderSide::Buy, dec!(100), dec!(1), 2);
        order.time_in_force = TimeInForce::PostOnly;

        let result = match_transient_against_resting(
            MarketId(1),
            &mut book,
            &mut order,
            &mut ReduceOnlyGuard::default(),
            dec!(1),
        );
        assert!(result.is_empty());
        assert_eq!(order.fillable_quantity, dec!(1));
    }

    #[test]
    fn reduce_only_fill_capped_by_position() {
        let owner = SubaccountId::new(AccountId(3), 0);
        let position = Position::new(true, dec!(1), Price::new_unchecked(dec!(90)), dec!(9));
        let mut guard = ReduceOnlyGuard::from_positions([(&owner, &position)]);

        let mut book = OrderBook::new(MarketId(1));
        book.insert(limit_order(1, OrderSide::Buy, dec!(100), dec!(5), 1));
        let mut ro = limit_order(3, OrderSide::Sell, dec!(99), dec!(2), 2);
        ro.order_type = OrderType::ReduceOnly;

        let result = match_transient_against_resting(MarketId(1), &mut book, &mut ro, &mut guard, dec!(1));
        assert_eq!(result.matched_quantity, dec!(1));
        assert_eq!(ro.fillable_quantity, dec!(1));
        assert_eq!(guard.net_position(&owner), dec!(0));
        assert_eq!(guard.capacity(&ro), dec!(0));
    }

    #[test]
    fn batch_auction_uniform_price() {
        let mut transients = TransientOrders::new();
        transients.push(limit_order(1, OrderSide::Buy, dec!(102), dec!(1), 1));
        transients.push(limit_order(2, OrderSide::Buy, dec!(101), dec!(1), 2));
        transients.push(limit_order(3, OrderSide::Sell, dec!(99), dec!(1), 3));
        transients.push(limit_order(4, OrderSide::Sell, dec!(100), dec!(1), 4));

        let result = run_batch_auction(MarketId(1), &mut transients, &mut ReduceOnlyGuard::default(), dec!(0.5));
        // mean of 102, 99, 101, 100 inside [100, 101]
        assert_eq!(result.clearing_price, Some(dec!(100.5)));
        assert_eq!(result.matched_quantity, dec!(2));
        assert!(result.legs().all(|l| l.execution_price == dec!(100.5)));
        assert!(result.legs().all(|l| l.role == LiquidityRole::Taker));
    }

    #[test]
    fn batch_auction_rounds_half_even_inside_band() {
        let mut transients = TransientOrders::new();
        transients.push(limit_order(1, OrderSide::Buy, dec!(102), dec!(1), 1));
        transients.push(limit_order(2, OrderSide::Buy, dec!(101), dec!(1), 2));
        transients.push(limit_order(3, OrderSide::Sell, dec!(99), dec!(1), 3));
        transients.push(limit_order(4, OrderSide::Sell, dec!(100), dec!(1), 4));

        let result = run_batch_auction(MarketId(1), &mut transients, &mut ReduceOnlyGuard::default(), dec!(1));
        assert_eq!(result.clearing_price, Some(dec!(100)));
    }

    #[test]
    fn batch_auction_fifo_within_price() {
        let mut transients = TransientOrders::new();
        let buy = limit_order(1, OrderSide::Buy, dec!(100), dec!(1.5), 1);
        let early = limit_order(2, OrderSide::Sell, dec!(100), dec!(1), 2);
        let late = limit_order(3, OrderSide::Sell, dec!(100), dec!(1), 3);
        transients.push(buy);
        transients.push(late.clone());
        transients.push(early.clone());
        // admission sequence decides, not vector position
        transients.as_mut_slice()[1].sequence = 3;
        transients.as_mut_slice()[2].sequence = 2;

        let result = run_batch_auction(MarketId(1), &mut transients, &mut ReduceOnlyGuard::default(), dec!(1));
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].sell.order_hash, early.hash);
        assert_eq!(result.trades[0].sell.fill_quantity, dec!(1));
        assert_eq!(result.trades[1].sell.order_hash, late.hash);
        assert_eq!(result.trades[1].sell.fill_quantity, dec!(0.5));
        assert_eq!(transients.get(&late.hash).unwrap().fillable_quantity, dec!(0.5));
    }

    #[test]
    fn batch_auction_no_cross() {
        let mut transients = TransientOrders::new();
        transients.push(limit_order(1, OrderSide::Buy, dec!(99), dec!(1), 1));
        transients.push(limit_order(2, OrderSide::Sell, dec!(100), dec!(1), 2));
        let result = run_batch_auction(MarketId(1), &mut transients, &mut ReduceOnlyGuard::default(), dec!(1));
        assert!(result.trades.is_empty());
        assert_eq!(result.clearing_price, None);
    }

    #[test]
    fn simulation_leaves_book_untouched() {
        let mut book = OrderBook::new(MarketId(1));
        book.insert(limit_order(1, OrderSide::Buy, dec!(100), dec!(1), 1));
        let mut taker = limit_order(2, OrderSide::Sell, dec!(95), dec!(2), 2);
        taker.time_in_force = TimeInForce::Market;

        let filled = simulate_sweep(&book, &taker, &ReduceOnlyGuard::default());
        assert_eq!(filled, dec!(1));
        assert_eq!(book.iter().next().unwrap().fillable_quantity, dec!(1));
        assert_eq!(taker.fillable_quantity, dec!(2));
    }
}
