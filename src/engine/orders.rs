// 8.5: order admission, cancellation and batch updates.
// admission is split in two: `prepare_order` checks everything and prices the
// hold without touching state, `commit_order` applies it. liquidation uses the
// split to dry run a supplied order before anything moves.

use super::core::Exchange;
use super::results::{BatchUpdate, BatchUpdateResult, ExchangeError, OrderSelector};
use crate::deposit::Ledger;
use crate::events::{CancelReason, EventPayload, OrderCancelledEvent, OrderPlacedEvent};
use crate::margin::{check_order_margin, effective_margin, order_hold};
use crate::market::{Market, MarketKind};
use crate::oracle::PriceOracle;
use crate::orderbook::OrderBook;
use crate::order::{
    compute_order_hash, Order, OrderHold, OrderInfo, OrderKind, OrderRequest, OrderType, TimeInForce,
};
use crate::reduce_only::{admit_reduce_only, QueueEntry};
use crate::state::OrderLocation;
use crate::types::{MarketId, OrderHash, SubaccountId};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// A checked order ready to be applied.
#[derive(Debug, Clone)]
pub(super) struct PreparedOrder {
    pub order: Order,
    /// Reduce-only orders of the same owner that make room for this one
    pub evict: Vec<OrderHash>,
}

pub(super) fn order_kind(market: &Market, margin: Decimal) -> OrderKind {
    match market.kind {
        MarketKind::Spot => OrderKind::Spot,
        MarketKind::Perpetual => OrderKind::Perpetual { margin },
        MarketKind::Expiry { expiry } => OrderKind::Expiry { margin, expiry },
        MarketKind::BinaryOption { expiry } => OrderKind::BinaryOption { margin, expiry },
    }
}

impl<O: PriceOracle> Exchange<O> {
    /// Admits a limit or post-only order into this block's transient set.
    pub fn place_limit_order(&mut self, mut request: OrderRequest) -> Result<OrderHash, ExchangeError> {
        if request.time_in_force == TimeInForce::Market {
            request.time_in_force = TimeInForce::Limit;
        }
        let prepared = self.prepare_order(&request)?;
        self.commit_order(prepared, OrderLocation::Transient)
    }

    /// Admits a market order. `request.price` is the worst acceptable price.
    /// refused up front when nothing on the resting book is within it.
    pub fn place_market_order(&mut self, mut request: OrderRequest) -> Result<OrderHash, ExchangeError> {
        request.time_in_force = TimeInForce::Market;
        let prepared = self.prepare_order(&request)?;

        let reachable = self
            .state
            .books
            .get(&request.market_id)
            .and_then(|book| book.best_price(request.side.opposite()))
            .is_some_and(|best| request.side.accepts(request.price, best));
        if !reachable {
            return Err(ExchangeError::NoLiquidity {
                required: prepared.order.quantity(),
                available: Decimal::ZERO,
            });
        }
        self.commit_order(prepared, OrderLocation::Transient)
    }

    /// Every admission check. nothing is written.
    pub(super) fn prepare_order(&self, request: &OrderRequest) -> Result<PreparedOrder, ExchangeError> {
        let market = self.active_market(request.market_id)?;
        let market_id = market.id;
        let subaccount = request.subaccount;
        let side = request.side;

        let price = market.validate_price(request.price)?;
        market.validate_quantity(request.quantity)?;

        if let Some(cid) = &request.client_order_id {
            if self.state.hash_for_client_id(market_id, subaccount, cid).is_some() {
                return Err(ExchangeError::DuplicateClientOrderId(cid.clone()));
            }
        }

        let limit = self.state.params.max_orders_per_side;
        if self.state.count_orders(market_id, &subaccount, side) >= limit {
            return Err(ExchangeError::TooManyOrders(limit));
        }

        // resting book only, same block transients do not count
        if request.time_in_force == TimeInForce::PostOnly {
            let crosses = self
                .state
                .books
                .get(&market_id)
                .and_then(|book| book.best_price(side.opposite()))
                .is_some_and(|best| side.accepts(request.price, best));
            if crosses {
                return Err(ExchangeError::PostOnlyCrossesBook);
            }
        }

        let nonce = self.state.nonces.get(&subaccount).copied().unwrap_or_default() + 1;
        let sequence = self.state.next_sequence;
        let hash = compute_order_hash(&subaccount, market_id, side, request.price, request.quantity, nonce);

        let (quantity, evict) = match request.order_type {
            OrderType::ReduceOnly => {
                if !market.is_derivative() {
                    return Err(ExchangeError::NoPositionToReduce);
                }
                let existing: Vec<QueueEntry> = self
                    .state
                    .orders_of(market_id, &subaccount)
                    .into_iter()
                    .map(QueueEntry::from_order)
                    .collect();
                let entry = QueueEntry {
                    hash,
                    side,
                    price: request.price,
                    sequence,
                    quantity: request.quantity,
                    reduce_only: true,
                };
                let plan = admit_reduce_only(self.state.position(market_id, &subaccount), &entry, &existing)?;
                (plan.quantity, plan.evict)
            }
            OrderType::Vanilla => (request.quantity, Vec::new()),
        };

        let margin = effective_margin(&market, side, request.order_type, request.price, quantity, request.margin);
        if request.order_type == OrderType::Vanilla
            && matches!(market.kind, MarketKind::Perpetual | MarketKind::Expiry { .. })
        {
            check_order_margin(&market, side, request.price, quantity, margin, self.mark_price(market_id))?;
        }

        let (denom, hold) = order_hold(&market, side, request.order_type, request.price, quantity, margin);
        let available = self.state.deposits.get_balance(&subaccount, &denom).available;
        if hold > available {
            return Err(ExchangeError::InsufficientFunds {
                subaccount,
                denom,
                available,
                required: hold,
            });
        }

        let order = Order {
            hash,
            market_id,
            side,
            info: OrderInfo {
                subaccount,
                fee_recipient: request.fee_recipient,
                price,
                quantity,
                client_order_id: request.client_order_id.clone(),
            },
            kind: order_kind(&market, margin),
            order_type: request.order_type,
            time_in_force: request.time_in_force,
            fillable_quantity: quantity,
            hold: OrderHold::new(denom, hold),
            margin_remaining: margin,
            sequence,
        };
        Ok(PreparedOrder { order, evict })
    }

    /// Applies a prepared order: evictions, the hold, then storage.
    pub(super) fn commit_order(
        &mut self,
        prepared: PreparedOrder,
        location: OrderLocation,
    ) -> Result<OrderHash, ExchangeError> {
        let PreparedOrder { order, evict } = prepared;
        let market_id = order.market_id;
        let subaccount = order.subaccount();

        for hash in &evict {
            self.cancel_order_internal(market_id, hash, CancelReason::ReduceOnlyEvicted)?;
        }

        self.state.next_nonce(subaccount);
        self.state.next_sequence();
        if order.hold.total > Decimal::ZERO {
            self.state
                .deposits
                .hold(&subaccount, &order.hold.denom, order.hold.total)?;
        }
        self.state.index_client_id(&order);

        debug!(
            market = %market_id,
            subaccount = %subaccount,
            order = %order.hash,
            side = ?order.side,
            price = %order.price(),
            quantity = %order.quantity(),
            hold = %order.hold.total,
            "order admitted"
        );
        self.emit_event(EventPayload::OrderPlaced(OrderPlacedEvent {
            market_id,
            order_hash: order.hash,
            subaccount,
            side: order.side,
            price: order.price(),
            quantity: order.quantity(),
            hold: order.hold.total,
            reduce_only: order.is_reduce_only(),
        }));

        let hash = order.hash;
        let squeezes_reduce_only = order.kind.is_derivative()
            && !order.is_reduce_only()
            && self
                .state
                .position(market_id, &subaccount)
                .is_some_and(|p| p.closing_side() == order.side);

        match location {
            OrderLocation::Transient => self.state.transients.entry(market_id).or_default().push(order),
            OrderLocation::Resting => self
                .state
                .books
                .entry(market_id)
                .or_insert_with(|| OrderBook::new(market_id))
                .insert(order),
        }

        // a better priced vanilla order can push reduce-only orders out
        if squeezes_reduce_only {
            self.enforce_reduce_only(market_id, subaccount)?;
        }
        Ok(hash)
    }

    /// Cancels one of the subaccount's orders by hash or client order id. a
    /// hash may also name a parked conditional order.
    pub fn cancel_order(
        &mut self,
        market_id: MarketId,
        subaccount: SubaccountId,
        selector: OrderSelector,
    ) -> Result<(), ExchangeError> {
        if !self.state.markets.contains_key(&market_id) {
            return Err(ExchangeError::InvalidMarket(market_id));
        }
        let hash = match selector {
            OrderSelector::Hash(hash) => hash,
            OrderSelector::ClientId(cid) => self
                .state
                .hash_for_client_id(market_id, subaccount, &cid)
                .ok_or(ExchangeError::OrderNotFound)?,
        };
        let owned = self
            .state
            .find_order(market_id, &hash)
            .is_some_and(|(order, _)| order.subaccount() == subaccount);
        if owned {
            self.cancel_order_internal(market_id, &hash, CancelReason::UserRequested)?;
            return Ok(());
        }
        let parked = self
            .conditional_order(market_id, &hash)
            .is_some_and(|order| order.subaccount() == subaccount);
        if !parked {
            return Err(ExchangeError::OrderNotFound);
        }
        self.cancel_conditional_internal(market_id, &hash, CancelReason::UserRequested);
        Ok(())
    }

    /// Cancels every order of the subaccount in a market. returns how many went.
    pub fn cancel_all_orders(
        &mut self,
        market_id: MarketId,
        subaccount: SubaccountId,
    ) -> Result<usize, ExchangeError> {
        if !self.state.markets.contains_key(&market_id) {
            return Err(ExchangeError::InvalidMarket(market_id));
        }
        self.cancel_orders_of(market_id, subaccount, CancelReason::UserRequested)
    }

    pub(super) fn cancel_orders_of(
        &mut self,
        market_id: MarketId,
        subaccount: SubaccountId,
        reason: CancelReason,
    ) -> Result<usize, ExchangeError> {
        let hashes = self.state.order_hashes_of(market_id, &subaccount);
        for hash in &hashes {
            self.cancel_order_internal(market_id, hash, reason)?;
        }
        let parked = self.conditional_hashes_of(market_id, &subaccount);
        for hash in &parked {
            self.cancel_conditional_internal(market_id, hash, reason);
        }
        Ok(hashes.len() + parked.len())
    }

    /// Removes an order and gives its remaining hold back. a missing order is
    /// not an error here, callers racing a fill just get `None`.
    pub(super) fn cancel_order_internal(
        &mut self,
        market_id: MarketId,
        hash: &OrderHash,
        reason: CancelReason,
    ) -> Result<Option<Order>, ExchangeError> {
        let Some(order) = self.state.remove_order(market_id, hash) else {
            return Ok(None);
        };
        let subaccount = order.subaccount();
        let released = order.hold.remaining;
        if released > Decimal::ZERO {
            self.state.deposits.release(&subaccount, &order.hold.denom, released)?;
        }

        match reason {
            CancelReason::ReduceOnlyEvicted | CancelReason::DeficitCoverage => {
                warn!(market = %market_id, subaccount = %subaccount, order = %hash, reason = ?reason, "order cancelled")
            }
            _ => debug!(market = %market_id, subaccount = %subaccount, order = %hash, reason = ?reason, "order cancelled"),
        }
        self.emit_event(EventPayload::OrderCancelled(OrderCancelledEvent {
            market_id,
            order_hash: *hash,
            subaccount,
            released,
            reason,
        }));
        Ok(Some(order))
    }

    /// Cancel-all markets, then cancels, then creates. every item gets its own
    /// result and a failure never stops the rest.
    pub fn batch_update(&mut self, batch: BatchUpdate) -> BatchUpdateResult {
        let BatchUpdate {
            subaccount,
            cancel_all_markets,
            cancels,
            creates,
        } = batch;
        let mut result = BatchUpdateResult::default();

        for market_id in cancel_all_markets {
            result.cancel_all.push(self.cancel_all_orders(market_id, subaccount));
        }
        for (market_id, selector) in cancels {
            result.cancels.push(self.cancel_order(market_id, subaccount, selector));
        }
        for request in creates {
            let created = if request.subaccount != subaccount {
                Err(ExchangeError::SubaccountMismatch {
                    expected: subaccount,
                    found: request.subaccount,
                })
            } else if request.time_in_force == TimeInForce::Market {
                self.place_market_order(request)
            } else {
                self.place_limit_order(request)
            };
            result.creates.push(created);
        }

        debug!(
            subaccount = %subaccount,
            cancels = result.cancels.len(),
            creates = result.creates.len(),
            failed = result.cancels.iter().filter(|r| r.is_err()).count()
                + result.creates.iter().filter(|r| r.is_err()).count(),
            "batch update"
        );
        result
    }
}
