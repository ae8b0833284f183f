// 8.7: conditional orders. parked off the book with no hold until mark
// reaches the trigger, then admitted through the ordinary path into the
// block's transient set. an admission failure at trigger time drops the order.

use super::core::Exchange;
use super::results::{ExchangeError, TriggerOutcome};
use crate::conditional::{process_triggers, ConditionalOrder, ConditionalOrderBook};
use crate::events::{
    CancelReason, ConditionalOrderPlacedEvent, ConditionalOrderTriggeredEvent, EventPayload, OrderCancelledEvent,
};
use crate::margin::check_order_margin;
use crate::market::MarketKind;
use crate::oracle::PriceOracle;
use crate::order::{compute_order_hash, OrderRequest, OrderType, TimeInForce};
use crate::types::{MarketId, OrderHash, SubaccountId};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

impl<O: PriceOracle> Exchange<O> {
    /// Parks `request` until mark reaches `trigger_price`. a trigger above
    /// mark fires when mark rises to it, one below when mark falls to it.
    ///
    /// Nothing is held. Funds and margin are checked again when the order
    /// fires, a reduce-only order only needs a position or a live order in
    /// the market to be parked.
    pub fn place_conditional_order(
        &mut self,
        request: OrderRequest,
        trigger_price: Decimal,
    ) -> Result<OrderHash, ExchangeError> {
        let market = self.active_market(request.market_id)?;
        let market_id = market.id;
        let subaccount = request.subaccount;
        market.validate_price(request.price)?;
        market.validate_quantity(request.quantity)?;
        market.validate_price(trigger_price)?;
        let mark_price = self.mark_price(market_id).ok_or(ExchangeError::NoMarkPrice(market_id))?;

        let limit = self.state.params.max_orders_per_side;
        if self.state.count_orders(market_id, &subaccount, request.side) >= limit {
            return Err(ExchangeError::TooManyOrders(limit));
        }
        match request.order_type {
            OrderType::ReduceOnly => {
                let has_position = self
                    .state
                    .position(market_id, &subaccount)
                    .is_some_and(|p| !p.is_empty());
                let has_orders = !self.state.orders_of(market_id, &subaccount).is_empty();
                if !market.is_derivative() || !(has_position || has_orders) {
                    return Err(ExchangeError::NoPositionToReduce);
                }
            }
            OrderType::Vanilla => {
                if matches!(market.kind, MarketKind::Perpetual | MarketKind::Expiry { .. }) {
                    check_order_margin(&market, request.side, request.price, request.quantity, request.margin, None)?;
                }
            }
        }

        let nonce = self.state.nonces.get(&subaccount).copied().unwrap_or_default() + 1;
        let hash = compute_order_hash(&subaccount, market_id, request.side, request.price, request.quantity, nonce);
        let order = ConditionalOrder::new(hash, request, trigger_price, mark_price, self.state.next_sequence)?;
        self.state.next_nonce(subaccount);
        self.state.next_sequence();

        debug!(
            market = %market_id,
            subaccount = %subaccount,
            order = %hash,
            trigger = %trigger_price,
            kind = ?order.kind,
            "conditional order parked"
        );
        self.emit_event(EventPayload::ConditionalOrderPlaced(ConditionalOrderPlacedEvent {
            market_id,
            order_hash: hash,
            subaccount,
            side: order.side(),
            trigger_price,
            kind: order.kind,
        }));
        self.state
            .conditionals
            .entry(market_id)
            .or_insert_with(|| ConditionalOrderBook::new(market_id))
            .insert(order);
        Ok(hash)
    }

    pub fn conditional_order(&self, market_id: MarketId, hash: &OrderHash) -> Option<&ConditionalOrder> {
        self.state.conditionals.get(&market_id).and_then(|b| b.get(hash))
    }

    /// Drops a parked order. nothing was held so nothing is released.
    pub(super) fn cancel_conditional_internal(
        &mut self,
        market_id: MarketId,
        hash: &OrderHash,
        reason: CancelReason,
    ) -> Option<ConditionalOrder> {
        let order = self.state.conditionals.get_mut(&market_id)?.remove(hash)?;
        debug!(market = %market_id, order = %hash, reason = ?reason, "conditional order cancelled");
        self.emit_event(EventPayload::OrderCancelled(OrderCancelledEvent {
            market_id,
            order_hash: *hash,
            subaccount: order.subaccount(),
            released: Decimal::ZERO,
            reason,
        }));
        Some(order)
    }

    pub(super) fn conditional_hashes_of(&self, market_id: MarketId, subaccount: &SubaccountId) -> Vec<OrderHash> {
        self.state
            .conditional_orders_of(market_id, subaccount)
            .iter()
            .map(|o| o.hash)
            .collect()
    }

    /// Admits every conditional order whose trigger mark has reached, markets
    /// in id order and orders in placement order.
    pub(super) fn trigger_conditional_orders(&mut self) -> Result<Vec<TriggerOutcome>, ExchangeError> {
        let markets: Vec<MarketId> = self
            .state
            .conditionals
            .iter()
            .filter(|(id, book)| !book.is_empty() && self.state.markets.get(id).is_some_and(|m| m.is_active()))
            .map(|(id, _)| *id)
            .collect();

        let mut outcomes = Vec::new();
        for market_id in markets {
            let Some(mark_price) = self.mark_price(market_id) else {
                continue;
            };
            let fired = match self.state.conditionals.get_mut(&market_id) {
                Some(book) => process_triggers(book, mark_price),
                None => continue,
            };
            for conditional in fired {
                let subaccount = conditional.subaccount();
                let request = conditional.request.clone();
                let admitted = if request.time_in_force == TimeInForce::Market {
                    self.place_market_order(request)
                } else {
                    self.place_limit_order(request)
                };
                match &admitted {
                    Err(err) if err.is_fatal() => return Err(err.clone()),
                    Err(err) => warn!(
                        market = %market_id,
                        subaccount = %subaccount,
                        order = %conditional.hash,
                        error = %err,
                        "triggered order refused"
                    ),
                    Ok(hash) => info!(
                        market = %market_id,
                        subaccount = %subaccount,
                        order = %conditional.hash,
                        admitted = %hash,
                        mark_price = %mark_price,
                        "conditional order triggered"
                    ),
                }
                self.emit_event(EventPayload::ConditionalOrderTriggered(ConditionalOrderTriggeredEvent {
                    market_id,
                    order_hash: conditional.hash,
                    subaccount,
                    mark_price,
                    admitted: admitted.as_ref().ok().copied(),
                    rejection: admitted.as_ref().err().map(|e| e.to_string()),
                }));
                outcomes.push(TriggerOutcome {
                    market_id,
                    conditional: conditional.hash,
                    admitted,
                });
            }
        }
        Ok(outcomes)
    }
}
