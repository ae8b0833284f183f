// 8.6: reduce-only enforcement. runs whenever a position shrinks, closes, or a
// vanilla order lands on its closing side.

use super::core::Exchange;
use super::results::ExchangeError;
use crate::events::CancelReason;
use crate::oracle::PriceOracle;
use crate::order::Order;
use crate::reduce_only::{excess_reduce_only, QueueEntry};
use crate::types::{MarketId, OrderHash, SubaccountId};
use tracing::warn;

impl<O: PriceOracle> Exchange<O> {
    /// Cancels the subaccount's reduce-only orders the position no longer
    /// backs, worst priced first. returns the cancelled hashes.
    pub(super) fn enforce_reduce_only(
        &mut self,
        market_id: MarketId,
        subaccount: SubaccountId,
    ) -> Result<Vec<OrderHash>, ExchangeError> {
        let orders = self.state.orders_of(market_id, &subaccount);
        if !orders.iter().any(|o| o.is_reduce_only()) {
            return Ok(Vec::new());
        }

        let (doomed, reason) = match self.state.position(market_id, &subaccount).filter(|p| !p.is_empty()) {
            None => (
                orders.iter().filter(|o| o.is_reduce_only()).map(|o| o.hash).collect(),
                CancelReason::PositionClosed,
            ),
            Some(position) => {
                let closing = position.closing_side();
                // a flipped position leaves reduce-only orders pointing the wrong way
                let mut doomed: Vec<OrderHash> = orders
                    .iter()
                    .filter(|o| o.is_reduce_only() && o.side != closing)
                    .map(|o| o.hash)
                    .collect();
                let entries: Vec<QueueEntry> = orders
                    .iter()
                    .filter(|o| o.side == closing)
                    .map(|o| QueueEntry::from_order(o))
                    .collect();
                doomed.extend(excess_reduce_only(position.quantity, &entries));
                (doomed, CancelReason::ReduceOnlyEvicted)
            }
        };

        if !doomed.is_empty() {
            warn!(
                market = %market_id,
                subaccount = %subaccount,
                count = doomed.len(),
                reason = ?reason,
                "reduce-only orders over position"
            );
        }
        for hash in &doomed {
            self.cancel_order_internal(market_id, hash, reason)?;
        }
        Ok(doomed)
    }

    /// Reduce-only orders of the owner that `incoming` would push out once
    /// it lands. nothing is written.
    pub(super) fn reduce_only_squeezed_by(&self, incoming: &Order) -> Vec<OrderHash> {
        if !incoming.kind.is_derivative() || incoming.is_reduce_only() {
            return Vec::new();
        }
        let subaccount = incoming.subaccount();
        let Some(position) = self
            .state
            .position(incoming.market_id, &subaccount)
            .filter(|p| !p.is_empty() && p.closing_side() == incoming.side)
        else {
            return Vec::new();
        };
        let mut entries: Vec<QueueEntry> = self
            .state
            .orders_of(incoming.market_id, &subaccount)
            .into_iter()
            .filter(|o| o.side == incoming.side)
            .map(QueueEntry::from_order)
            .collect();
        entries.push(QueueEntry::from_order(incoming));
        excess_reduce_only(position.quantity, &entries)
    }
}
