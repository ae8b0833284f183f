// 8.9: per block matching. one market at a time, in four phases:
//   1. market orders sweep the resting book in admission order
//   2. transient limit orders take what crosses on the resting book
//   3. the remaining transient limit and post-only orders clear in one
//      uniform price batch auction
//   4. what is left of the limit orders is promoted to the resting book
// reduce-only orders of every subaccount whose position moved are then
// re-validated. an uncovered loss halts the market with a forced settlement.

use super::core::Exchange;
use super::results::{BlockMatchingReport, EndBlockReport, ExchangeError, PassSummary};
use crate::events::{BlockMatchedEvent, CancelReason, EventPayload};
use crate::market::{Market, MarketKind, MarketStatus};
use crate::matching::{
    match_market_order, match_transient_against_resting, run_batch_auction, ClearingResult, MatchMode,
    ReduceOnlyGuard,
};
use crate::oracle::PriceOracle;
use crate::order::Order;
use crate::orderbook::OrderBook;
use crate::types::{MarketId, OrderHash, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use tracing::{info, info_span};

/// Status a market takes when an uncovered loss stops it.
pub(super) fn halted_status(market: &Market) -> MarketStatus {
    match market.kind {
        MarketKind::Expiry { .. } | MarketKind::BinaryOption { .. } => MarketStatus::Expired,
        _ => MarketStatus::Paused,
    }
}

/// Running totals of one block pass over a market.
struct BlockPass {
    report: BlockMatchingReport,
    touched: BTreeSet<SubaccountId>,
    uncovered: Decimal,
}

impl<O: PriceOracle> Exchange<O> {
    /// Matches and settles everything admitted to `market_id` this block.
    pub fn run_block_matching(&mut self, market_id: MarketId) -> Result<BlockMatchingReport, ExchangeError> {
        let market = self
            .state
            .markets
            .get(&market_id)
            .cloned()
            .ok_or(ExchangeError::InvalidMarket(market_id))?;
        let span = info_span!("block_matching", market = %market_id);
        let _entered = span.enter();

        let mut pass = BlockPass {
            report: BlockMatchingReport::empty(market_id),
            touched: BTreeSet::new(),
            uncovered: Decimal::ZERO,
        };
        if !market.is_active() {
            return Ok(pass.report);
        }
        let tick = market.min_price_tick_size;
        let mut guard = ReduceOnlyGuard::from_positions(self.state.positions_in(market_id));

        // 1: market orders
        for hash in self.transient_hashes(market_id, Order::is_market) {
            let result = {
                let state = &mut self.state;
                let book = state.books.entry(market_id).or_insert_with(|| OrderBook::new(market_id));
                match state.transients.get_mut(&market_id).and_then(|t| t.get_mut(&hash)) {
                    Some(order) => match_market_order(market_id, book, order, &mut guard, tick),
                    None => continue,
                }
            };
            self.apply_pass(&market, result, &mut pass)?;
        }

        // 2: transient limits against the resting book
        let takers = self.transient_hashes(market_id, |o| !o.is_market() && !o.is_post_only());
        for hash in takers {
            let result = {
                let state = &mut self.state;
                let book = state.books.entry(market_id).or_insert_with(|| OrderBook::new(market_id));
                match state.transients.get_mut(&market_id).and_then(|t| t.get_mut(&hash)) {
                    Some(order) if !order.is_filled() => {
                        match_transient_against_resting(market_id, book, order, &mut guard, tick)
                    }
                    _ => continue,
                }
            };
            self.apply_pass(&market, result, &mut pass)?;
        }

        // 3: batch auction among what is left
        let result = match self.state.transients.get_mut(&market_id) {
            Some(transients) => run_batch_auction(market_id, transients, &mut guard, tick),
            None => ClearingResult::empty(market_id, MatchMode::BatchAuction),
        };
        pass.report.auction_clearing_price = result.clearing_price;
        self.apply_pass(&market, result, &mut pass)?;

        // 4: promotion. market orders never rest
        for hash in self.transient_hashes(market_id, Order::is_market) {
            if self.cancel_order_internal(market_id, &hash, CancelReason::Unfilled)?.is_some() {
                pass.report.cancelled.push(hash);
            }
        }
        let leftovers = self
            .state
            .transients
            .get_mut(&market_id)
            .map(|t| t.take_all())
            .unwrap_or_default();
        let book = self.state.books.entry(market_id).or_insert_with(|| OrderBook::new(market_id));
        for order in leftovers.into_iter().filter(|o| !o.is_filled()) {
            pass.report.promoted.push(order.hash);
            book.insert(order);
        }

        for subaccount in std::mem::take(&mut pass.touched) {
            let evicted = self.enforce_reduce_only(market_id, subaccount)?;
            pass.report.cancelled.extend(evicted);
        }

        if market.kind == MarketKind::Perpetual {
            let traded = pass
                .report
                .auction_clearing_price
                .or_else(|| pass.report.passes.iter().rev().find_map(|p| p.clearing_price));
            if let Some(price) = traded {
                self.record_funding_premium(market_id, price);
            }
        }

        // the loss is already booked, so this cannot wait for an oracle the
        // way expiry does: fall back to what the block itself traded at
        if pass.uncovered > Decimal::ZERO {
            let price = self
                .mark_price(market_id)
                .or(pass.report.auction_clearing_price)
                .or_else(|| pass.report.passes.iter().rev().find_map(|p| p.clearing_price))
                .ok_or(ExchangeError::NoMarkPrice(market_id))?;
            let settlement = self.settle_market_at(market_id, price, halted_status(&market))?;
            pass.report.forced_settlement = Some(settlement);
        }

        let report = pass.report;
        info!(
            matched_quantity = %report.matched_quantity,
            auction_price = ?report.auction_clearing_price,
            promoted = report.promoted.len(),
            cancelled = report.cancelled.len(),
            fees = %report.fees_collected,
            "block matched"
        );
        Ok(report)
    }

    /// Promotes triggered conditional orders, runs every active market in id
    /// order, settles due funding, then settles expired markets.
    pub fn end_block(&mut self, now: Timestamp) -> Result<EndBlockReport, ExchangeError> {
        self.set_time(now);
        let mut report = EndBlockReport::default();
        report.triggered = self.trigger_conditional_orders()?;

        let active: Vec<MarketId> = self
            .state
            .markets
            .values()
            .filter(|m| m.is_active())
            .map(|m| m.id)
            .collect();
        for market_id in active {
            report.matching.push(self.run_block_matching(market_id)?);
        }
        report.funding = self.settle_due_funding()?;
        report.expired = self.settle_expired_markets(now)?;
        Ok(report)
    }

    fn transient_hashes(&self, market_id: MarketId, keep: impl Fn(&Order) -> bool) -> Vec<OrderHash> {
        self.state
            .transients
            .get(&market_id)
            .map(|t| t.iter().filter(|o| keep(o)).map(|o| o.hash).collect())
            .unwrap_or_default()
    }

    fn apply_pass(&mut self, market: &Market, result: ClearingResult, pass: &mut BlockPass) -> Result<(), ExchangeError> {
        let outcome = self.settle_clearing(market, &result, false)?;
        for hash in &result.cancellations {
            if self.cancel_order_internal(market.id, hash, CancelReason::Unfilled)?.is_some() {
                pass.report.cancelled.push(*hash);
            }
        }
        if let Some(transients) = self.state.transients.get_mut(&market.id) {
            transients.prune_filled();
        }
        if result.trades.is_empty() {
            return Ok(());
        }

        pass.report.fees_collected += outcome.fees_collected();
        pass.uncovered += outcome.uncovered();
        pass.report.matched_quantity += result.matched_quantity;
        pass.touched.extend(result.touched_subaccounts());
        pass.report.passes.push(PassSummary::from(&result));

        info!(
            phase = ?result.mode,
            matched_quantity = %result.matched_quantity,
            clearing_price = ?result.clearing_price,
            trades = result.trades.len(),
            "matching pass"
        );
        self.emit_event(EventPayload::BlockMatched(BlockMatchedEvent {
            market_id: market.id,
            mode: result.mode,
            clearing_price: result.clearing_price,
            matched_quantity: result.matched_quantity,
        }));
        Ok(())
    }
}
