// 8.10: liquidation and the settlement fallbacks behind it.
//
// liquidation is all or nothing: a dry run on a copy of the book must fill
// the whole position before anything is written. the deficit chain is
// available -> order holds -> insurance fund; a loss past the insurance fund
// force settles the whole market at mark with positive payouts haircut.

use super::block::halted_status;
use super::core::Exchange;
use super::orders::order_kind;
use super::results::{DeficitCoverage, EmergencySettleResult, ExchangeError, LiquidationResult, MarketSettlementReport};
use crate::deposit::{InvariantViolation, Ledger};
use crate::events::{CancelReason, EventPayload, LiquidationEvent, MarketSettledEvent, PositionClosedEvent};
use crate::insurance::InsuranceFundStore;
use crate::liquidation::{evaluate_liquidation, is_liquidatable, liquidation_worst_price, LiquidationStatus};
use crate::market::MarketStatus;
use crate::matching::{match_liquidation_order, simulate_sweep, ReduceOnlyGuard};
use crate::oracle::PriceOracle;
use crate::order::{compute_order_hash, Order, OrderHold, OrderInfo, OrderRequest, OrderType, TimeInForce};
use crate::orderbook::OrderBook;
use crate::socialized_loss::apply_haircut;
use crate::state::OrderLocation;
use crate::types::{MarketId, OrderHash, Price, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

impl<O: PriceOracle> Exchange<O> {
    /// Closes an undercollateralized position with a reduce-only market
    /// order at the liquidation worst price. `supplied` is one extra order,
    /// from anyone but the owner, that joins the book for this attempt.
    pub fn liquidate(
        &mut self,
        subaccount: SubaccountId,
        market_id: MarketId,
        supplied: Option<OrderRequest>,
    ) -> Result<LiquidationResult, ExchangeError> {
        let market = self.active_market(market_id)?;
        if !market.is_derivative() {
            return Err(ExchangeError::InvalidMarket(market_id));
        }
        let position = self
            .state
            .position(market_id, &subaccount)
            .cloned()
            .ok_or(ExchangeError::PositionNotFound)?;
        let mark_price = self.mark_price(market_id).ok_or(ExchangeError::NoMarkPrice(market_id))?;
        if !is_liquidatable(&position, mark_price, &market) {
            return Err(ExchangeError::PositionNotLiquidatable);
        }
        let prepared = match &supplied {
            Some(request) if request.subaccount == subaccount => return Err(ExchangeError::SelfLiquidation),
            Some(request) => Some(self.prepare_order(request)?),
            None => None,
        };

        let side = position.closing_side();
        let worst_price = liquidation_worst_price(&position, mark_price, market.min_price_tick_size);
        let nonce = self.state.nonces.get(&subaccount).copied().unwrap_or_default() + 1;
        let mut order = Order {
            hash: compute_order_hash(&subaccount, market_id, side, worst_price, position.quantity, nonce),
            market_id,
            side,
            info: OrderInfo {
                subaccount,
                fee_recipient: None,
                price: Price::new_unchecked(worst_price),
                quantity: position.quantity,
                client_order_id: None,
            },
            kind: order_kind(&market, Decimal::ZERO),
            order_type: OrderType::ReduceOnly,
            time_in_force: TimeInForce::Market,
            fillable_quantity: position.quantity,
            hold: OrderHold::new(market.quote_denom.clone(), Decimal::ZERO),
            margin_remaining: Decimal::ZERO,
            // after the supplied order, which takes the next sequence
            sequence: self.state.next_sequence + u64::from(prepared.is_some()),
        };

        // dry run: the book without the owner's orders, plus the supplied one
        // minus whatever of the supplier's it evicts once committed
        let mut trial = self
            .state
            .books
            .get(&market_id)
            .cloned()
            .unwrap_or_else(|| OrderBook::new(market_id));
        for hash in self.state.order_hashes_of(market_id, &subaccount) {
            trial.remove(&hash);
        }
        if let Some(p) = &prepared {
            for hash in p.evict.iter().chain(&self.reduce_only_squeezed_by(&p.order)) {
                trial.remove(hash);
            }
            trial.insert(p.order.clone());
        }
        let guard = ReduceOnlyGuard::from_positions(self.state.positions_in(market_id));
        let fillable = simulate_sweep(&trial, &order, &guard);
        if fillable < position.quantity {
            warn!(
                market = %market_id,
                subaccount = %subaccount,
                required = %position.quantity,
                available = %fillable,
                worst_price = %worst_price,
                "liquidation lacks liquidity"
            );
            return Err(ExchangeError::NoLiquidity {
                required: position.quantity,
                available: fillable,
            });
        }

        // from here on every step writes
        self.cancel_orders_of(market_id, subaccount, CancelReason::Liquidation)?;
        let supplied_hash = match prepared {
            Some(p) => Some(self.commit_order(p, OrderLocation::Resting)?),
            None => None,
        };
        self.state.next_nonce(subaccount);
        self.state.next_sequence();

        let mut guard = ReduceOnlyGuard::from_positions(self.state.positions_in(market_id));
        let result = {
            let book = self
                .state
                .books
                .entry(market_id)
                .or_insert_with(|| OrderBook::new(market_id));
            match_liquidation_order(market_id, book, &mut order, &mut guard, market.min_price_tick_size)
        };
        if !order.is_filled() {
            return Err(InvariantViolation::LiquidationUnfilled {
                market: market_id,
                remaining: order.fillable_quantity,
            }
            .into());
        }

        let outcome = self.settle_clearing(&market, &result, true)?;
        let mut payout = Decimal::ZERO;
        let mut coverage = DeficitCoverage::default();
        for leg in outcome.legs_of(&order.hash) {
            payout += leg.payout;
            coverage.deficit += leg.coverage.deficit;
            coverage.from_available += leg.coverage.from_available;
            coverage.from_order_holds += leg.coverage.from_order_holds;
            coverage.from_insurance += leg.coverage.from_insurance;
            coverage.uncovered += leg.coverage.uncovered;
        }

        // a market supplied order never rests
        if let Some(hash) = supplied_hash.filter(|_| supplied.as_ref().is_some_and(|r| r.time_in_force == TimeInForce::Market)) {
            self.cancel_order_internal(market_id, &hash, CancelReason::Unfilled)?;
        }
        for touched in result.touched_subaccounts() {
            self.enforce_reduce_only(market_id, touched)?;
        }

        let uncovered = outcome.uncovered();
        let status = if uncovered > Decimal::ZERO {
            LiquidationStatus::MarketPaused
        } else {
            LiquidationStatus::Liquidated
        };
        warn!(
            market = %market_id,
            subaccount = %subaccount,
            quantity = %position.quantity,
            mark_price = %mark_price,
            clearing_price = ?result.clearing_price,
            payout = %payout,
            from_insurance = %coverage.from_insurance,
            uncovered = %uncovered,
            "position liquidated"
        );
        self.emit_event(EventPayload::Liquidation(LiquidationEvent {
            market_id,
            subaccount,
            quantity: position.quantity,
            mark_price,
            clearing_price: result.clearing_price,
            payout,
            deficit: coverage.deficit,
            status,
        }));

        let forced_settlement = if uncovered > Decimal::ZERO {
            Some(self.settle_market_at(market_id, mark_price, halted_status(&market))?)
        } else {
            None
        };

        Ok(LiquidationResult {
            subaccount,
            market_id,
            quantity: position.quantity,
            mark_price,
            worst_price,
            clearing_price: result.clearing_price,
            payout,
            coverage,
            status,
            forced_settlement,
        })
    }

    /// Owner triggered settlement of an underwater position the owner can
    /// no longer pay for. tries an ordinary liquidation first and falls back
    /// to settling the whole market at mark.
    pub fn emergency_settle(
        &mut self,
        market_id: MarketId,
        subaccount: SubaccountId,
    ) -> Result<EmergencySettleResult, ExchangeError> {
        let market = self.active_market(market_id)?;
        let position = self
            .state
            .position(market_id, &subaccount)
            .cloned()
            .ok_or(ExchangeError::PositionNotFound)?;
        let mark_price = self.mark_price(market_id).ok_or(ExchangeError::NoMarkPrice(market_id))?;

        let health = evaluate_liquidation(&position, mark_price, market.maintenance_margin_ratio);
        if health.deficit_at_mark.is_zero() {
            return Err(ExchangeError::InvalidEmergencySettle(
                "position is not underwater at mark".to_string(),
            ));
        }
        let own_funds = self.state.deposits.get_balance(&subaccount, &market.quote_denom).total;
        if own_funds >= health.deficit_at_mark {
            return Err(ExchangeError::InvalidEmergencySettle(format!(
                "owner funds {own_funds} cover the deficit {}",
                health.deficit_at_mark
            )));
        }

        match self.liquidate(subaccount, market_id, None) {
            Ok(result) => match result.forced_settlement {
                Some(report) => Ok(EmergencySettleResult::MarketSettled(report)),
                None => Ok(EmergencySettleResult::Liquidated(result)),
            },
            Err(ExchangeError::NoLiquidity { .. } | ExchangeError::PositionNotLiquidatable) => {
                let report = self.settle_market_at(market_id, mark_price, halted_status(&market))?;
                Ok(EmergencySettleResult::MarketSettled(report))
            }
            Err(other) => Err(other),
        }
    }

    /// Settles every active expiry future and binary option whose expiry is
    /// at or before `now`, at the oracle price.
    pub fn settle_expired_markets(&mut self, now: Timestamp) -> Result<Vec<MarketSettlementReport>, ExchangeError> {
        let due: Vec<_> = self
            .state
            .markets
            .values()
            .filter(|m| m.is_active() && m.kind.expiry().is_some_and(|expiry| expiry <= now))
            .map(|m| (m.id, m.kind.is_binary()))
            .collect();

        let mut reports = Vec::with_capacity(due.len());
        for (market_id, binary) in due {
            let Some(price) = self.oracle.mark_price(market_id) else {
                warn!(market = %market_id, "expired market has no oracle price, settlement deferred");
                continue;
            };
            let price = if binary {
                price.clamp(Decimal::ZERO, Decimal::ONE)
            } else {
                price
            };
            reports.push(self.settle_market_at(market_id, price, MarketStatus::Expired)?);
        }
        Ok(reports)
    }

    /// Admin close of a market. every order is cancelled and derivative
    /// positions settle at `price`, or at mark when none is given. binary
    /// option prices are clamped to [0, 1]. the market is left halted.
    pub fn force_settle_market(
        &mut self,
        market_id: MarketId,
        price: Option<Decimal>,
    ) -> Result<MarketSettlementReport, ExchangeError> {
        let market = self
            .state
            .markets
            .get(&market_id)
            .ok_or(ExchangeError::InvalidMarket(market_id))?;
        if matches!(market.status, MarketStatus::Expired | MarketStatus::Demolished) {
            return Err(ExchangeError::MarketPaused(market_id));
        }
        if let Some(price) = price.filter(|p| p.is_sign_negative()) {
            return Err(ExchangeError::InvalidAmount(price));
        }
        let status = halted_status(market);
        self.close_market(market_id, price, status)
    }

    /// Resolves the settlement price then settles. a spot market, or one
    /// without positions, needs no price.
    pub(super) fn close_market(
        &mut self,
        market_id: MarketId,
        price: Option<Decimal>,
        status: MarketStatus,
    ) -> Result<MarketSettlementReport, ExchangeError> {
        let market = self
            .state
            .markets
            .get(&market_id)
            .cloned()
            .ok_or(ExchangeError::InvalidMarket(market_id))?;
        let has_positions = self.state.positions_in(market_id).next().is_some();
        let price = match price.or_else(|| self.mark_price(market_id)) {
            Some(price) if market.kind.is_binary() => price.clamp(Decimal::ZERO, Decimal::ONE),
            Some(price) => price,
            None if market.is_derivative() && has_positions => return Err(ExchangeError::NoMarkPrice(market_id)),
            None => Decimal::ZERO,
        };
        info!(market = %market_id, price = %price, status = ?status, "closing market");
        self.settle_market_at(market_id, price, status)
    }

    /// Cancels every order in the market and closes every position at
    /// `price`. positive payouts are scaled down together when the market
    /// balance plus insurance cannot pay them all; losers get zero. what is
    /// left in the market goes to the insurance fund.
    pub(super) fn settle_market_at(
        &mut self,
        market_id: MarketId,
        price: Decimal,
        status: MarketStatus,
    ) -> Result<MarketSettlementReport, ExchangeError> {
        let market = self
            .state
            .markets
            .get(&market_id)
            .cloned()
            .ok_or(ExchangeError::InvalidMarket(market_id))?;

        let mut hashes: Vec<OrderHash> = self
            .state
            .transients
            .get(&market_id)
            .map(|t| t.iter().map(|o| o.hash).collect())
            .unwrap_or_default();
        if let Some(book) = self.state.books.get(&market_id) {
            hashes.extend(book.iter().map(|o| o.hash));
        }
        let mut orders_cancelled = 0;
        for hash in &hashes {
            if self.cancel_order_internal(market_id, hash, CancelReason::MarketSettled)?.is_some() {
                orders_cancelled += 1;
            }
        }
        let parked: Vec<OrderHash> = self
            .state
            .conditionals
            .get(&market_id)
            .map(|book| book.iter().map(|o| o.hash).collect())
            .unwrap_or_default();
        for hash in &parked {
            if self.cancel_conditional_internal(market_id, hash, CancelReason::MarketSettled).is_some() {
                orders_cancelled += 1;
            }
        }

        let positions: Vec<_> = self
            .state
            .positions_in(market_id)
            .map(|(sub, p)| (*sub, p.clone()))
            .collect();
        let owed: Vec<(SubaccountId, Decimal)> = positions
            .iter()
            .map(|(sub, p)| (*sub, p.clone().close(p.quantity, price)))
            .collect();
        let funds = self.state.market_balance(market_id) + self.state.insurance.balance(market_id);
        let haircut = apply_haircut(&owed, funds, self.state.params.payout_scale);

        let mut total_paid = Decimal::ZERO;
        for (subaccount, amount) in &haircut.payouts {
            let unpaid = self.pay_from_market(&market, *subaccount, *amount)?;
            total_paid += *amount - unpaid;
            self.state.positions.remove(&(market_id, *subaccount));
            self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
                market_id,
                subaccount: *subaccount,
                exit_price: price,
                payout: *amount - unpaid,
            }));
        }

        self.apply_market_status(market_id, status)?;

        let surplus = self.state.market_balance(market_id);
        if surplus > Decimal::ZERO && market.is_derivative() {
            self.state.debit_market_balance(market_id, surplus)?;
            self.state.insurance.deposit(market_id, surplus)?;
        }

        let report = MarketSettlementReport {
            market_id,
            settlement_price: price,
            status,
            positions_closed: positions.len(),
            orders_cancelled,
            haircut_factor: haircut.factor,
            total_owed: haircut.total_owed,
            total_paid,
            shortfall: haircut.total_owed - total_paid,
            surplus_to_insurance: surplus.max(Decimal::ZERO),
        };
        if report.shortfall > Decimal::ZERO {
            error!(
                market = %market_id,
                price = %price,
                positions = report.positions_closed,
                factor = %report.haircut_factor,
                shortfall = %report.shortfall,
                "market force settled with socialized loss"
            );
        } else {
            info!(
                market = %market_id,
                price = %price,
                positions = report.positions_closed,
                status = ?status,
                "market settled"
            );
        }
        self.emit_event(EventPayload::MarketSettled(MarketSettledEvent {
            market_id,
            settlement_price: price,
            positions_closed: report.positions_closed,
            haircut_factor: report.haircut_factor,
            shortfall: report.shortfall,
        }));
        Ok(report)
    }
}
