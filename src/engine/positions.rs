// 8.7: position bookkeeping and the money that moves with it.
// a derivative market owns a balance: margin flows in on opening fills and
// deficit coverage, payouts flow out on closes. when the balance is short the
// insurance fund tops it up; what the fund cannot cover is reported back.

use super::core::Exchange;
use super::results::{DeficitCoverage, ExchangeError};
use crate::deposit::Ledger;
use crate::events::{CancelReason, EventPayload, InsuranceDrawEvent, PositionClosedEvent, PositionUpdatedEvent};
use crate::insurance::InsuranceFundStore;
use crate::market::Market;
use crate::oracle::PriceOracle;
use crate::position::Position;
use crate::types::{MarketId, OrderSide, SubaccountId};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// What a fill did to a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct PositionChange {
    pub closed_quantity: Decimal,
    pub opened_quantity: Decimal,
    /// margin share + pnl of the closed part. negative when underwater.
    pub payout: Decimal,
}

impl<O: PriceOracle> Exchange<O> {
    /// Splits a fill into the part that closes the existing position and the
    /// part that opens (or grows) one. the open margin is supplied by the caller.
    pub(super) fn apply_position_fill(
        &mut self,
        market_id: MarketId,
        subaccount: SubaccountId,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
        open_margin: impl Fn(Decimal) -> Decimal,
    ) -> PositionChange {
        let key = (market_id, subaccount);
        let mut change = PositionChange::default();

        let mut position = self.state.positions.remove(&key);
        if let Some(existing) = position.as_mut().filter(|p| p.side() != side) {
            change.closed_quantity = quantity.min(existing.quantity);
            change.payout = existing.close(change.closed_quantity, price);
        }
        if position.as_ref().is_some_and(Position::is_empty) {
            position = None;
            self.emit_event(EventPayload::PositionClosed(PositionClosedEvent {
                market_id,
                subaccount,
                exit_price: price,
                payout: change.payout,
            }));
            info!(market = %market_id, subaccount = %subaccount, exit_price = %price, payout = %change.payout, "position closed");
        }

        change.opened_quantity = quantity - change.closed_quantity;
        if change.opened_quantity > Decimal::ZERO {
            let margin = open_margin(change.opened_quantity);
            match position.as_mut() {
                Some(existing) => existing.increase(change.opened_quantity, price, margin),
                None => position = Some(Position::open(side, change.opened_quantity, price, margin)),
            }
        }

        if let Some(position) = position {
            self.emit_event(EventPayload::PositionUpdated(PositionUpdatedEvent {
                market_id,
                subaccount,
                is_long: position.is_long,
                quantity: position.quantity,
                entry_price: position.entry_price.value(),
                margin: position.margin,
            }));
            self.state.positions.insert(key, position);
        }
        change
    }

    /// Pays `amount` out of the market balance, drawing the insurance fund
    /// for any gap. returns what could not be paid.
    pub(super) fn pay_from_market(
        &mut self,
        market: &Market,
        subaccount: SubaccountId,
        amount: Decimal,
    ) -> Result<Decimal, ExchangeError> {
        if amount <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let balance = self.state.market_balance(market.id);
        if balance < amount {
            self.draw_insurance(market.id, amount - balance)?;
        }
        let paid = amount.min(self.state.market_balance(market.id));
        self.state.debit_market_balance(market.id, paid)?;
        self.state.deposits.pay(&subaccount, &market.quote_denom, paid)?;
        Ok(amount - paid)
    }

    /// Moves up to `amount` from the insurance fund into the market balance.
    pub(super) fn draw_insurance(&mut self, market_id: MarketId, amount: Decimal) -> Result<Decimal, ExchangeError> {
        let drawn = self.state.insurance.cover(market_id, amount)?;
        if drawn > Decimal::ZERO {
            self.state.credit_market_balance(market_id, drawn);
            let remaining = self.state.insurance.balance(market_id);
            warn!(market = %market_id, amount = %drawn, remaining = %remaining, "insurance fund draw");
            self.emit_event(EventPayload::InsuranceDraw(InsuranceDrawEvent {
                market_id,
                amount: drawn,
                remaining,
            }));
        }
        Ok(drawn)
    }

    /// Collects a negative payout into the market balance, in chain order:
    /// the owner's available balance, then (when `free_holds`) the holds of
    /// the owner's orders in the same denom, then the insurance fund. the
    /// rest is returned as uncovered.
    pub(super) fn cover_deficit(
        &mut self,
        market: &Market,
        subaccount: SubaccountId,
        deficit: Decimal,
        free_holds: bool,
    ) -> Result<DeficitCoverage, ExchangeError> {
        let denom = market.quote_denom.clone();
        let mut coverage = DeficitCoverage {
            deficit,
            ..DeficitCoverage::default()
        };
        if deficit <= Decimal::ZERO {
            return Ok(coverage);
        }

        let mut remaining = deficit;
        coverage.from_available = self.take_available(market, subaccount, remaining)?;
        remaining -= coverage.from_available;

        if remaining > Decimal::ZERO && free_holds {
            for market_id in self.state.markets_with_holds(&subaccount, &denom) {
                let holding: Vec<_> = self
                    .state
                    .orders_of(market_id, &subaccount)
                    .into_iter()
                    .filter(|o| o.hold.denom == denom && o.hold.remaining > Decimal::ZERO)
                    .map(|o| o.hash)
                    .collect();
                for hash in holding {
                    self.cancel_order_internal(market_id, &hash, CancelReason::DeficitCoverage)?;
                }
            }
            coverage.from_order_holds = self.take_available(market, subaccount, remaining)?;
            remaining -= coverage.from_order_holds;
        }

        if remaining > Decimal::ZERO {
            coverage.from_insurance = self.draw_insurance(market.id, remaining)?;
            remaining -= coverage.from_insurance;
        }

        coverage.uncovered = remaining;
        if remaining > Decimal::ZERO {
            warn!(
                market = %market.id,
                subaccount = %subaccount,
                deficit = %deficit,
                uncovered = %remaining,
                "deficit not covered"
            );
        }
        Ok(coverage)
    }

    fn take_available(&mut self, market: &Market, subaccount: SubaccountId, wanted: Decimal) -> Result<Decimal, ExchangeError> {
        let denom = &market.quote_denom;
        let available = self.state.deposits.get_balance(&subaccount, denom).available;
        let taken = wanted.min(available);
        if taken > Decimal::ZERO {
            self.state.deposits.charge(&subaccount, denom, taken)?;
            self.state.credit_market_balance(market.id, taken);
        }
        Ok(taken)
    }
}
