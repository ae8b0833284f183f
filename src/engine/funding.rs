//! Funding settlement for perpetual markets.

use super::core::Exchange;
use super::results::{ExchangeError, FundingResult};
use crate::events::{EventPayload, FundingSettledEvent};
use crate::funding::{calculate_funding_payment, close_interval, record_premium};
use crate::market::MarketKind;
use crate::oracle::PriceOracle;
use crate::types::{MarketId, SubaccountId};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

impl<O: PriceOracle> Exchange<O> {
    /// Closes the market's funding interval at the current time. longs pay
    /// shorts out of position margin when the rate is positive, shorts pay
    /// longs when it is negative.
    pub fn settle_funding(&mut self, market_id: MarketId) -> Result<FundingResult, ExchangeError> {
        let market = self.active_market(market_id)?;
        if market.kind != MarketKind::Perpetual {
            return Err(ExchangeError::InvalidMarket(market_id));
        }
        let params = self.state.params.funding.clone();
        let now = self.current_time;
        let next = self
            .state
            .funding
            .get(&market_id)
            .ok_or(ExchangeError::InvalidMarket(market_id))?
            .next_funding(&params);
        if now < next {
            return Err(ExchangeError::FundingNotDue { market: market_id, next });
        }
        let mark_price = self.mark_price(market_id).ok_or(ExchangeError::NoMarkPrice(market_id))?;

        let Some(state) = self.state.funding.get_mut(&market_id) else {
            return Err(ExchangeError::InvalidMarket(market_id));
        };
        let (rate, delta) = close_interval(state, mark_price, now, &params);
        let cumulative_funding = state.cumulative_funding;

        let holders: Vec<SubaccountId> = self.state.positions_in(market_id).map(|(s, _)| *s).collect();
        let mut total_long_payments = Decimal::ZERO;
        let mut total_short_payments = Decimal::ZERO;
        for subaccount in &holders {
            let Some(position) = self.state.positions.get_mut(&(market_id, *subaccount)) else {
                continue;
            };
            let payment = calculate_funding_payment(position, delta);
            position.margin -= payment;
            if position.is_long {
                total_long_payments += payment;
            } else {
                total_short_payments += payment;
            }
            debug!(
                market = %market_id,
                subaccount = %subaccount,
                payment = %payment,
                margin = %position.margin,
                "funding applied"
            );
        }

        info!(
            market = %market_id,
            rate = %rate,
            mark_price = %mark_price,
            cumulative = %cumulative_funding,
            positions = holders.len(),
            "funding settled"
        );
        self.emit_event(EventPayload::FundingSettled(FundingSettledEvent {
            market_id,
            funding_rate: rate,
            cumulative_funding,
            mark_price,
            positions: holders.len(),
        }));
        Ok(FundingResult {
            market_id,
            funding_rate: rate,
            cumulative_funding,
            mark_price,
            total_long_payments,
            total_short_payments,
            positions_affected: holders.len(),
        })
    }

    pub fn funding_state(&self, market_id: MarketId) -> Option<&crate::funding::FundingState> {
        self.state.funding.get(&market_id)
    }

    /// Adds a block's clearing price to the running premium. needs an oracle
    /// price, a premium against the book's own mid says nothing.
    pub(super) fn record_funding_premium(&mut self, market_id: MarketId, price: Decimal) {
        let Some(mark) = self.oracle.mark_price(market_id) else {
            return;
        };
        let now = self.current_time;
        if let Some(state) = self.state.funding.get_mut(&market_id) {
            record_premium(state, price, mark, now);
        }
    }

    /// Settles every active perpetual whose interval has ended. a market
    /// without a price keeps accruing until it has one.
    pub(super) fn settle_due_funding(&mut self) -> Result<Vec<FundingResult>, ExchangeError> {
        let params = &self.state.params.funding;
        let now = self.current_time;
        let due: Vec<MarketId> = self
            .state
            .funding
            .iter()
            .filter(|(id, state)| {
                state.is_due(now, params) && self.state.markets.get(id).is_some_and(|m| m.is_active())
            })
            .map(|(id, _)| *id)
            .collect();

        let mut results = Vec::with_capacity(due.len());
        for market_id in due {
            match self.settle_funding(market_id) {
                Ok(result) => results.push(result),
                Err(ExchangeError::NoMarkPrice(_)) => {
                    warn!(market = %market_id, "funding due but no mark price, deferred");
                }
                Err(other) => return Err(other),
            }
        }
        Ok(results)
    }
}
