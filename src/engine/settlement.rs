// 8.8: turns a clearing result into balance and position changes.
//
// every leg consumes its order's released hold first: what the fill spends
// comes out of the hold (total only), the rest of the released share goes
// back to available. spot legs swap base for quote, derivative legs move
// margin into the market balance and take payouts out of it.
//
// fees: a positive fee is split between the fee recipient's default
// subaccount and the auction pool. a negative fee is a maker rebate funded by
// the pool. reduce-only legs have no hold, their fee comes out of the payout
// and is capped at what the owner has left.

use super::core::Exchange;
use super::results::{DeficitCoverage, ExchangeError};
use crate::deposit::{BalanceField, Ledger};
use crate::events::{EventPayload, FillEvent};
use crate::fees::{split_fee, trading_fee};
use crate::margin::binary_option_margin;
use crate::market::{Market, MarketKind};
use crate::matching::{ClearingResult, FillDelta, LiquidityRole};
use crate::oracle::PriceOracle;
use crate::order::OrderType;
use crate::types::{Denom, OrderHash, OrderSide, SubaccountId};
use rust_decimal::Decimal;
use tracing::debug;

/// Settlement of one leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct LegOutcome {
    pub order_hash: OrderHash,
    pub subaccount: SubaccountId,
    /// Closing payout before fees. zero for spot and pure opens.
    pub payout: Decimal,
    /// Fee actually collected, negative for a paid rebate
    pub fee: Decimal,
    pub coverage: DeficitCoverage,
    /// Payout the market could not pay even after insurance
    pub unpaid: Decimal,
}

impl LegOutcome {
    fn new(leg: &FillDelta) -> Self {
        Self {
            order_hash: leg.order_hash,
            subaccount: leg.subaccount,
            payout: Decimal::ZERO,
            fee: Decimal::ZERO,
            coverage: DeficitCoverage::default(),
            unpaid: Decimal::ZERO,
        }
    }
}

/// Settlement of a whole clearing result.
#[derive(Debug, Clone, Default)]
pub(super) struct SettlementOutcome {
    pub legs: Vec<LegOutcome>,
}

impl SettlementOutcome {
    pub fn fees_collected(&self) -> Decimal {
        self.legs.iter().map(|l| l.fee).sum()
    }

    /// Loss nobody paid for: uncovered deficits plus unpaid payouts.
    pub fn uncovered(&self) -> Decimal {
        self.legs.iter().map(|l| l.coverage.uncovered + l.unpaid).sum()
    }

    pub fn legs_of<'a>(&'a self, hash: &'a OrderHash) -> impl Iterator<Item = &'a LegOutcome> {
        self.legs.iter().filter(move |l| l.order_hash == *hash)
    }
}

impl<O: PriceOracle> Exchange<O> {
    /// Settles every leg of `result`, taker leg of each trade first.
    /// `free_holds` lets the deficit chain cancel the owner's orders.
    pub(super) fn settle_clearing(
        &mut self,
        market: &Market,
        result: &ClearingResult,
        free_holds: bool,
    ) -> Result<SettlementOutcome, ExchangeError> {
        let mut outcome = SettlementOutcome::default();
        for trade in &result.trades {
            let mut legs = trade.legs();
            // rebates are funded by the taker fee of the same trade
            legs.sort_by_key(|l| l.role == LiquidityRole::Maker);
            for leg in legs {
                let settled = match market.kind {
                    MarketKind::Spot => self.settle_spot_leg(market, leg)?,
                    _ => self.settle_derivative_leg(market, leg, free_holds)?,
                };
                self.emit_event(EventPayload::Fill(FillEvent {
                    market_id: market.id,
                    order_hash: leg.order_hash,
                    subaccount: leg.subaccount,
                    side: leg.side,
                    quantity: leg.fill_quantity,
                    price: leg.execution_price,
                    fee: settled.fee,
                    role: leg.role,
                }));
                if leg.order_completed {
                    if let Some(cid) = &leg.client_order_id {
                        self.state
                            .client_ids
                            .remove(&(market.id, leg.subaccount, cid.clone()));
                    }
                }
                outcome.legs.push(settled);
            }
        }
        Ok(outcome)
    }

    fn fee_rate(market: &Market, role: LiquidityRole) -> Decimal {
        match role {
            LiquidityRole::Maker => market.maker_fee_rate,
            LiquidityRole::Taker => market.taker_fee_rate,
        }
    }

    /// Spends `spend` out of a released hold share. the unspent share goes
    /// back to available, spending beyond it is charged from available.
    fn consume_hold(
        &mut self,
        subaccount: &SubaccountId,
        denom: &Denom,
        released: Decimal,
        spend: Decimal,
    ) -> Result<(), ExchangeError> {
        let from_hold = spend.min(released);
        if from_hold > Decimal::ZERO {
            self.state.deposits.debit(subaccount, denom, from_hold, BalanceField::Total)?;
        }
        if released > from_hold {
            self.state.deposits.release(subaccount, denom, released - from_hold)?;
        }
        if spend > from_hold {
            self.state.deposits.charge(subaccount, denom, spend - from_hold)?;
        }
        Ok(())
    }

    /// Splits a fee the caller already collected.
    fn distribute_fee(&mut self, market: &Market, leg: &FillDelta, fee: Decimal) -> Result<(), ExchangeError> {
        if fee <= Decimal::ZERO {
            return Ok(());
        }
        match leg.fee_recipient {
            Some(recipient) => {
                let split = split_fee(fee, market.relayer_fee_share_rate);
                self.state
                    .deposits
                    .pay(&SubaccountId::default_of(recipient), &market.quote_denom, split.relayer)?;
                self.state.credit_auction_pool(&market.quote_denom, split.auction);
            }
            None => self.state.credit_auction_pool(&market.quote_denom, fee),
        }
        Ok(())
    }

    /// Pays a maker rebate out of the auction pool. returns what was paid.
    fn pay_rebate(&mut self, market: &Market, leg: &FillDelta, rebate: Decimal) -> Result<Decimal, ExchangeError> {
        let paid = rebate.min(self.state.auction_pool_balance(&market.quote_denom));
        if paid > Decimal::ZERO {
            self.state.debit_auction_pool(&market.quote_denom, paid)?;
            self.state.deposits.pay(&leg.subaccount, &market.quote_denom, paid)?;
        }
        Ok(paid)
    }

    fn settle_spot_leg(&mut self, market: &Market, leg: &FillDelta) -> Result<LegOutcome, ExchangeError> {
        let notional = leg.notional();
        let fee = trading_fee(notional, Self::fee_rate(market, leg.role));
        let charged = fee.max(Decimal::ZERO);

        match leg.side {
            OrderSide::Buy => {
                self.consume_hold(&leg.subaccount, &market.quote_denom, leg.hold_released, notional + charged)?;
                self.state.deposits.pay(&leg.subaccount, &market.base_denom, leg.fill_quantity)?;
            }
            OrderSide::Sell => {
                self.consume_hold(&leg.subaccount, &market.base_denom, leg.hold_released, leg.fill_quantity)?;
                self.state.deposits.pay(&leg.subaccount, &market.quote_denom, notional - charged)?;
            }
        }

        self.distribute_fee(market, leg, charged)?;
        let rebate = self.pay_rebate(market, leg, (-fee).max(Decimal::ZERO))?;
        debug!(market = %market.id, order = %leg.order_hash, quantity = %leg.fill_quantity, price = %leg.execution_price, fee = %fee, "spot fill settled");

        Ok(LegOutcome {
            fee: charged - rebate,
            ..LegOutcome::new(leg)
        })
    }

    fn settle_derivative_leg(
        &mut self,
        market: &Market,
        leg: &FillDelta,
        free_holds: bool,
    ) -> Result<LegOutcome, ExchangeError> {
        let quote = &market.quote_denom;
        let fee = trading_fee(leg.notional(), Self::fee_rate(market, leg.role));
        let mut charged = fee.max(Decimal::ZERO);

        let binary = market.kind.is_binary();
        let execution_margin = leg.execution_margin;
        let fill_quantity = leg.fill_quantity;
        let (side, price) = (leg.side, leg.execution_price);
        let open_margin = move |opened: Decimal| {
            if binary {
                binary_option_margin(side, price, opened)
            } else {
                execution_margin * opened / fill_quantity
            }
        };

        let change = self.apply_position_fill(market.id, leg.subaccount, side, fill_quantity, price, open_margin);
        let margin_in = if change.opened_quantity > Decimal::ZERO {
            open_margin(change.opened_quantity)
        } else {
            Decimal::ZERO
        };

        let mut outcome = LegOutcome {
            payout: change.payout,
            ..LegOutcome::new(leg)
        };

        match leg.order_type {
            OrderType::Vanilla => {
                self.consume_hold(&leg.subaccount, quote, leg.hold_released, margin_in + charged)?;
                self.state.credit_market_balance(market.id, margin_in);
            }
            OrderType::ReduceOnly => {
                // nothing was held, margin_in is zero by admission
                self.state.credit_market_balance(market.id, margin_in);
            }
        }

        if change.payout > Decimal::ZERO {
            outcome.unpaid = self.pay_from_market(market, leg.subaccount, change.payout)?;
        } else if change.payout < Decimal::ZERO {
            outcome.coverage = self.cover_deficit(market, leg.subaccount, -change.payout, free_holds)?;
        }

        if leg.order_type == OrderType::ReduceOnly && charged > Decimal::ZERO {
            let available = self.state.deposits.get_balance(&leg.subaccount, quote).available;
            charged = charged.min(available);
            if charged > Decimal::ZERO {
                self.state.deposits.charge(&leg.subaccount, quote, charged)?;
            }
        }

        self.distribute_fee(market, leg, charged)?;
        let rebate = self.pay_rebate(market, leg, (-fee).max(Decimal::ZERO))?;
        outcome.fee = charged - rebate;

        debug!(
            market = %market.id,
            order = %leg.order_hash,
            quantity = %fill_quantity,
            price = %price,
            closed = %change.closed_quantity,
            payout = %change.payout,
            fee = %outcome.fee,
            "derivative fill settled"
        );
        Ok(outcome)
    }
}
