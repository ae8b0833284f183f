//! Order margin and hold calculation.
//!
//! Derivative orders must post at least `initial_margin_ratio * notional`.
//! When a mark price is known the margin must also survive marking the new
//! position to it, so an order priced far from mark cannot open already
//! underwater. Binary options are fully collateralized: the margin is the
//! worst case loss on the unit scale.

use crate::market::{Market, MarketKind};
use crate::order::OrderType;
use crate::types::{Denom, OrderSide};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarginError {
    #[error("margin {margin} below initial requirement {required}")]
    BelowInitialMargin { margin: Decimal, required: Decimal },
    #[error("margin {margin} below mark price requirement {required} at mark {mark_price}")]
    BelowMarkPriceMargin {
        margin: Decimal,
        required: Decimal,
        mark_price: Decimal,
    },
}

/// Margin a binary option order must lock.
pub fn binary_option_margin(side: OrderSide, price: Decimal, quantity: Decimal) -> Decimal {
    match side {
        OrderSide::Buy => price * quantity,
        OrderSide::Sell => (Decimal::ONE - price) * quantity,
    }
}

/// Margin that will actually back the order. reduce-only orders carry none.
pub fn effective_margin(
    market: &Market,
    side: OrderSide,
    order_type: OrderType,
    price: Decimal,
    quantity: Decimal,
    requested: Decimal,
) -> Decimal {
    if order_type == OrderType::ReduceOnly {
        return Decimal::ZERO;
    }
    match market.kind {
        MarketKind::Spot => Decimal::ZERO,
        MarketKind::BinaryOption { .. } => binary_option_margin(side, price, quantity),
        MarketKind::Perpetual | MarketKind::Expiry { .. } => requested,
    }
}

/// Initial margin check for a vanilla perpetual or expiry order.
pub fn check_order_margin(
    market: &Market,
    side: OrderSide,
    price: Decimal,
    quantity: Decimal,
    margin: Decimal,
    mark_price: Option<Decimal>,
) -> Result<(), MarginError> {
    let required = market.initial_margin_ratio * price * quantity;
    if margin < required {
        return Err(MarginError::BelowInitialMargin { margin, required });
    }

    if let Some(mark) = mark_price {
        // buy: margin + q * (mark - price) >= imr * q * mark
        // sell: margin + q * (price - mark) >= imr * q * mark
        let required = match side {
            OrderSide::Buy => quantity * (market.initial_margin_ratio * mark - mark + price),
            OrderSide::Sell => quantity * (market.initial_margin_ratio * mark + mark - price),
        };
        if margin < required {
            return Err(MarginError::BelowMarkPriceMargin {
                margin,
                required,
                mark_price: mark,
            });
        }
    }
    Ok(())
}

/// Denom and amount an order locks at admission.
pub fn order_hold(
    market: &Market,
    side: OrderSide,
    order_type: OrderType,
    price: Decimal,
    quantity: Decimal,
    margin: Decimal,
) -> (Denom, Decimal) {
    let fee_rate = market.max_fee_rate();
    match market.kind {
        MarketKind::Spot => match side {
            OrderSide::Buy => (
                market.quote_denom.clone(),
                price * quantity * (Decimal::ONE + fee_rate),
            ),
            OrderSide::Sell => (market.base_denom.clone(), quantity),
        },
        _ => {
            if order_type == OrderType::ReduceOnly {
                // fee comes out of the payout
                (market.quote_denom.clone(), Decimal::ZERO)
            } else {
                (market.quote_denom.clone(), margin + price * quantity * fee_rate)
            }
        }
    }
}
