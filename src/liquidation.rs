//! Liquidation conditions.
//!
//! A derivative position is liquidatable once its margin ratio at the mark
//! price drops below the market's maintenance ratio. Liquidation closes it
//! with a market order whose worst acceptable price is the bankruptcy price,
//! or the mark price when that is already past bankruptcy.

use crate::market::{Market, MarketStatus};
use crate::position::Position;
use crate::types::OrderSide;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationStatus {
    Healthy,
    Liquidatable,
    /// Closed by a successful liquidation
    Liquidated,
    /// Closed by forced settlement of the market
    MarketPaused,
}

/// Health of a position at `mark_price`.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionHealth {
    pub status: LiquidationStatus,
    pub margin_ratio: Decimal,
    pub maintenance_margin_ratio: Decimal,
    pub bankruptcy_price: Decimal,
    /// Loss past the margin if closed at mark. zero while equity is positive.
    pub deficit_at_mark: Decimal,
}

pub fn evaluate_liquidation(
    position: &Position,
    mark_price: Decimal,
    maintenance_margin_ratio: Decimal,
) -> PositionHealth {
    let margin_ratio = position.margin_ratio(mark_price);
    let status = if !position.is_empty() && margin_ratio < maintenance_margin_ratio {
        LiquidationStatus::Liquidatable
    } else {
        LiquidationStatus::Healthy
    };
    PositionHealth {
        status,
        margin_ratio,
        maintenance_margin_ratio,
        bankruptcy_price: position.bankruptcy_price(),
        deficit_at_mark: position.deficit_at(mark_price),
    }
}

pub fn is_liquidatable(position: &Position, mark_price: Decimal, market: &Market) -> bool {
    // fully collateralized binaries never are
    if market.kind.is_binary() || market.status != MarketStatus::Active {
        return false;
    }
    evaluate_liquidation(position, mark_price, market.maintenance_margin_ratio).status
        == LiquidationStatus::Liquidatable
}

/// Worst price the closing order accepts. a long sells down to the
/// bankruptcy price, or the mark if that is lower. kept on the tick grid
/// and above zero.
pub fn liquidation_worst_price(position: &Position, mark_price: Decimal, price_tick: Decimal) -> Decimal {
    let bankruptcy = position.bankruptcy_price();
    match position.closing_side() {
        OrderSide::Sell => {
            let worst = bankruptcy.min(mark_price);
            let floored = (worst / price_tick).floor() * price_tick;
            floored.max(price_tick)
        }
        OrderSide::Buy => {
            let worst = bankruptcy.max(mark_price);
            (worst / price_tick).ceil() * price_tick
        }
    }
}
