// 4.0: open derivative position. payout on close = margin share + qty * (exit - entry) * sign.
// 4.1 has open/close logic, 4.2 bankruptcy price and margin ratio.

use crate::types::{OrderSide, Price};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub is_long: bool,
    pub quantity: Decimal,
    pub entry_price: Price,
    pub margin: Decimal,
}

impl Position {
    pub fn new(is_long: bool, quantity: Decimal, entry_price: Price, margin: Decimal) -> Self {
        Self {
            is_long,
            quantity,
            entry_price,
            margin,
        }
    }

    pub fn open(side: OrderSide, quantity: Decimal, price: Decimal, margin: Decimal) -> Self {
        Self::new(side.is_buy(), quantity, Price::new_unchecked(price), margin)
    }

    pub fn is_empty(&self) -> bool {
        self.quantity.is_zero()
    }

    pub fn side(&self) -> OrderSide {
        OrderSide::from_is_long(self.is_long)
    }

    /// Side of the orders that shrink this position
    pub fn closing_side(&self) -> OrderSide {
        self.side().opposite()
    }

    pub fn direction_sign(&self) -> Decimal {
        if self.is_long {
            dec!(1)
        } else {
            dec!(-1)
        }
    }

    // 4.1: pnl of the whole position at a price
    pub fn pnl_at(&self, price: Decimal) -> Decimal {
        self.quantity * (price - self.entry_price.value()) * self.direction_sign()
    }

    /// margin + pnl. negative means the position owes more than it holds.
    pub fn equity_at(&self, price: Decimal) -> Decimal {
        self.margin + self.pnl_at(price)
    }

    /// Uncovered loss if closed at `price`.
    pub fn deficit_at(&self, price: Decimal) -> Decimal {
        (-self.equity_at(price)).max(Decimal::ZERO)
    }

    /// adds to the position. entry becomes the quantity weighted average
    pub fn increase(&mut self, quantity: Decimal, price: Decimal, margin: Decimal) {
        let new_quantity = self.quantity + quantity;
        if new_quantity > Decimal::ZERO {
            let weighted = self.quantity * self.entry_price.value() + quantity * price;
            self.entry_price = Price::new_unchecked(weighted / new_quantity);
        }
        self.quantity = new_quantity;
        self.margin += margin;
    }

    /// Closes `quantity` at `price`, returns the payout. the closing share of
    /// margin is proportional, a full close takes all remaining margin.
    pub fn close(&mut self, quantity: Decimal, price: Decimal) -> Decimal {
        let quantity = quantity.min(self.quantity);
        let margin_share = if quantity == self.quantity {
            self.margin
        } else {
            self.margin * quantity / self.quantity
        };
        let pnl = quantity * (price - self.entry_price.value()) * self.direction_sign();

        self.quantity -= quantity;
        self.margin -= margin_share;
        margin_share + pnl
    }

    // 4.2: price where payout hits zero
    pub fn bankruptcy_price(&self) -> Decimal {
        if self.quantity.is_zero() {
            return self.entry_price.value();
        }
        let per_unit = self.margin / self.quantity;
        if self.is_long {
            self.entry_price.value() - per_unit
        } else {
            self.entry_price.value() + per_unit
        }
    }

    /// (margin + pnl) / notional at mark
    pub fn margin_ratio(&self, mark_price: Decimal) -> Decimal {
        let notional = mark_price * self.quantity;
        if notional.is_zero() {
            return Decimal::MAX;
        }
        self.equity_at(mark_price) / notional
    }
}
