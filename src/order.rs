//! Order types.
//!
//! An order is one tagged kind (spot or one of the derivative kinds) around a
//! shared `OrderInfo`. The hold an order locks at admission is tracked on the
//! order itself so fills and cancels release exactly what was locked.

use crate::types::{AccountId, Denom, MarketId, OrderHash, OrderSide, Price, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderType {
    /// Plain order. may open, grow, shrink or flip a position.
    #[default]
    Vanilla,
    /// Only shrinks an existing position. zero margin.
    ReduceOnly,
}

/// Order time in force options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Matches this block, rests with whatever is left.
    #[default]
    Limit,
    /// Sweeps the resting book this block, remainder cancelled. never rests.
    Market,
    /// Rejected at admission if it would take from the resting book.
    PostOnly,
}

/// Kind specific data. spot orders carry nothing extra.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderKind {
    Spot,
    Perpetual { margin: Decimal },
    Expiry { margin: Decimal, expiry: Timestamp },
    BinaryOption { margin: Decimal, expiry: Timestamp },
}

impl OrderKind {
    pub fn margin(&self) -> Decimal {
        match self {
            OrderKind::Spot => Decimal::ZERO,
            OrderKind::Perpetual { margin }
            | OrderKind::Expiry { margin, .. }
            | OrderKind::BinaryOption { margin, .. } => *margin,
        }
    }

    pub fn is_derivative(&self) -> bool {
        !matches!(self, OrderKind::Spot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub subaccount: SubaccountId,
    /// Receives the relayer share of fees. unset sends the whole fee to the auction pool.
    pub fee_recipient: Option<AccountId>,
    pub price: Price,
    pub quantity: Decimal,
    pub client_order_id: Option<String>,
}

/// Funds locked by an order. `remaining` shrinks with every fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderHold {
    pub denom: Denom,
    pub total: Decimal,
    pub remaining: Decimal,
}

impl OrderHold {
    pub fn new(denom: Denom, amount: Decimal) -> Self {
        Self {
            denom,
            total: amount,
            remaining: amount,
        }
    }
}

/// A trading order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub hash: OrderHash,
    pub market_id: MarketId,
    pub side: OrderSide,
    pub info: OrderInfo,
    pub kind: OrderKind,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub fillable_quantity: Decimal,
    pub hold: OrderHold,
    /// Margin not yet consumed by fills
    pub margin_remaining: Decimal,
    /// Admission order across the whole exchange. FIFO tie break.
    pub sequence: u64,
}

/// What one fill takes out of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillShare {
    pub hold_released: Decimal,
    pub execution_margin: Decimal,
    pub completed: bool,
}

impl Order {
    pub fn subaccount(&self) -> SubaccountId {
        self.info.subaccount
    }

    pub fn price(&self) -> Decimal {
        self.info.price.value()
    }

    pub fn quantity(&self) -> Decimal {
        self.info.quantity
    }

    pub fn margin(&self) -> Decimal {
        self.kind.margin()
    }

    pub fn is_reduce_only(&self) -> bool {
        self.order_type == OrderType::ReduceOnly
    }

    pub fn is_post_only(&self) -> bool {
        self.time_in_force == TimeInForce::PostOnly
    }

    pub fn is_market(&self) -> bool {
        self.time_in_force == TimeInForce::Market
    }

    pub fn is_filled(&self) -> bool {
        self.fillable_quantity.is_zero()
    }

    pub fn fee_recipient(&self) -> Option<AccountId> {
        self.info.fee_recipient
    }

    /// Consume `quantity` from the order. shares are proportional to the
    /// original quantity, the completing fill takes whatever is left so
    /// nothing is stranded by rounding.
    pub fn take_fill(&mut self, quantity: Decimal) -> FillShare {
        debug_assert!(quantity > Decimal::ZERO && quantity <= self.fillable_quantity);
        let completed = quantity >= self.fillable_quantity;

        let (hold_released, execution_margin) = if completed {
            (self.hold.remaining, self.margin_remaining)
        } else {
            // multiply first: price * q * rate / q stays exact
            (
                (self.hold.total * quantity / self.info.quantity).min(self.hold.remaining),
                (self.margin() * quantity / self.info.quantity).min(self.margin_remaining),
            )
        };

        self.fillable_quantity = if completed {
            Decimal::ZERO
        } else {
            self.fillable_quantity - quantity
        };
        self.hold.remaining -= hold_released;
        self.margin_remaining -= execution_margin;

        FillShare {
            hold_released,
            execution_margin,
            completed,
        }
    }
}

/// Caller side order description. validated and priced by admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market_id: MarketId,
    pub subaccount: SubaccountId,
    pub side: OrderSide,
    /// Limit price, or the worst acceptable price for a market order
    pub price: Decimal,
    pub quantity: Decimal,
    /// Derivative margin. ignored for spot and binary options.
    pub margin: Decimal,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub fee_recipient: Option<AccountId>,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn limit(
        market_id: MarketId,
        subaccount: SubaccountId,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> Self {
        Self {
            market_id,
            subaccount,
            side,
            price,
            quantity,
            margin: Decimal::ZERO,
            order_type: OrderType::Vanilla,
            time_in_force: TimeInForce::Limit,
            fee_recipient: None,
            client_order_id: None,
        }
    }

    pub fn with_margin(mut self, margin: Decimal) -> Self {
        self.margin = margin;
        self
    }

    pub fn reduce_only(mut self) -> Self {
        self.order_type = OrderType::ReduceOnly;
        self.margin = Decimal::ZERO;
        self
    }

    pub fn post_only(mut self) -> Self {
        self.time_in_force = TimeInForce::PostOnly;
        self
    }

    pub fn market(mut self) -> Self {
        self.time_in_force = TimeInForce::Market;
        self
    }

    pub fn with_client_id(mut self, id: &str) -> Self {
        self.client_order_id = Some(id.to_string());
        self
    }

    pub fn with_fee_recipient(mut self, account: AccountId) -> Self {
        self.fee_recipient = Some(account);
        self
    }
}

/// sha256 over the order's identity plus the subaccount nonce, so two
/// identical requests still get distinct hashes.
pub fn compute_order_hash(
    subaccount: &SubaccountId,
    market_id: MarketId,
    side: OrderSide,
    price: Decimal,
    quantity: Decimal,
    nonce: u64,
) -> OrderHash {
    let mut hasher = Sha256::new();
    hasher.update(subaccount.to_bytes());
    hasher.update(market_id.0.to_be_bytes());
    hasher.update([side.is_buy() as u8]);
    hasher.update(price.normalize().to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(quantity.normalize().to_string().as_bytes());
    hasher.update(nonce.to_be_bytes());
    OrderHash(hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn perp_order(quantity: Decimal, margin: Decimal, hold: Decimal) -> Order {
        let sub = SubaccountId::new(AccountId(1), 0);
        Order {
            hash: compute_order_hash(&sub, MarketId(1), OrderSide::Buy, dec!(100), quantity, 0),
            market_id: MarketId(1),
            side: OrderSide::Buy,
            info: OrderInfo {
                subaccount: sub,
                fee_recipient: None,
                price: Price::new_unchecked(dec!(100)),
                quantity,
                client_order_id: None,
            },
            kind: OrderKind::Perpetual { margin },
            order_type: OrderType::Vanilla,
            time_in_force: TimeInForce::Limit,
            fillable_quantity: quantity,
            hold: OrderHold::new(Denom::new("usdt"), hold),
            margin_remaining: margin,
            sequence: 1,
        }
    }

    #[test]
    fn fills_release_proportional_shares() {
        let mut order = perp_order(dec!(3), dec!(100), dec!(100.3));

        let first = order.take_fill(dec!(1));
        assert!(!first.completed);
        assert!(first.execution_margin > dec!(33.33) && first.execution_margin < dec!(33.34));

        let second = order.take_fill(dec!(1));
        let last = order.take_fill(dec!(1));
        assert!(last.completed);
        assert!(order.is_filled());

        // the completing fill sweeps up the rounding dust
        assert_eq!(
            first.execution_margin + second.execution_margin + last.execution_margin,
            dec!(100)
        );
        assert_eq!(
            first.hold_released + second.hold_released + last.hold_released,
            dec!(100.3)
        );
        assert_eq!(order.hold.remaining, Decimal::ZERO);
    }

    #[test]
    fn hash_depends_on_nonce() {
        let sub = SubaccountId::new(AccountId(7), 1);
        let a = compute_order_hash(&sub, MarketId(1), OrderSide::Sell, dec!(2000), dec!(1), 0);
        let b = compute_order_hash(&sub, MarketId(1), OrderSide::Sell, dec!(2000), dec!(1), 1);
        let a_again = compute_order_hash(&sub, MarketId(1), OrderSide::Sell, dec!(2000.0), dec!(1), 0);
        assert_ne!(a, b);
        assert_eq!(a, a_again);
    }

    #[test]
    fn fee_recipient_is_optional() {
        let mut order = perp_order(dec!(1), dec!(10), dec!(10));
        assert_eq!(order.fee_recipient(), None);
        order.info.fee_recipient = Some(AccountId(9));
        assert_eq!(order.fee_recipient(), Some(AccountId(9)));
    }
}
