// 11.0: every state change produces an event. used for audit trails and for
// notifying whatever sits outside the block. EventPayload lists them all.

use crate::conditional::ConditionalType;
use crate::liquidation::LiquidationStatus;
use crate::market::MarketStatus;
use crate::matching::{LiquidityRole, MatchMode};
use crate::types::{Denom, MarketId, OrderHash, OrderSide, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Balance events
    Deposit(DepositEvent),
    Withdrawal(WithdrawalEvent),
    WithdrawalRejected(WithdrawalRejectedEvent),

    // Order events
    OrderPlaced(OrderPlacedEvent),
    OrderCancelled(OrderCancelledEvent),
    ConditionalOrderPlaced(ConditionalOrderPlacedEvent),
    ConditionalOrderTriggered(ConditionalOrderTriggeredEvent),
    Fill(FillEvent),
    BlockMatched(BlockMatchedEvent),

    // Position events
    PositionUpdated(PositionUpdatedEvent),
    PositionClosed(PositionClosedEvent),
    FundingSettled(FundingSettledEvent),

    // Risk events
    Liquidation(LiquidationEvent),
    InsuranceDraw(InsuranceDrawEvent),
    MarketSettled(MarketSettledEvent),

    // Market events
    MarketStatusChanged(MarketStatusChangedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositEvent {
    pub subaccount: SubaccountId,
    pub denom: Denom,
    pub amount: Decimal,
    pub new_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    pub subaccount: SubaccountId,
    pub denom: Denom,
    pub amount: Decimal,
    pub new_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRejectedEvent {
    pub subaccount: SubaccountId,
    pub denom: Denom,
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
    pub subaccount: SubaccountId,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub hold: Decimal,
    pub reduce_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    UserRequested,
    /// Market order remainder, market orders never rest
    Unfilled,
    ReduceOnlyEvicted,
    PositionClosed,
    Liquidation,
    DeficitCoverage,
    MarketSettled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
    pub subaccount: SubaccountId,
    pub released: Decimal,
    pub reason: CancelReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalOrderPlacedEvent {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
    pub subaccount: SubaccountId,
    pub side: OrderSide,
    pub trigger_price: Decimal,
    pub kind: ConditionalType,
}

/// `admitted` is the hash of the live order, `None` when admission refused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalOrderTriggeredEvent {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
    pub subaccount: SubaccountId,
    pub mark_price: Decimal,
    pub admitted: Option<OrderHash>,
    pub rejection: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillEvent {
    pub market_id: MarketId,
    pub order_hash: OrderHash,
    pub subaccount: SubaccountId,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub role: LiquidityRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMatchedEvent {
    pub market_id: MarketId,
    pub mode: MatchMode,
    pub clearing_price: Option<Decimal>,
    pub matched_quantity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdatedEvent {
    pub market_id: MarketId,
    pub subaccount: SubaccountId,
    pub is_long: bool,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub margin: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    pub market_id: MarketId,
    pub subaccount: SubaccountId,
    pub exit_price: Decimal,
    pub payout: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSettledEvent {
    pub market_id: MarketId,
    pub funding_rate: Decimal,
    pub cumulative_funding: Decimal,
    pub mark_price: Decimal,
    pub positions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub market_id: MarketId,
    pub subaccount: SubaccountId,
    pub quantity: Decimal,
    pub mark_price: Decimal,
    pub clearing_price: Option<Decimal>,
    pub payout: Decimal,
    pub deficit: Decimal,
    pub status: LiquidationStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsuranceDrawEvent {
    pub market_id: MarketId,
    pub amount: Decimal,
    pub remaining: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSettledEvent {
    pub market_id: MarketId,
    pub settlement_price: Decimal,
    pub positions_closed: usize,
    pub haircut_factor: Decimal,
    pub shortfall: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStatusChangedEvent {
    pub market_id: MarketId,
    pub from: MarketStatus,
    pub to: MarketStatus,
}
