//! Conditional orders: stop and take-profit orders parked off the book.
//!
//! A conditional order holds nothing and is invisible to matching until the
//! mark price reaches its trigger. Whether it is a stop or a take-profit
//! follows from its side and where the trigger sits against mark when it is
//! placed: a buy triggering above mark is a stop, below mark a take-profit,
//! and the reverse for sells.

use crate::order::OrderRequest;
use crate::types::{MarketId, OrderHash, OrderSide, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionalType {
    StopLoss,
    TakeProfit,
}

/// How mark is compared against the trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerCondition {
    /// Mark at or above the trigger
    Above,
    /// Mark at or below the trigger
    Below,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionalError {
    #[error("trigger price {trigger} equals mark {mark}")]
    TriggerAtMark { trigger: Decimal, mark: Decimal },
}

/// A parked order waiting for its trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionalOrder {
    pub hash: OrderHash,
    /// Admitted as-is once triggered
    pub request: OrderRequest,
    pub trigger_price: Decimal,
    pub condition: TriggerCondition,
    pub kind: ConditionalType,
    pub sequence: u64,
}

impl ConditionalOrder {
    pub fn new(
        hash: OrderHash,
        request: OrderRequest,
        trigger_price: Decimal,
        mark_price: Decimal,
        sequence: u64,
    ) -> Result<Self, ConditionalError> {
        let condition = if trigger_price > mark_price {
            TriggerCondition::Above
        } else if trigger_price < mark_price {
            TriggerCondition::Below
        } else {
            return Err(ConditionalError::TriggerAtMark {
                trigger: trigger_price,
                mark: mark_price,
            });
        };
        let kind = match (request.side, condition) {
            (OrderSide::Buy, TriggerCondition::Above) | (OrderSide::Sell, TriggerCondition::Below) => {
                ConditionalType::StopLoss
            }
            _ => ConditionalType::TakeProfit,
        };
        Ok(Self {
            hash,
            request,
            trigger_price,
            condition,
            kind,
            sequence,
        })
    }

    pub fn subaccount(&self) -> SubaccountId {
        self.request.subaccount
    }

    pub fn side(&self) -> OrderSide {
        self.request.side
    }

    pub fn should_trigger(&self, mark_price: Decimal) -> bool {
        match self.condition {
            TriggerCondition::Above => mark_price >= self.trigger_price,
            TriggerCondition::Below => mark_price <= self.trigger_price,
        }
    }
}

/// Conditional orders of one market, in placement order.
#[derive(Debug, Clone)]
pub struct ConditionalOrderBook {
    pub market_id: MarketId,
    orders: BTreeMap<u64, ConditionalOrder>,
    /// lookup only, never iterated
    index: HashMap<OrderHash, u64>,
}

impl ConditionalOrderBook {
    pub fn new(market_id: MarketId) -> Self {
        Self {
            market_id,
            orders: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn insert(&mut self, order: ConditionalOrder) {
        self.index.insert(order.hash, order.sequence);
        self.orders.insert(order.sequence, order);
    }

    pub fn remove(&mut self, hash: &OrderHash) -> Option<ConditionalOrder> {
        let sequence = self.index.remove(hash)?;
        self.orders.remove(&sequence)
    }

    pub fn get(&self, hash: &OrderHash) -> Option<&ConditionalOrder> {
        self.index.get(hash).and_then(|s| self.orders.get(s))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConditionalOrder> {
        self.orders.values()
    }

    pub fn orders_of(&self, subaccount: &SubaccountId) -> Vec<&ConditionalOrder> {
        self.orders.values().filter(|o| o.subaccount() == *subaccount).collect()
    }

    /// Hashes due at `mark_price`, placement order.
    pub fn check_triggers(&self, mark_price: Decimal) -> Vec<OrderHash> {
        self.orders
            .values()
            .filter(|o| o.should_trigger(mark_price))
            .map(|o| o.hash)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Removes and returns everything due at `mark_price`, placement order.
pub fn process_triggers(book: &mut ConditionalOrderBook, mark_price: Decimal) -> Vec<ConditionalOrder> {
    book.check_triggers(mark_price)
        .iter()
        .filter_map(|hash| book.remove(hash))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AccountId;
    use rust_decimal_macros::dec;

    fn request(side: OrderSide) -> OrderRequest {
        OrderRequest::limit(MarketId(1), SubaccountId::new(AccountId(1), 0), side, dec!(100), dec!(1))
    }

    fn conditional(seq: u64, side: OrderSide, trigger: Decimal) -> ConditionalOrder {
        ConditionalOrder::new(OrderHash([seq as u8; 32]), request(side), trigger, dec!(100), seq).unwrap()
    }

    #[test]
    fn kind_follows_side_and_trigger() {
        let stop_buy = conditional(1, OrderSide::Buy, dec!(110));
        assert_eq!(stop_buy.kind, ConditionalType::StopLoss);
        assert_eq!(stop_buy.condition, TriggerCondition::Above);

        let take_buy = conditional(2, OrderSide::Buy, dec!(90));
        assert_eq!(take_buy.kind, ConditionalType::TakeProfit);
        assert_eq!(take_buy.condition, TriggerCondition::Below);

        assert_eq!(conditional(3, OrderSide::Sell, dec!(90)).kind, ConditionalType::StopLoss);
        assert_eq!(conditional(4, OrderSide::Sell, dec!(110)).kind, ConditionalType::TakeProfit);
    }

    #[test]
    fn trigger_at_mark_is_refused() {
        let err = ConditionalOrder::new(OrderHash([1; 32]), request(OrderSide::Buy), dec!(100), dec!(100), 1);
        assert_eq!(
            err.unwrap_err(),
            ConditionalError::TriggerAtMark {
                trigger: dec!(100),
                mark: dec!(100)
            }
        );
    }

    #[test]
    fn triggers_inclusive_of_price() {
        let stop = conditional(1, OrderSide::Sell, dec!(95));
        assert!(!stop.should_trigger(dec!(96)));
        assert!(stop.should_trigger(dec!(95)));
        assert!(stop.should_trigger(dec!(80)));
    }

    #[test]
    fn book_triggers_in_placement_order() {
        let mut book = ConditionalOrderBook::new(MarketId(1));
        book.insert(conditional(3, OrderSide::Sell, dec!(95)));
        book.insert(conditional(1, OrderSide::Sell, dec!(90)));
        book.insert(conditional(2, OrderSide::Buy, dec!(110)));
        assert_eq!(book.len(), 3);

        let fired = process_triggers(&mut book, dec!(89));
        let sequences: Vec<u64> = fired.iter().map(|o| o.sequence).collect();
        assert_eq!(sequences, vec![1, 3]);
        assert_eq!(book.len(), 1);
        assert!(book.get(&OrderHash([2; 32])).is_some());
        assert!(book.get(&OrderHash([1; 32])).is_none());
    }

    #[test]
    fn remove_unknown_is_none() {
        let mut book = ConditionalOrderBook::new(MarketId(1));
        assert!(book.remove(&OrderHash([9; 32])).is_none());
        assert!(book.is_empty());
    }
}
