//! Resting order book and the per-block transient set.
//!
//! Both book sides iterate best price first with FIFO ties, so matching never
//! depends on map iteration order.

use crate::order::Order;
use crate::types::{MarketId, OrderHash, OrderSide, SubaccountId};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

/// Sort key shared by both sides: buys store the negated price so that
/// ascending key order is best price first on either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BookKey {
    priority: Decimal,
    sequence: u64,
}

impl BookKey {
    pub fn new(side: OrderSide, price: Decimal, sequence: u64) -> Self {
        let priority = match side {
            OrderSide::Buy => -price,
            OrderSide::Sell => price,
        };
        Self { priority, sequence }
    }

    pub fn for_order(order: &Order) -> Self {
        Self::new(order.side, order.price(), order.sequence)
    }
}

/// A single price level in the order book
#[derive(Debug, Clone, PartialEq)]
pub struct PriceLevel {
    pub price: Decimal,
    pub total_quantity: Decimal,
    pub order_count: usize,
}

#[derive(Debug, Clone)]
pub struct OrderBook {
    pub market_id: MarketId,
    buys: BTreeMap<BookKey, Order>,
    sells: BTreeMap<BookKey, Order>,
    /// lookup only, never iterated
    index: HashMap<OrderHash, (OrderSide, BookKey)>,
}

impl OrderBook {
    pub fn new(market_id: MarketId) -> Self {
        Self {
            market_id,
            buys: BTreeMap::new(),
            sells: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    fn side(&self, side: OrderSide) -> &BTreeMap<BookKey, Order> {
        match side {
            OrderSide::Buy => &self.buys,
            OrderSide::Sell => &self.sells,
        }
    }

    fn side_mut(&mut self, side: OrderSide) -> &mut BTreeMap<BookKey, Order> {
        match side {
            OrderSide::Buy => &mut self.buys,
            OrderSide::Sell => &mut self.sells,
        }
    }

    pub fn insert(&mut self, order: Order) {
        let key = BookKey::for_order(&order);
        let side = order.side;
        self.index.insert(order.hash, (side, key));
        self.side_mut(side).insert(key, order);
    }

    pub fn remove(&mut self, hash: &OrderHash) -> Option<Order> {
        let (side, key) = self.index.remove(hash)?;
        self.side_mut(side).remove(&key)
    }

    pub fn get(&self, hash: &OrderHash) -> Option<&Order> {
        let (side, key) = self.index.get(hash)?;
        self.side(*side).get(key)
    }

    pub fn get_mut(&mut self, hash: &OrderHash) -> Option<&mut Order> {
        let (side, key) = *self.index.get(hash)?;
        self.side_mut(side).get_mut(&key)
    }

    pub fn contains(&self, hash: &OrderHash) -> bool {
        self.index.contains_key(hash)
    }

    /// Best price on a side (highest buy, lowest sell)
    pub fn best_price(&self, side: OrderSide) -> Option<Decimal> {
        self.side(side).values().next().map(|o| o.price())
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_price(OrderSide::Buy), self.best_price(OrderSide::Sell)) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Orders on a side, best first.
    pub fn iter_side(&self, side: OrderSide) -> impl Iterator<Item = &Order> {
        self.side(side).values()
    }

    /// Hashes on a side, best first. snapshot, safe to mutate the book while walking it.
    pub fn hashes(&self, side: OrderSide) -> Vec<OrderHash> {
        self.side(side).values().map(|o| o.hash).collect()
    }

    /// All orders of one subaccount, buys then sells, each side best first.
    pub fn orders_of(&self, subaccount: &SubaccountId) -> Vec<&Order> {
        self.buys
            .values()
            .chain(self.sells.values())
            .filter(|o| o.subaccount() == *subaccount)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.buys.values().chain(self.sells.values())
    }

    pub fn levels(&self, side: OrderSide, max_levels: usize) -> Vec<PriceLevel> {
        let mut levels: Vec<PriceLevel> = Vec::new();
        for order in self.side(side).values() {
            if levels.last().map(|l| l.price) != Some(order.price()) {
                if levels.len() >= max_levels {
                    break;
                }
                levels.push(PriceLevel {
                    price: order.price(),
                    total_quantity: Decimal::ZERO,
                    order_count: 0,
                });
            }
            if let Some(level) = levels.last_mut() {
                level.total_quantity += order.fillable_quantity;
                level.order_count += 1;
            }
        }
        levels
    }

    pub fn len(&self) -> usize {
        self.buys.len() + self.sells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buys.is_empty() && self.sells.is_empty()
    }
}

/// Orders admitted during the current block, in admission order.
#[derive(Debug, Clone, Default)]
pub struct TransientOrders {
    orders: Vec<Order>,
}

impl TransientOrders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, order: Order) {
        self.orders.push(order);
    }

    pub fn remove(&mut self, hash: &OrderHash) -> Option<Order> {
        let pos = self.orders.iter().position(|o| o.hash == *hash)?;
        Some(self.orders.remove(pos))
    }

    pub fn get(&self, hash: &OrderHash) -> Option<&Order> {
        self.orders.iter().find(|o| o.hash == *hash)
    }

    pub fn get_mut(&mut self, hash: &OrderHash) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.hash == *hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Order> {
        self.orders.iter_mut()
    }

    pub fn as_mut_slice(&mut self) -> &mut [Order] {
        &mut self.orders
    }

    /// Drops orders the block fully consumed.
    pub fn prune_filled(&mut self) {
        self.orders.retain(|o| !o.is_filled());
    }

    pub fn take_all(&mut self) -> Vec<Order> {
        std::mem::take(&mut self.orders)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
