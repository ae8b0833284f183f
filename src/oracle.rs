// 9.0: mark price input. the oracle is read only; staleness is its own concern.
// zero is a valid price, a binary option may settle there.
// when it has nothing for a market the book mid price stands in.

use crate::orderbook::OrderBook;
use crate::types::MarketId;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

pub trait PriceOracle {
    fn mark_price(&self, market: MarketId) -> Option<Decimal>;
}

/// Oracle backed by a fixed price table. used by the simulator and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceOracle {
    prices: BTreeMap<MarketId, Decimal>,
}

impl StaticPriceOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, market: MarketId, price: Decimal) -> Self {
        self.set_price(market, price);
        self
    }

    pub fn set_price(&mut self, market: MarketId, price: Decimal) {
        self.prices.insert(market, price);
    }

    pub fn clear_price(&mut self, market: MarketId) {
        self.prices.remove(&market);
    }
}

impl PriceOracle for StaticPriceOracle {
    fn mark_price(&self, market: MarketId) -> Option<Decimal> {
        self.prices.get(&market).copied().filter(|p| *p >= Decimal::ZERO)
    }
}

/// Oracle price, else the mid of the resting book.
pub fn resolve_mark_price<O: PriceOracle + ?Sized>(
    oracle: &O,
    market: MarketId,
    book: Option<&OrderBook>,
) -> Option<Decimal> {
    oracle
        .mark_price(market)
        .or_else(|| book.and_then(OrderBook::mid_price))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::tests::limit_order;
    use crate::types::OrderSide;
    use rust_decimal_macros::dec;

    #[test]
    fn oracle_price_wins() {
        let oracle = StaticPriceOracle::new().with_price(MarketId(1), dec!(100));
        let mut book = OrderBook::new(MarketId(1));
        book.insert(limit_order(1, OrderSide::Buy, dec!(90), dec!(1), 1));
        book.insert(limit_order(2, OrderSide::Sell, dec!(94), dec!(1), 2));
        assert_eq!(resolve_mark_price(&oracle, MarketId(1), Some(&book)), Some(dec!(100)));
    }

    #[test]
    fn falls_back_to_mid() {
        let oracle = StaticPriceOracle::new();
        let mut book = OrderBook::new(MarketId(1));
        book.insert(limit_order(1, OrderSide::Buy, dec!(90), dec!(1), 1));
        assert_eq!(resolve_mark_price(&oracle, MarketId(1), Some(&book)), None);
        book.insert(limit_order(2, OrderSide::Sell, dec!(94), dec!(1), 2));
        assert_eq!(resolve_mark_price(&oracle, MarketId(1), Some(&book)), Some(dec!(92)));
    }
}
