//! Market definitions.
//!
//! A market is a single trading pair. Spot markets move the base denom itself,
//! derivative markets (perpetual, time expiry, binary option) only move margin
//! in the quote denom and track positions.

use crate::config::{validate_fee_rates, ConfigError, ExchangeParams};
use crate::types::{is_tick_multiple, Denom, MarketId, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketKind {
    Spot,
    Perpetual,
    /// Time expiry future, settled at the oracle price once `expiry` passes.
    Expiry { expiry: Timestamp },
    /// Fully collateralized option on a unit scale, settles at a price in [0, 1].
    BinaryOption { expiry: Timestamp },
}

impl MarketKind {
    pub fn is_derivative(&self) -> bool {
        !matches!(self, MarketKind::Spot)
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, MarketKind::BinaryOption { .. })
    }

    pub fn expiry(&self) -> Option<Timestamp> {
        match self {
            MarketKind::Expiry { expiry } | MarketKind::BinaryOption { expiry } => Some(*expiry),
            _ => None,
        }
    }
}

/// Market status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MarketStatus {
    /// Market is open for trading
    #[default]
    Active,
    /// Trading halted, positions were force settled or an admin paused it
    Paused,
    /// Expiry reached and positions settled
    Expired,
    /// Removed for good
    Demolished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    /// Human-readable ticker (e.g., "INJ/USDT", "BTC/USDT PERP")
    pub ticker: String,
    pub kind: MarketKind,
    /// Only moved by spot markets
    pub base_denom: Denom,
    pub quote_denom: Denom,
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
    pub relayer_fee_share_rate: Decimal,
    pub min_price_tick_size: Decimal,
    pub min_quantity_tick_size: Decimal,
    /// Zero for spot
    pub initial_margin_ratio: Decimal,
    /// Zero for spot
    pub maintenance_margin_ratio: Decimal,
    pub status: MarketStatus,
}

impl Market {
    pub fn spot(id: MarketId, ticker: &str, base: Denom, quote: Denom, params: &ExchangeParams) -> Self {
        Self {
            id,
            ticker: ticker.to_string(),
            kind: MarketKind::Spot,
            base_denom: base,
            quote_denom: quote,
            maker_fee_rate: params.default_maker_fee_rate,
            taker_fee_rate: params.default_taker_fee_rate,
            relayer_fee_share_rate: params.relayer_fee_share_rate,
            min_price_tick_size: Decimal::new(1, 3),
            min_quantity_tick_size: Decimal::new(1, 3),
            initial_margin_ratio: Decimal::ZERO,
            maintenance_margin_ratio: Decimal::ZERO,
            status: MarketStatus::Active,
        }
    }

    pub fn perpetual(id: MarketId, ticker: &str, quote: Denom, params: &ExchangeParams) -> Self {
        Self::derivative(id, ticker, MarketKind::Perpetual, quote, params)
    }

    pub fn expiry_future(
        id: MarketId,
        ticker: &str,
        quote: Denom,
        expiry: Timestamp,
        params: &ExchangeParams,
    ) -> Self {
        Self::derivative(id, ticker, MarketKind::Expiry { expiry }, quote, params)
    }

    pub fn binary_option(
        id: MarketId,
        ticker: &str,
        quote: Denom,
        expiry: Timestamp,
        params: &ExchangeParams,
    ) -> Self {
        let mut market = Self::derivative(id, ticker, MarketKind::BinaryOption { expiry }, quote, params);
        // margin is the full worst case loss, ratios are not used
        market.initial_margin_ratio = Decimal::ONE;
        market.maintenance_margin_ratio = Decimal::ZERO;
        market.min_price_tick_size = Decimal::new(1, 2);
        market.min_quantity_tick_size = Decimal::ONE;
        market
    }

    fn derivative(
        id: MarketId,
        ticker: &str,
        kind: MarketKind,
        quote: Denom,
        params: &ExchangeParams,
    ) -> Self {
        let base = ticker.split('/').next().unwrap_or(ticker);
        Self {
            id,
            ticker: ticker.to_string(),
            kind,
            base_denom: Denom::new(base),
            quote_denom: quote,
            maker_fee_rate: params.default_maker_fee_rate,
            taker_fee_rate: params.default_taker_fee_rate,
            relayer_fee_share_rate: params.relayer_fee_share_rate,
            min_price_tick_size: Decimal::new(1, 2),
            min_quantity_tick_size: Decimal::new(1, 3),
            initial_margin_ratio: params.default_initial_margin_ratio,
            maintenance_margin_ratio: params.default_maintenance_margin_ratio,
            status: MarketStatus::Active,
        }
    }

    pub fn with_fees(mut self, maker: Decimal, taker: Decimal) -> Self {
        self.maker_fee_rate = maker;
        self.taker_fee_rate = taker;
        self
    }

    pub fn with_ticks(mut self, price_tick: Decimal, quantity_tick: Decimal) -> Self {
        self.min_price_tick_size = price_tick;
        self.min_quantity_tick_size = quantity_tick;
        self
    }

    pub fn with_margin_ratios(mut self, initial: Decimal, maintenance: Decimal) -> Self {
        self.initial_margin_ratio = initial;
        self.maintenance_margin_ratio = maintenance;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }

    pub fn is_derivative(&self) -> bool {
        self.kind.is_derivative()
    }

    /// Rate that bounds what any fill of an order can be charged.
    pub fn max_fee_rate(&self) -> Decimal {
        self.maker_fee_rate.max(self.taker_fee_rate).max(Decimal::ZERO)
    }

    /// Checks market parameters before the market is registered.
    pub fn validate(&self) -> Result<(), MarketError> {
        validate_fee_rates(self.maker_fee_rate, self.taker_fee_rate, self.relayer_fee_share_rate)?;
        if self.min_price_tick_size <= Decimal::ZERO || self.min_quantity_tick_size <= Decimal::ZERO {
            return Err(MarketError::InvalidTickSize);
        }
        match self.kind {
            MarketKind::Spot => {
                if self.base_denom == self.quote_denom {
                    return Err(MarketError::SameDenoms(self.base_denom.clone()));
                }
            }
            MarketKind::BinaryOption { .. } => {
                if self.min_price_tick_size >= Decimal::ONE {
                    return Err(MarketError::InvalidTickSize);
                }
            }
            MarketKind::Perpetual | MarketKind::Expiry { .. } => {
                if self.maintenance_margin_ratio <= Decimal::ZERO
                    || self.maintenance_margin_ratio >= self.initial_margin_ratio
                {
                    return Err(MarketError::InvalidMarginRatios {
                        initial: self.initial_margin_ratio,
                        maintenance: self.maintenance_margin_ratio,
                    });
                }
            }
        }
        Ok(())
    }

    /// Validate a price against the tick grid (and the unit interval for binary options)
    pub fn validate_price(&self, price: Decimal) -> Result<Price, MarketError> {
        let checked = Price::new(price).ok_or(MarketError::InvalidPrice(price))?;
        if !is_tick_multiple(price, self.min_price_tick_size) {
            return Err(MarketError::InvalidPriceTick {
                price,
                tick: self.min_price_tick_size,
            });
        }
        if self.kind.is_binary() && price >= Decimal::ONE {
            return Err(MarketError::InvalidPrice(price));
        }
        Ok(checked)
    }

    /// Validate an order quantity
    pub fn validate_quantity(&self, quantity: Decimal) -> Result<(), MarketError> {
        if quantity <= Decimal::ZERO {
            return Err(MarketError::InvalidQuantity(quantity));
        }
        if !is_tick_multiple(quantity, self.min_quantity_tick_size) {
            return Err(MarketError::InvalidQuantityTick {
                quantity,
                tick: self.min_quantity_tick_size,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarketError {
    #[error("Invalid price: {0}")]
    InvalidPrice(Decimal),

    #[error("Price {price} not on tick {tick}")]
    InvalidPriceTick { price: Decimal, tick: Decimal },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(Decimal),

    #[error("Quantity {quantity} not on tick {tick}")]
    InvalidQuantityTick { quantity: Decimal, tick: Decimal },

    #[error("Tick sizes must be positive")]
    InvalidTickSize,

    #[error("Base and quote denom are both {0}")]
    SameDenoms(Denom),

    #[error("Invalid margin ratios: initial {initial}, maintenance {maintenance}")]
    InvalidMarginRatios { initial: Decimal, maintenance: Decimal },

    #[error("Fee schedule: {0}")]
    Fees(#[from] ConfigError),
}
