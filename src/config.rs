// 7.0 config.rs: exchange wide settings in one place. fee defaults, margin defaults, limits.
// 7.1 markets copy the defaults at creation and may override them per market.

use crate::funding::FundingParams;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/** 7.2: exchange parameters. fee rates are fractions, 0.001 = 10 bps */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeParams {
    // Maker fee rate for new markets (negative = rebate)
    pub default_maker_fee_rate: Decimal,
    // Taker fee rate for new markets
    pub default_taker_fee_rate: Decimal,
    // Share of every positive fee paid to the order's fee recipient
    pub relayer_fee_share_rate: Decimal,
    // Initial margin ratio for new derivative markets
    pub default_initial_margin_ratio: Decimal,
    // Maintenance margin ratio for new derivative markets
    pub default_maintenance_margin_ratio: Decimal,
    // Cap on live orders per subaccount per market side
    pub max_orders_per_side: usize,
    // Decimal places kept when haircutting payouts in a forced settlement
    pub payout_scale: u32,
    // Perpetual funding schedule
    #[serde(default)]
    pub funding: FundingParams,
}

impl Default for ExchangeParams {
    fn default() -> Self {
        Self {
            default_maker_fee_rate: dec!(-0.0001), // 1 bp rebate
            default_taker_fee_rate: dec!(0.001),   // 10 bps
            relayer_fee_share_rate: dec!(0.4),
            default_initial_margin_ratio: dec!(0.05),
            default_maintenance_margin_ratio: dec!(0.02),
            max_orders_per_side: 20,
            payout_scale: 18,
            funding: FundingParams::default(),
        }
    }
}

impl ExchangeParams {
    // Create a configuration preset for testnet
    pub fn testnet() -> Self {
        Self {
            default_maker_fee_rate: Decimal::ZERO, // free makers on testnet
            default_taker_fee_rate: dec!(0.0005),
            max_orders_per_side: 100,
            ..Self::default()
        }
    }

    // Create a configuration preset for mainnet with conservative settings
    pub fn mainnet_conservative() -> Self {
        Self {
            default_initial_margin_ratio: dec!(0.1),
            default_maintenance_margin_ratio: dec!(0.05),
            max_orders_per_side: 10,
            ..Self::default()
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let params: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_fee_rates(
            self.default_maker_fee_rate,
            self.default_taker_fee_rate,
            self.relayer_fee_share_rate,
        )?;

        if self.default_maintenance_margin_ratio <= Decimal::ZERO
            || self.default_maintenance_margin_ratio >= self.default_initial_margin_ratio
        {
            return Err(ConfigError::InvalidMargin {
                reason: "maintenance ratio must be in (0, initial ratio)".to_string(),
            });
        }
        if self.default_initial_margin_ratio > Decimal::ONE {
            return Err(ConfigError::InvalidMargin {
                reason: "initial ratio above 1".to_string(),
            });
        }

        if self.max_orders_per_side == 0 {
            return Err(ConfigError::InvalidLimits {
                reason: "max_orders_per_side must be positive".to_string(),
            });
        }
        if self.funding.interval_seconds <= 0 || self.funding.hourly_funding_rate_cap < Decimal::ZERO {
            return Err(ConfigError::InvalidLimits {
                reason: "funding interval must be positive and the rate cap non-negative".to_string(),
            });
        }
        if self.payout_scale > 28 {
            return Err(ConfigError::InvalidLimits {
                reason: "payout_scale exceeds decimal precision".to_string(),
            });
        }

        Ok(())
    }
}

/// Fee schedule check shared by params and markets: the taker fee left after the
/// relayer cut must fund the maker rebate.
pub fn validate_fee_rates(
    maker: Decimal,
    taker: Decimal,
    relayer_share: Decimal,
) -> Result<(), ConfigError> {
    if relayer_share < Decimal::ZERO || relayer_share > Decimal::ONE {
        return Err(ConfigError::InvalidFees {
            reason: format!("relayer share {relayer_share} outside [0, 1]"),
        });
    }
    if taker < Decimal::ZERO {
        return Err(ConfigError::InvalidFees {
            reason: format!("negative taker fee {taker}"),
        });
    }
    if taker * (Decimal::ONE - relayer_share) + maker < Decimal::ZERO {
        return Err(ConfigError::InvalidFees {
            reason: format!("maker rebate {maker} exceeds taker fee {taker} net of relayer share"),
        });
    }
    Ok(())
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid margin config: {reason}")]
    InvalidMargin { reason: String },
    #[error("invalid fee config: {reason}")]
    InvalidFees { reason: String },
    #[error("invalid limits: {reason}")]
    InvalidLimits { reason: String },
    #[error("config parse error: {0}")]
    Parse(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn params(&self) -> ExchangeParams {
        match self {
            Environment::Development => ExchangeParams::default(),
            Environment::Testnet => ExchangeParams::testnet(),
            Environment::Mainnet => ExchangeParams::mainnet_conservative(),
        }
    }
}
