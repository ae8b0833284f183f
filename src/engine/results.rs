// 8.0.2: result types and errors for exchange operations.

use crate::bank::BankError;
use crate::conditional::ConditionalError;
use crate::config::ConfigError;
use crate::deposit::InvariantViolation;
use crate::insurance::InsuranceError;
use crate::liquidation::LiquidationStatus;
use crate::margin::MarginError;
use crate::market::{MarketError, MarketStatus};
use crate::matching::{ClearingResult, MatchMode};
use crate::order::OrderRequest;
use crate::reduce_only::ReduceOnlyError;
use crate::types::{Denom, MarketId, OrderHash, SubaccountId, Timestamp};
use rust_decimal::Decimal;

/// How a cancel names its order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderSelector {
    Hash(OrderHash),
    ClientId(String),
}

/// Cancels and creates for one subaccount. items are independent: a
/// failing item is reported and its siblings still run.
#[derive(Debug, Clone)]
pub struct BatchUpdate {
    pub subaccount: SubaccountId,
    /// Markets whose orders of the subaccount are all cancelled first
    pub cancel_all_markets: Vec<MarketId>,
    pub cancels: Vec<(MarketId, OrderSelector)>,
    pub creates: Vec<OrderRequest>,
}

impl BatchUpdate {
    pub fn new(subaccount: SubaccountId) -> Self {
        Self {
            subaccount,
            cancel_all_markets: Vec::new(),
            cancels: Vec::new(),
            creates: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchUpdateResult {
    /// Orders cancelled per market in `cancel_all_markets`
    pub cancel_all: Vec<Result<usize, ExchangeError>>,
    pub cancels: Vec<Result<(), ExchangeError>>,
    pub creates: Vec<Result<OrderHash, ExchangeError>>,
}

/// One matching pass inside a block.
#[derive(Debug, Clone)]
pub struct PassSummary {
    pub mode: MatchMode,
    pub clearing_price: Option<Decimal>,
    pub matched_quantity: Decimal,
    pub trades: usize,
}

impl From<&ClearingResult> for PassSummary {
    fn from(result: &ClearingResult) -> Self {
        Self {
            mode: result.mode,
            clearing_price: result.clearing_price,
            matched_quantity: result.matched_quantity,
            trades: result.trades.len(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockMatchingReport {
    pub market_id: MarketId,
    pub passes: Vec<PassSummary>,
    pub matched_quantity: Decimal,
    /// Clearing price of the batch auction, if it crossed
    pub auction_clearing_price: Option<Decimal>,
    pub cancelled: Vec<OrderHash>,
    pub promoted: Vec<OrderHash>,
    /// Fees collected net of rebates, quote denom
    pub fees_collected: Decimal,
    /// Set when an uncovered loss forced the market into settlement
    pub forced_settlement: Option<MarketSettlementReport>,
}

impl BlockMatchingReport {
    pub fn empty(market_id: MarketId) -> Self {
        Self {
            market_id,
            passes: Vec::new(),
            matched_quantity: Decimal::ZERO,
            auction_clearing_price: None,
            cancelled: Vec::new(),
            promoted: Vec::new(),
            fees_collected: Decimal::ZERO,
            forced_settlement: None,
        }
    }
}

/// One conditional order whose trigger was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOutcome {
    pub market_id: MarketId,
    pub conditional: OrderHash,
    /// The live order it became, or why admission refused it
    pub admitted: Result<OrderHash, ExchangeError>,
}

/// One closed funding interval of a perpetual market.
#[derive(Debug, Clone, PartialEq)]
pub struct FundingResult {
    pub market_id: MarketId,
    pub funding_rate: Decimal,
    pub cumulative_funding: Decimal,
    pub mark_price: Decimal,
    /// Paid by longs when the rate is positive
    pub total_long_payments: Decimal,
    pub total_short_payments: Decimal,
    pub positions_affected: usize,
}

/// Everything one `end_block` did, markets in id order.
#[derive(Debug, Clone, Default)]
pub struct EndBlockReport {
    pub triggered: Vec<TriggerOutcome>,
    pub matching: Vec<BlockMatchingReport>,
    pub funding: Vec<FundingResult>,
    pub expired: Vec<MarketSettlementReport>,
}

/// How a deficit was paid for, in chain order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeficitCoverage {
    pub deficit: Decimal,
    pub from_available: Decimal,
    pub from_order_holds: Decimal,
    pub from_insurance: Decimal,
    pub uncovered: Decimal,
}

impl DeficitCoverage {
    pub fn covered(&self) -> Decimal {
        self.from_available + self.from_order_holds + self.from_insurance
    }
}

#[derive(Debug, Clone)]
pub struct LiquidationResult {
    pub subaccount: SubaccountId,
    pub market_id: MarketId,
    pub quantity: Decimal,
    pub mark_price: Decimal,
    pub worst_price: Decimal,
    /// VWAP of the makers the liquidation order took
    pub clearing_price: Option<Decimal>,
    /// Closing payout before fees. negative when the position was underwater.
    pub payout: Decimal,
    pub coverage: DeficitCoverage,
    pub status: LiquidationStatus,
    pub forced_settlement: Option<MarketSettlementReport>,
}

#[derive(Debug, Clone)]
pub struct MarketSettlementReport {
    pub market_id: MarketId,
    pub settlement_price: Decimal,
    pub status: MarketStatus,
    pub positions_closed: usize,
    pub orders_cancelled: usize,
    pub haircut_factor: Decimal,
    pub total_owed: Decimal,
    pub total_paid: Decimal,
    pub shortfall: Decimal,
    /// Left in the market after payouts, moved to the insurance fund
    pub surplus_to_insurance: Decimal,
}

#[derive(Debug, Clone)]
pub enum EmergencySettleResult {
    /// Liquidity existed and the deficit chain paid in full
    Liquidated(LiquidationResult),
    /// The whole market was force settled
    MarketSettled(MarketSettlementReport),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExchangeError {
    #[error("insufficient funds in {denom} for {subaccount}: available {available}, required {required}")]
    InsufficientFunds {
        subaccount: SubaccountId,
        denom: Denom,
        available: Decimal,
        required: Decimal,
    },

    #[error("insufficient deposit in {denom} for {subaccount}: available {available}, requested {requested}")]
    InsufficientDeposit {
        subaccount: SubaccountId,
        denom: Denom,
        available: Decimal,
        requested: Decimal,
    },

    #[error("invalid market {0}")]
    InvalidMarket(MarketId),

    #[error("market {0} already exists")]
    MarketExists(MarketId),

    #[error("market {0} is not active")]
    MarketPaused(MarketId),

    #[error("client order id {0} is already live")]
    DuplicateClientOrderId(String),

    #[error("order not found")]
    OrderNotFound,

    #[error("order belongs to {found}, batch is for {expected}")]
    SubaccountMismatch { expected: SubaccountId, found: SubaccountId },

    #[error("invalid reduce-only quantity: {0}")]
    InvalidReduceOnlyQuantity(ReduceOnlyError),

    #[error("no position to reduce")]
    NoPositionToReduce,

    #[error("invalid trigger price: {0}")]
    InvalidTriggerPrice(#[from] ConditionalError),

    #[error("post-only order crosses the book")]
    PostOnlyCrossesBook,

    #[error("too many orders on one side: limit {0}")]
    TooManyOrders(usize),

    #[error("insufficient order margin: {0}")]
    InsufficientOrderMargin(#[from] MarginError),

    #[error("not enough liquidity to fill {required}, only {available}")]
    NoLiquidity { required: Decimal, available: Decimal },

    #[error("position not found")]
    PositionNotFound,

    #[error("position is not liquidatable")]
    PositionNotLiquidatable,

    #[error("a liquidation cannot take its own owner's order")]
    SelfLiquidation,

    #[error("invalid emergency settle: {0}")]
    InvalidEmergencySettle(String),

    #[error("no mark price for market {0}")]
    NoMarkPrice(MarketId),

    #[error("funding for market {market} is not due until {next}")]
    FundingNotDue { market: MarketId, next: Timestamp },

    #[error("invalid amount {0}")]
    InvalidAmount(Decimal),

    #[error("bank: {0}")]
    InsufficientBankBalance(#[from] BankError),

    #[error("market: {0}")]
    Market(#[from] MarketError),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

impl ExchangeError {
    /// Block halting class. everything else is a user facing rejection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ExchangeError::Invariant(_))
    }
}

impl From<ReduceOnlyError> for ExchangeError {
    fn from(err: ReduceOnlyError) -> Self {
        match err {
            ReduceOnlyError::NoPosition => ExchangeError::NoPositionToReduce,
            other => ExchangeError::InvalidReduceOnlyQuantity(other),
        }
    }
}

// the engine never asks a fund for more than it holds, so a refusal is a bug
impl From<InsuranceError> for ExchangeError {
    fn from(err: InsuranceError) -> Self {
        let violation = match err {
            InsuranceError::InsufficientFund { market, .. } => InvariantViolation::NegativeInsuranceFund { market },
            InsuranceError::NegativeAmount(amount) => InvariantViolation::NegativeAmount(amount),
        };
        ExchangeError::Invariant(violation)
    }
}
