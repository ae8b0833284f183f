// 8.0: exchange engine. admission, per block matching, settlement,
// reduce-only enforcement, liquidation and market settlement.
// deterministic: markets run in id order, orders in admission order, and
// nothing here does I/O.

mod block;
mod conditional;
mod config;
mod core;
mod funding;
mod liquidations;
mod orders;
mod positions;
mod reduce_only;
mod results;
mod settlement;

pub use config::EngineConfig;
pub use core::Exchange;
pub use results::{
    BatchUpdate, BatchUpdateResult, BlockMatchingReport, DeficitCoverage, EmergencySettleResult, EndBlockReport,
    ExchangeError, FundingResult, LiquidationResult, MarketSettlementReport, OrderSelector, PassSummary,
    TriggerOutcome,
};
