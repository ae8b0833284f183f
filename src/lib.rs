// exchange-core: on-chain exchange core. per block batch matching for spot
// and derivative markets, margin and payout arithmetic, the reduce-only
// lifecycle, and liquidation with its fallback chain.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: MarketId, SubaccountId, Denom, OrderSide, Price, OrderHash
//   2.x  order.rs: orders, requests, holds, order hash
//   2.1  orderbook.rs: resting book and the transient set of one block
//   2.2  matching.rs: market sweep, resting sweep, batch auction
//   2.3  conditional.rs: stop and take-profit orders parked until triggered
//   3.x  margin.rs: order margin, holds, binary option margin
//   3.1  fees.rs: trading fee and relayer split
//   4.x  position.rs: position struct, payout, bankruptcy price
//   5.x  reduce_only.rs: reduce-only budget, admission plan, evictions
//   6.x  liquidation.rs: liquidation status and worst price
//   6.1  insurance.rs: per market insurance funds
//   6.2  socialized_loss.rs: payout haircut for forced settlement
//   7.x  config.rs: exchange parameters, env presets
//   8.x  engine/: the exchange: admission, block matching, settlement, liquidation
//   9.x  oracle.rs: mark price input
//   10.x deposit.rs: subaccount ledger
//   10.1 bank.rs: account balances outside the exchange
//   11.x events.rs: state transition events for audit
//   12.x market.rs: market definitions and status
//   13.x funding.rs: perpetual funding rate and payments
//   14.x state.rs: exchange state and genesis

// core trading modules
pub mod conditional;
pub mod engine;
pub mod events;
pub mod fees;
pub mod funding;
pub mod liquidation;
pub mod margin;
pub mod market;
pub mod matching;
pub mod order;
pub mod orderbook;
pub mod position;
pub mod reduce_only;
pub mod types;

// funds
pub mod bank;
pub mod deposit;
pub mod insurance;
pub mod socialized_loss;

// integration modules
pub mod config;
pub mod oracle;
pub mod state;

// re exports for convenience
pub use bank::{Bank, BankError, InMemoryBank};
pub use conditional::{ConditionalError, ConditionalOrder, ConditionalOrderBook, ConditionalType, TriggerCondition};
pub use config::{ConfigError, Environment, ExchangeParams};
pub use deposit::{BalanceField, Deposit, DepositLedger, InvariantViolation, Ledger};
pub use engine::*;
pub use events::*;
pub use funding::{FundingParams, FundingState};
pub use insurance::{InsuranceError, InsuranceFundStore, InsuranceFunds};
pub use liquidation::*;
pub use margin::*;
pub use market::*;
pub use matching::*;
pub use oracle::{PriceOracle, StaticPriceOracle};
pub use order::*;
pub use orderbook::{OrderBook, TransientOrders};
pub use position::*;
pub use reduce_only::*;
pub use state::{ExchangeGenesis, ExchangeState, OrderLocation};
pub use types::*;
