//! Exchange core simulation.
//!
//! Walks the block lifecycle end to end: deposits, admission, per block
//! matching, reduce-only eviction, liquidation with insurance, forced
//! settlement, expiry, stop orders and funding. Set `RUST_LOG=debug` to see every fill.

use exchange_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing_subscriber::EnvFilter;

const SPOT: MarketId = MarketId(1);
const PERP: MarketId = MarketId(2);
const FUTURE: MarketId = MarketId(3);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    println!("Exchange Core Simulation");
    println!("Per block batch matching, isolated margin, full fallback chain\n");

    let scenarios: [(&str, fn() -> Result<(), ExchangeError>); 7] = [
        ("spot batch auction", scenario_1_spot_auction),
        ("perpetual sweep and auction", scenario_2_perp_block),
        ("reduce-only eviction", scenario_3_reduce_only),
        ("liquidation with insurance", scenario_4_liquidation),
        ("forced settlement", scenario_5_forced_settlement),
        ("expiry settlement", scenario_6_expiry),
        ("stop loss and funding", scenario_7_stop_and_funding),
    ];
    for (name, run) in scenarios {
        if let Err(err) = run() {
            eprintln!("  {name} failed: {err}");
            std::process::exit(1);
        }
    }

    println!("\nAll simulations completed successfully.");
}

fn usdt() -> Denom {
    Denom::new("usdt")
}

fn trader(n: u64) -> SubaccountId {
    SubaccountId::new(AccountId(n), 0)
}

fn fund(ex: &mut Exchange, n: u64, denom: &Denom, amount: Decimal) -> Result<(), ExchangeError> {
    ex.bank_mut().mint(AccountId(n), denom, amount);
    ex.deposit(AccountId(n), trader(n), denom, amount)?;
    Ok(())
}

fn exchange() -> Result<Exchange, ExchangeError> {
    let mut ex = Exchange::new(EngineConfig::default(), Environment::Testnet.params())?;
    let params = ex.params().clone();
    ex.add_market(Market::spot(SPOT, "INJ/USDT", Denom::new("inj"), usdt(), &params))?;
    ex.add_market(
        Market::perpetual(PERP, "BTC/USDT PERP", usdt(), &params)
            .with_fees(dec!(0), dec!(0))
            .with_margin_ratios(dec!(0.1), dec!(0.05)),
    )?;
    ex.oracle_mut().set_price(PERP, dec!(100));
    Ok(ex)
}

fn print_position(ex: &Exchange, label: &str, n: u64) {
    match ex.position(PERP, &trader(n)) {
        Some(p) => println!(
            "  {label}: {} {} @ {} (margin {})",
            if p.is_long { "long" } else { "short" },
            p.quantity,
            p.entry_price,
            p.margin
        ),
        None => println!("  {label}: flat"),
    }
}

/// Three buyers and two sellers cross in one uniform price auction.
fn scenario_1_spot_auction() -> Result<(), ExchangeError> {
    println!("Scenario 1: Spot Batch Auction\n");
    let mut ex = exchange()?;
    let inj = Denom::new("inj");
    for n in 1..=3 {
        fund(&mut ex, n, &usdt(), dec!(1000))?;
    }
    for n in 4..=5 {
        fund(&mut ex, n, &inj, dec!(100))?;
    }

    for (n, price) in [(1, dec!(10.2)), (2, dec!(10.1)), (3, dec!(9.8))] {
        ex.place_limit_order(OrderRequest::limit(SPOT, trader(n), OrderSide::Buy, price, dec!(10)))?;
    }
    for (n, price) in [(4, dec!(9.9)), (5, dec!(10.0))] {
        ex.place_limit_order(OrderRequest::limit(SPOT, trader(n), OrderSide::Sell, price, dec!(10)))?;
    }

    let report = ex.run_block_matching(SPOT)?;
    println!(
        "  matched {} INJ at {}, {} orders promoted to the book",
        report.matched_quantity,
        report.auction_clearing_price.unwrap_or_default(),
        report.promoted.len()
    );
    println!("  auction pool: {} USDT\n", ex.auction_pool_balance(&usdt()));
    Ok(())
}

/// A resting ask taken by a transient bid, then the rest clears in the auction.
fn scenario_2_perp_block() -> Result<(), ExchangeError> {
    println!("Scenario 2: Perpetual Block\n");
    let mut ex = exchange()?;
    for n in 1..=3 {
        fund(&mut ex, n, &usdt(), dec!(1000))?;
    }

    ex.place_limit_order(OrderRequest::limit(PERP, trader(1), OrderSide::Sell, dec!(100), dec!(1)).with_margin(dec!(20)))?;
    ex.end_block(Timestamp::from_millis(1_000))?;
    println!("  block 1: ask rests at 100");

    ex.place_limit_order(OrderRequest::limit(PERP, trader(2), OrderSide::Buy, dec!(102), dec!(2)).with_margin(dec!(40)))?;
    ex.place_limit_order(OrderRequest::limit(PERP, trader(3), OrderSide::Sell, dec!(101), dec!(1)).with_margin(dec!(20)))?;
    let report = ex.end_block(Timestamp::from_millis(2_000))?;
    for pass in report.matching.iter().filter(|r| r.market_id == PERP).flat_map(|r| &r.passes) {
        println!("  block 2: {:?} matched {} at {:?}", pass.mode, pass.matched_quantity, pass.clearing_price);
    }
    print_position(&ex, "buyer", 2);
    println!("  market balance: {}\n", ex.market_balance(PERP));
    Ok(())
}

/// A vanilla order placed ahead of reduce-only orders squeezes the worst one out.
fn scenario_3_reduce_only() -> Result<(), ExchangeError> {
    println!("Scenario 3: Reduce-Only Eviction\n");
    let mut ex = exchange()?;
    fund(&mut ex, 1, &usdt(), dec!(1000))?;
    fund(&mut ex, 2, &usdt(), dec!(1000))?;

    ex.place_limit_order(OrderRequest::limit(PERP, trader(1), OrderSide::Buy, dec!(100), dec!(2)).with_margin(dec!(20)))?;
    ex.place_limit_order(OrderRequest::limit(PERP, trader(2), OrderSide::Sell, dec!(100), dec!(2)).with_margin(dec!(20)))?;
    ex.run_block_matching(PERP)?;
    print_position(&ex, "trader", 1);

    let near = ex.place_limit_order(OrderRequest::limit(PERP, trader(1), OrderSide::Sell, dec!(110), dec!(1)).reduce_only())?;
    let far = ex.place_limit_order(OrderRequest::limit(PERP, trader(1), OrderSide::Sell, dec!(120), dec!(1)).reduce_only())?;
    println!("  reduce-only sells at 110 and 120 cover the whole position");

    ex.place_limit_order(OrderRequest::limit(PERP, trader(1), OrderSide::Sell, dec!(105), dec!(1)).with_margin(dec!(11)))?;
    println!(
        "  vanilla sell at 105 placed: 110 alive {}, 120 alive {}\n",
        ex.order(PERP, &near).is_some(),
        ex.order(PERP, &far).is_some()
    );
    Ok(())
}

/// Price drops through bankruptcy; the insurance fund pays the gap.
fn scenario_4_liquidation() -> Result<(), ExchangeError> {
    println!("Scenario 4: Liquidation With Insurance\n");
    let mut ex = exchange()?;
    fund(&mut ex, 1, &usdt(), dec!(10))?;
    fund(&mut ex, 2, &usdt(), dec!(1000))?;
    fund(&mut ex, 3, &usdt(), dec!(1000))?;
    ex.bank_mut().mint(AccountId(99), &usdt(), dec!(50));
    ex.fund_insurance(AccountId(99), PERP, dec!(50))?;

    ex.place_limit_order(OrderRequest::limit(PERP, trader(1), OrderSide::Buy, dec!(100), dec!(1)).with_margin(dec!(10)))?;
    ex.place_limit_order(OrderRequest::limit(PERP, trader(2), OrderSide::Sell, dec!(100), dec!(1)).with_margin(dec!(10)))?;
    ex.run_block_matching(PERP)?;
    print_position(&ex, "levered long", 1);

    ex.oracle_mut().set_price(PERP, dec!(85));
    ex.place_limit_order(OrderRequest::limit(PERP, trader(3), OrderSide::Buy, dec!(85), dec!(1)).with_margin(dec!(20)))?;
    ex.run_block_matching(PERP)?;

    let result = ex.liquidate(trader(1), PERP, None)?;
    println!(
        "  liquidated at {:?}: payout {}, insurance paid {}",
        result.clearing_price, result.payout, result.coverage.from_insurance
    );
    println!("  insurance fund: {}\n", ex.insurance_fund_balance(PERP));
    Ok(())
}

/// No liquidity and no insurance: the whole market settles at mark.
fn scenario_5_forced_settlement() -> Result<(), ExchangeError> {
    println!("Scenario 5: Forced Settlement\n");
    let mut ex = exchange()?;
    fund(&mut ex, 1, &usdt(), dec!(10))?;
    fund(&mut ex, 2, &usdt(), dec!(1000))?;

    ex.place_limit_order(OrderRequest::limit(PERP, trader(1), OrderSide::Buy, dec!(100), dec!(1)).with_margin(dec!(10)))?;
    ex.place_limit_order(OrderRequest::limit(PERP, trader(2), OrderSide::Sell, dec!(100), dec!(1)).with_margin(dec!(10)))?;
    ex.run_block_matching(PERP)?;

    ex.oracle_mut().set_price(PERP, dec!(80));
    match ex.emergency_settle(PERP, trader(1))? {
        EmergencySettleResult::MarketSettled(report) => println!(
            "  market {:?} at {}: owed {}, paid {}, haircut factor {}",
            report.status, report.settlement_price, report.total_owed, report.total_paid, report.haircut_factor
        ),
        EmergencySettleResult::Liquidated(result) => println!("  liquidated with payout {}", result.payout),
    }
    println!("  short's balance: {}\n", ex.deposit_of(&trader(2), &usdt()).total);
    Ok(())
}

/// An expiry future settles at the oracle price once its expiry passes.
fn scenario_6_expiry() -> Result<(), ExchangeError> {
    println!("Scenario 6: Expiry Settlement\n");
    let mut ex = exchange()?;
    let expiry = Timestamp::from_millis(86_400_000);
    let params = ex.params().clone();
    ex.add_market(Market::expiry_future(FUTURE, "BTC/USDT 0630", usdt(), expiry, &params).with_fees(dec!(0), dec!(0)))?;
    ex.oracle_mut().set_price(FUTURE, dec!(100));
    fund(&mut ex, 1, &usdt(), dec!(100))?;
    fund(&mut ex, 2, &usdt(), dec!(100))?;

    ex.place_limit_order(OrderRequest::limit(FUTURE, trader(1), OrderSide::Buy, dec!(100), dec!(1)).with_margin(dec!(10)))?;
    ex.place_limit_order(OrderRequest::limit(FUTURE, trader(2), OrderSide::Sell, dec!(100), dec!(1)).with_margin(dec!(10)))?;
    ex.end_block(Timestamp::from_millis(1_000))?;

    ex.oracle_mut().set_price(FUTURE, dec!(107));
    let report = ex.end_block(expiry)?;
    for settled in &report.expired {
        println!("  market {} expired at {}", settled.market_id, settled.settlement_price);
    }
    println!(
        "  long: {}, short: {}",
        ex.deposit_of(&trader(1), &usdt()).total,
        ex.deposit_of(&trader(2), &usdt()).total
    );
    Ok(())
}

/// A stop parked under the long fires when mark drops, and the short that is
/// left pays an hour of funding for trading below mark.
fn scenario_7_stop_and_funding() -> Result<(), ExchangeError> {
    println!("Scenario 7: Stop Loss and Funding\n");
    let mut ex = exchange()?;
    for n in 1..=3 {
        fund(&mut ex, n, &usdt(), dec!(1000))?;
    }

    ex.place_limit_order(OrderRequest::limit(PERP, trader(1), OrderSide::Buy, dec!(99), dec!(2)).with_margin(dec!(40)))?;
    ex.place_limit_order(OrderRequest::limit(PERP, trader(2), OrderSide::Sell, dec!(99), dec!(2)).with_margin(dec!(40)))?;
    ex.end_block(Timestamp::from_millis(600_000))?;
    ex.place_limit_order(OrderRequest::limit(PERP, trader(3), OrderSide::Buy, dec!(94), dec!(1)).with_margin(dec!(20)))?;
    ex.end_block(Timestamp::from_millis(1_200_000))?;

    let stop = OrderRequest::limit(PERP, trader(1), OrderSide::Sell, dec!(90), dec!(1))
        .reduce_only()
        .market();
    let hash = ex.place_conditional_order(stop, dec!(95))?;
    println!("  stop parked: {hash}");

    ex.oracle_mut().set_price(PERP, dec!(95));
    let report = ex.end_block(Timestamp::from_millis(1_800_000))?;
    for outcome in &report.triggered {
        println!("  triggered {}: admitted {:?}", outcome.conditional, outcome.admitted);
    }
    print_position(&ex, "long after stop", 1);

    let report = ex.end_block(Timestamp::from_millis(3_600_000))?;
    for funding in &report.funding {
        println!(
            "  funding rate {} on {} positions, longs paid {}",
            funding.funding_rate, funding.positions_affected, funding.total_long_payments
        );
    }
    print_position(&ex, "short after funding", 2);
    println!();
    Ok(())
}
