//! Solvency invariant tests.
//!
//! These tests verify invariants that must hold for the exchange to remain
//! solvent under all conditions: every unit the bank module holds is owed to
//! someone, no balance goes negative, and open interest balances.

use exchange_core::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const SPOT: MarketId = MarketId(1);
const PERP: MarketId = MarketId(2);

fn sub(n: u64) -> SubaccountId {
    SubaccountId::new(AccountId(n), 0)
}

fn usdt() -> Denom {
    Denom::new("usdt")
}

fn inj() -> Denom {
    Denom::new("inj")
}

fn exchange(traders: u64) -> Exchange {
    let mut ex = Exchange::new(EngineConfig::default(), ExchangeParams::default()).unwrap();
    let params = ex.params().clone();
    ex.add_market(Market::spot(SPOT, "INJ/USDT", inj(), usdt(), &params)).unwrap();
    ex.add_market(Market::perpetual(PERP, "BTC/USDT PERP", usdt(), &params).with_margin_ratios(dec!(0.1), dec!(0.05)))
        .unwrap();
    ex.oracle_mut().set_price(PERP, dec!(100));
    for n in 1..=traders {
        for denom in [usdt(), inj()] {
            ex.bank_mut().mint(AccountId(n), &denom, dec!(10000));
            ex.deposit(AccountId(n), sub(n), &denom, dec!(10000)).unwrap();
        }
    }
    ex.bank_mut().mint(AccountId(99), &usdt(), dec!(500));
    ex.fund_insurance(AccountId(99), PERP, dec!(500)).unwrap();
    ex
}

fn assert_solvent(ex: &Exchange, traders: u64) {
    for denom in [usdt(), inj()] {
        assert_eq!(
            ex.state().module_liabilities(&denom),
            ex.bank().module_balance(&denom),
            "module books out of balance in {denom}"
        );
        for n in 1..=traders {
            let deposit = ex.deposit_of(&sub(n), &denom);
            assert!(deposit.available >= Decimal::ZERO, "negative available for {n}");
            assert!(deposit.available <= deposit.total, "available over total for {n}");
        }
    }
    let (long, short) = ex
        .state()
        .positions_in(PERP)
        .fold((Decimal::ZERO, Decimal::ZERO), |(l, s), (_, p)| {
            if p.is_long {
                (l + p.quantity, s)
            } else {
                (l, s + p.quantity)
            }
        });
    assert_eq!(long, short, "open interest imbalanced");
}

/// (trader, is_buy, price offset in ticks of 0.5, quantity in tenths)
fn order_strategy(traders: u64) -> impl Strategy<Value = (u64, bool, i64, i64)> {
    (1..=traders, any::<bool>(), -10i64..=10i64, 1i64..=30i64)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Random perpetual flow over several blocks never breaks the books.
    #[test]
    fn perp_flow_stays_solvent(
        blocks in proptest::collection::vec(proptest::collection::vec(order_strategy(6), 1..12), 1..6),
    ) {
        let mut ex = exchange(6);
        for (height, orders) in blocks.iter().enumerate() {
            for &(n, is_buy, offset, tenths) in orders {
                let side = if is_buy { OrderSide::Buy } else { OrderSide::Sell };
                let price = dec!(100) + Decimal::new(offset * 5, 1);
                let quantity = Decimal::new(tenths, 1);
                let margin = (price * quantity * dec!(0.2)).round_dp(2);
                let request = OrderRequest::limit(PERP, sub(n), side, price, quantity).with_margin(margin);
                let _ = if offset % 4 == 0 {
                    ex.place_market_order(request)
                } else {
                    ex.place_limit_order(request)
                };
            }
            ex.end_block(Timestamp::from_millis(1_000 * (height as i64 + 1))).unwrap();
            assert_solvent(&ex, 6);
        }
    }

    /// Spot fills swap base and quote without creating or losing either.
    #[test]
    fn spot_flow_conserves_both_denoms(
        orders in proptest::collection::vec(order_strategy(5), 1..20),
    ) {
        let mut ex = exchange(5);
        for &(n, is_buy, offset, tenths) in &orders {
            let side = if is_buy { OrderSide::Buy } else { OrderSide::Sell };
            let price = dec!(10) + Decimal::new(offset, 1);
            let _ = ex.place_limit_order(OrderRequest::limit(SPOT, sub(n), side, price, Decimal::new(tenths, 1)));
        }
        ex.run_block_matching(SPOT).unwrap();
        assert_solvent(&ex, 5);

        let base: Decimal = (1..=5).map(|n| ex.deposit_of(&sub(n), &inj()).total).sum();
        prop_assert_eq!(base, dec!(50000));
    }

    /// Admitting orders and cancelling them all gives every hold back.
    #[test]
    fn admit_then_cancel_restores_deposits(
        orders in proptest::collection::vec(order_strategy(4), 1..20),
        rest_first in any::<bool>(),
    ) {
        let mut ex = exchange(4);
        let before: Vec<Deposit> = (1..=4).map(|n| ex.deposit_of(&sub(n), &usdt())).collect();
        for &(n, is_buy, offset, tenths) in &orders {
            let side = if is_buy { OrderSide::Buy } else { OrderSide::Sell };
            // keep both sides apart so nothing trades
            let price = (if is_buy { dec!(90) } else { dec!(110) }) + Decimal::new(offset, 1);
            let quantity = Decimal::new(tenths, 1);
            let margin = (price * quantity * dec!(0.2)).round_dp(2);
            let _ = ex.place_limit_order(OrderRequest::limit(PERP, sub(n), side, price, quantity).with_margin(margin));
        }
        if rest_first {
            ex.run_block_matching(PERP).unwrap();
        }
        for n in 1..=4 {
            ex.cancel_all_orders(PERP, sub(n)).unwrap();
            prop_assert_eq!(ex.deposit_of(&sub(n), &usdt()), before[n as usize - 1]);
        }
        assert_solvent(&ex, 4);
    }

    /// A price shock followed by liquidations and emergency settlement
    /// leaves every balance non-negative and the module whole.
    #[test]
    fn price_shock_stays_solvent(
        shock in 60i64..140i64,
        orders in proptest::collection::vec(order_strategy(6), 2..12),
    ) {
        let mut ex = exchange(6);
        for &(n, is_buy, offset, tenths) in &orders {
            let side = if is_buy { OrderSide::Buy } else { OrderSide::Sell };
            let price = dec!(100) + Decimal::new(offset * 5, 1);
            let quantity = Decimal::new(tenths, 1);
            let margin = (price * quantity * dec!(0.1)).round_dp(2);
            let _ = ex.place_limit_order(OrderRequest::limit(PERP, sub(n), side, price, quantity).with_margin(margin));
        }
        ex.run_block_matching(PERP).unwrap();

        ex.oracle_mut().set_price(PERP, Decimal::from(shock));
        for n in 1..=6 {
            match ex.liquidate(sub(n), PERP, None) {
                Ok(_) | Err(ExchangeError::PositionNotFound)
                | Err(ExchangeError::PositionNotLiquidatable)
                | Err(ExchangeError::NoLiquidity { .. })
                | Err(ExchangeError::MarketPaused(_)) => {}
                Err(other) => panic!("unexpected liquidation error: {other}"),
            }
            let _ = ex.emergency_settle(PERP, sub(n));
            assert_solvent(&ex, 6);
        }
    }
}

#[test]
fn collateral_returned_on_round_trip() {
    let mut ex = exchange(2);
    let before: Decimal = (1..=2).map(|n| ex.deposit_of(&sub(n), &usdt()).total).sum();

    ex.place_limit_order(OrderRequest::limit(PERP, sub(1), OrderSide::Buy, dec!(100), dec!(1)).with_margin(dec!(20)))
        .unwrap();
    ex.place_limit_order(OrderRequest::limit(PERP, sub(2), OrderSide::Sell, dec!(100), dec!(1)).with_margin(dec!(20)))
        .unwrap();
    ex.run_block_matching(PERP).unwrap();
    ex.place_limit_order(OrderRequest::limit(PERP, sub(1), OrderSide::Sell, dec!(100), dec!(1)).with_margin(dec!(20)))
        .unwrap();
    ex.place_limit_order(OrderRequest::limit(PERP, sub(2), OrderSide::Buy, dec!(100), dec!(1)).with_margin(dec!(20)))
        .unwrap();
    ex.run_block_matching(PERP).unwrap();

    assert!(ex.position(PERP, &sub(1)).is_none());
    assert!(ex.position(PERP, &sub(2)).is_none());
    assert_eq!(ex.market_balance(PERP), dec!(0));
    let after: Decimal = (1..=2).map(|n| ex.deposit_of(&sub(n), &usdt()).total).sum();
    // only the fees left the traders
    assert_eq!(before - after, ex.auction_pool_balance(&usdt()));
    assert_solvent(&ex, 2);
}

#[test]
fn withdrawals_cannot_touch_held_funds() {
    let mut ex = exchange(1);
    ex.place_limit_order(OrderRequest::limit(PERP, sub(1), OrderSide::Buy, dec!(100), dec!(10)).with_margin(dec!(9000)))
        .unwrap();
    let deposit = ex.deposit_of(&sub(1), &usdt());
    assert!(ex.withdraw(sub(1), &usdt(), deposit.available + dec!(1)).is_err());
    ex.withdraw(sub(1), &usdt(), deposit.available).unwrap();
    assert_eq!(ex.deposit_of(&sub(1), &usdt()).available, dec!(0));
    assert_solvent(&ex, 1);
}
