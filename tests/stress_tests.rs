//! Stress tests
//!
//! These tests simulate crowded blocks and falling markets to verify the
//! exchange stays solvent and keeps positions consistent.

use exchange_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const PERP: MarketId = MarketId(1);

fn sub(n: u64) -> SubaccountId {
    SubaccountId::new(AccountId(n), 0)
}

fn usdt() -> Denom {
    Denom::new("usdt")
}

fn exchange() -> Exchange {
    let mut ex = Exchange::new(EngineConfig::default(), ExchangeParams::default()).unwrap();
    let market = Market::perpetual(PERP, "BTC/USDT PERP", usdt(), ex.params())
        .with_fees(dec!(0), dec!(0))
        .with_margin_ratios(dec!(0.1), dec!(0.05));
    ex.add_market(market).unwrap();
    ex.oracle_mut().set_price(PERP, dec!(100));
    ex
}

fn fund(ex: &mut Exchange, n: u64, amount: Decimal) {
    ex.bank_mut().mint(AccountId(n), &usdt(), amount);
    ex.deposit(AccountId(n), sub(n), &usdt(), amount).unwrap();
}

fn limit(n: u64, side: OrderSide, price: Decimal, quantity: Decimal, margin: Decimal) -> OrderRequest {
    OrderRequest::limit(PERP, sub(n), side, price, quantity).with_margin(margin)
}

fn assert_conserved(ex: &Exchange) {
    assert_eq!(ex.state().module_liabilities(&usdt()), ex.bank().module_balance(&usdt()));
}

/// Tests falling prices and cascading liquidations.
mod cascade_tests {
    use super::*;

    #[test]
    fn liquidation_cascade_no_bad_debt() {
        let mut ex = exchange();
        let counterparty = 100;
        let bidder = 200;
        fund(&mut ex, counterparty, dec!(1_000_000));
        fund(&mut ex, bidder, dec!(100_000));
        ex.bank_mut().mint(AccountId(99), &usdt(), dec!(1000));
        ex.fund_insurance(AccountId(99), PERP, dec!(1000)).unwrap();

        // Counterparty provides all the sell liquidity
        ex.place_limit_order(limit(counterparty, OrderSide::Sell, dec!(100), dec!(10), dec!(1000)))
            .unwrap();
        ex.run_block_matching(PERP).unwrap();

        // Ten traders with 10 margin each and i spare on top
        for i in 1..=10 {
            fund(&mut ex, i, dec!(10) + Decimal::from(i));
            ex.place_market_order(limit(i, OrderSide::Buy, dec!(100), dec!(1), dec!(10)))
                .unwrap();
        }
        ex.run_block_matching(PERP).unwrap();
        for i in 1..=10 {
            let position = ex.position(PERP, &sub(i)).unwrap();
            assert!(position.is_long);
            assert_eq!(position.quantity, dec!(1));
        }

        // Price falls below every bankruptcy price
        ex.oracle_mut().set_price(PERP, dec!(88));
        ex.place_limit_order(limit(bidder, OrderSide::Buy, dec!(88), dec!(10), dec!(200)))
            .unwrap();
        ex.run_block_matching(PERP).unwrap();

        for i in 1..=10 {
            let result = ex.liquidate(sub(i), PERP, None).unwrap();
            assert_eq!(result.status, LiquidationStatus::Liquidated);
            assert_eq!(result.payout, dec!(-2));
            assert!(ex.position(PERP, &sub(i)).is_none());
        }

        // Only trader 1 could not pay the whole 2 out of pocket
        assert_eq!(ex.deposit_of(&sub(1), &usdt()).total, dec!(0));
        for i in 2..=10 {
            assert_eq!(ex.deposit_of(&sub(i), &usdt()).total, Decimal::from(i) - dec!(2));
        }
        assert_eq!(ex.insurance_fund_balance(PERP), dec!(999));
        assert_eq!(ex.market(PERP).unwrap().status, MarketStatus::Active);
        assert_eq!(ex.position(PERP, &sub(bidder)).unwrap().quantity, dec!(10));
        assert_conserved(&ex);
    }

    #[test]
    fn healthy_positions_survive_the_same_move() {
        let mut ex = exchange();
        fund(&mut ex, 1, dec!(1000));
        fund(&mut ex, 2, dec!(1000));
        ex.place_limit_order(limit(1, OrderSide::Buy, dec!(100), dec!(1), dec!(50))).unwrap();
        ex.place_limit_order(limit(2, OrderSide::Sell, dec!(100), dec!(1), dec!(50))).unwrap();
        ex.run_block_matching(PERP).unwrap();

        for price in [dec!(88), dec!(70), dec!(130), dec!(100)] {
            ex.oracle_mut().set_price(PERP, price);
            assert_eq!(
                ex.liquidate(sub(1), PERP, None).unwrap_err(),
                ExchangeError::PositionNotLiquidatable
            );
            assert_eq!(
                ex.liquidate(sub(2), PERP, None).unwrap_err(),
                ExchangeError::PositionNotLiquidatable
            );
        }
    }
}

/// Tests partial fills and position tracking.
mod partial_fill_tests {
    use super::*;

    #[test]
    fn partial_fill_with_remaining_on_book() {
        let mut ex = exchange();
        fund(&mut ex, 1, dec!(1000));
        fund(&mut ex, 2, dec!(1000));

        let ask = ex.place_limit_order(limit(1, OrderSide::Sell, dec!(100), dec!(5), dec!(50))).unwrap();
        ex.run_block_matching(PERP).unwrap();
        ex.place_market_order(limit(2, OrderSide::Buy, dec!(100), dec!(2), dec!(20))).unwrap();
        ex.run_block_matching(PERP).unwrap();

        let resting = ex.order(PERP, &ask).unwrap();
        assert_eq!(resting.fillable_quantity, dec!(3));
        assert_eq!(resting.hold.remaining, dec!(30));
        assert_eq!(ex.deposit_of(&sub(1), &usdt()), Deposit::new(dec!(950), dec!(980)));
        assert_eq!(ex.position(PERP, &sub(1)).unwrap().quantity, dec!(2));
        assert_eq!(ex.position(PERP, &sub(2)).unwrap().quantity, dec!(2));
    }

    #[test]
    fn partial_fill_position_tracking() {
        let mut ex = exchange();
        fund(&mut ex, 1, dec!(1000));
        fund(&mut ex, 2, dec!(1000));

        ex.place_limit_order(limit(1, OrderSide::Sell, dec!(100), dec!(3), dec!(30))).unwrap();
        ex.run_block_matching(PERP).unwrap();
        for _ in 0..3 {
            ex.place_market_order(limit(2, OrderSide::Buy, dec!(100), dec!(1), dec!(10))).unwrap();
            ex.run_block_matching(PERP).unwrap();
        }
        assert!(ex.book(PERP).unwrap().is_empty());

        ex.place_limit_order(limit(1, OrderSide::Sell, dec!(104), dec!(1), dec!(11))).unwrap();
        ex.run_block_matching(PERP).unwrap();
        ex.place_market_order(limit(2, OrderSide::Buy, dec!(104), dec!(1), dec!(15))).unwrap();
        ex.run_block_matching(PERP).unwrap();

        let position = ex.position(PERP, &sub(2)).unwrap();
        assert!(position.is_long);
        assert_eq!(position.quantity, dec!(4));
        assert_eq!(position.entry_price.value(), dec!(101));
        assert_eq!(position.margin, dec!(45));

        let short = ex.position(PERP, &sub(1)).unwrap();
        assert!(!short.is_long);
        assert_eq!(short.quantity, dec!(4));
        assert_conserved(&ex);
    }

    #[test]
    fn flip_long_to_short() {
        let mut ex = exchange();
        for n in 1..=3 {
            fund(&mut ex, n, dec!(1000));
        }
        ex.place_limit_order(limit(1, OrderSide::Buy, dec!(100), dec!(2), dec!(20))).unwrap();
        ex.place_limit_order(limit(2, OrderSide::Sell, dec!(100), dec!(2), dec!(20))).unwrap();
        ex.run_block_matching(PERP).unwrap();
        assert!(ex.position(PERP, &sub(1)).unwrap().is_long);

        // Sell 4: closes the 2 long, opens 2 short
        ex.place_limit_order(limit(1, OrderSide::Sell, dec!(100), dec!(4), dec!(40))).unwrap();
        ex.place_limit_order(limit(3, OrderSide::Buy, dec!(100), dec!(4), dec!(40))).unwrap();
        ex.run_block_matching(PERP).unwrap();

        let position = ex.position(PERP, &sub(1)).unwrap();
        assert!(!position.is_long);
        assert_eq!(position.quantity, dec!(2));
        assert_eq!(position.entry_price.value(), dec!(100));
        // half the order margin backs the new short, the old margin came back
        assert_eq!(position.margin, dec!(20));
        assert_eq!(ex.deposit_of(&sub(1), &usdt()), Deposit::new(dec!(980), dec!(980)));
        assert_conserved(&ex);
    }
}

/// Tests crowded blocks and many blocks in a row.
mod block_tests {
    use super::*;

    #[test]
    fn forty_traders_one_auction() {
        let mut ex = exchange();
        for n in 1..=40 {
            fund(&mut ex, n, dec!(1000));
        }
        // bids 95.5..105 and asks 95.5..105 in 0.5 steps
        for i in 1..=20u64 {
            let price = dec!(95) + Decimal::from(i) * dec!(0.5);
            ex.place_limit_order(limit(i, OrderSide::Buy, price, dec!(1), dec!(20))).unwrap();
            ex.place_limit_order(limit(20 + i, OrderSide::Sell, price, dec!(1), dec!(20))).unwrap();
        }

        let report = ex.run_block_matching(PERP).unwrap();
        assert_eq!(report.matched_quantity, dec!(10));
        assert_eq!(report.auction_clearing_price, Some(dec!(100.25)));
        assert_eq!(report.promoted.len(), 20);

        let positions: Vec<_> = ex.state().positions_in(PERP).collect();
        assert_eq!(positions.len(), 20);
        assert!(positions.iter().all(|(_, p)| p.entry_price.value() == dec!(100.25)));
        let longs = positions.iter().filter(|(_, p)| p.is_long).count();
        assert_eq!(longs, 10);
        for i in 11..=20 {
            assert!(ex.position(PERP, &sub(i)).is_some_and(|p| p.is_long));
        }
        for j in 21..=30 {
            assert!(ex.position(PERP, &sub(j)).is_some_and(|p| !p.is_long));
        }
        assert_conserved(&ex);
    }

    #[test]
    fn market_maker_requotes_every_block() {
        let mut ex = exchange();
        let maker = 50;
        fund(&mut ex, maker, dec!(100_000));
        fund(&mut ex, 1, dec!(1000));
        fund(&mut ex, 2, dec!(1000));

        let mut now = 0;
        for round in 0..10 {
            let mut batch = BatchUpdate::new(sub(maker));
            batch.cancel_all_markets.push(PERP);
            batch.creates.push(limit(maker, OrderSide::Buy, dec!(99), dec!(1), dec!(20)));
            batch.creates.push(limit(maker, OrderSide::Sell, dec!(101), dec!(1), dec!(20)));
            let result = ex.batch_update(batch);
            assert!(result.creates.iter().all(Result::is_ok));
            now += 1_000;
            ex.end_block(Timestamp::from_millis(now)).unwrap();
            assert_eq!(ex.state().orders_of(PERP, &sub(maker)).len(), 2);

            let taker = if round % 2 == 0 {
                limit(1, OrderSide::Buy, dec!(101), dec!(1), dec!(20))
            } else {
                limit(2, OrderSide::Sell, dec!(99), dec!(1), dec!(20))
            };
            ex.place_market_order(taker).unwrap();
            now += 1_000;
            ex.end_block(Timestamp::from_millis(now)).unwrap();
            assert_conserved(&ex);
        }

        let long = ex.position(PERP, &sub(1)).unwrap();
        assert_eq!((long.quantity, long.entry_price.value()), (dec!(5), dec!(101)));
        let short = ex.position(PERP, &sub(2)).unwrap();
        assert_eq!((short.quantity, short.entry_price.value()), (dec!(5), dec!(99)));

        // five round trips earning the 2 spread each
        assert!(ex.position(PERP, &sub(maker)).is_none());
        ex.cancel_all_orders(PERP, sub(maker)).unwrap();
        assert_eq!(ex.deposit_of(&sub(maker), &usdt()), Deposit::new(dec!(100_010), dec!(100_010)));
    }
}
