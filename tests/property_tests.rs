//! Property-based tests for the core math.
//!
//! These tests verify invariants hold under random inputs.

use exchange_core::*;
use exchange_core::fees::{split_fee, trading_fee};
use exchange_core::socialized_loss::apply_haircut;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (100i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)) // 1.00 to 9999.99
}

fn quantity_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..10_000i64).prop_map(|x| Decimal::new(x, 3)) // 0.001 to 9.999
}

fn margin_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2))
}

fn sub(n: u64) -> SubaccountId {
    SubaccountId::new(AccountId(n), 0)
}

fn hash(n: u64) -> OrderHash {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&n.to_be_bytes());
    OrderHash(bytes)
}

fn order(n: u64, side: OrderSide, price: Decimal, quantity: Decimal, margin: Decimal, hold: Decimal) -> Order {
    Order {
        hash: hash(n),
        market_id: MarketId(1),
        side,
        info: OrderInfo {
            subaccount: sub(n),
            fee_recipient: None,
            price: Price::new_unchecked(price),
            quantity,
            client_order_id: None,
        },
        kind: OrderKind::Perpetual { margin },
        order_type: OrderType::Vanilla,
        time_in_force: TimeInForce::Limit,
        fillable_quantity: quantity,
        hold: OrderHold::new(Denom::new("usdt"), hold),
        margin_remaining: margin,
        sequence: n,
    }
}

fn close_enough(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= dec!(0.000000000001)
}

proptest! {
    /// A full close pays margin plus pnl and leaves nothing behind
    #[test]
    fn full_close_pays_margin_plus_pnl(
        is_long in any::<bool>(),
        quantity in quantity_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
        margin in margin_strategy(),
    ) {
        let mut position = Position::new(is_long, quantity, Price::new_unchecked(entry), margin);
        let sign = if is_long { Decimal::ONE } else { -Decimal::ONE };
        let payout = position.close(quantity, exit);

        prop_assert_eq!(payout, margin + quantity * (exit - entry) * sign);
        prop_assert!(position.is_empty());
        prop_assert_eq!(position.margin, Decimal::ZERO);
    }

    /// Closing in two steps pays the same as closing at once
    #[test]
    fn split_close_matches_full_close(
        is_long in any::<bool>(),
        quantity in quantity_strategy(),
        part in 1u32..100u32,
        entry in price_strategy(),
        exit in price_strategy(),
        margin in margin_strategy(),
    ) {
        let first = (quantity * Decimal::from(part) / dec!(100)).round_dp(3);
        prop_assume!(first > Decimal::ZERO && first < quantity);

        let mut whole = Position::new(is_long, quantity, Price::new_unchecked(entry), margin);
        let mut split = whole.clone();
        let full = whole.close(quantity, exit);
        let stepped = split.close(first, exit) + split.close(quantity - first, exit);

        prop_assert!(close_enough(full, stepped), "full {} stepped {}", full, stepped);
        prop_assert!(split.is_empty());
    }

    /// Payout is zero at the bankruptcy price
    #[test]
    fn zero_payout_at_bankruptcy(
        is_long in any::<bool>(),
        quantity in quantity_strategy(),
        entry in price_strategy(),
        margin in margin_strategy(),
    ) {
        let position = Position::new(is_long, quantity, Price::new_unchecked(entry), margin);
        let bankruptcy = position.bankruptcy_price();
        if is_long {
            prop_assert!(bankruptcy < entry);
        } else {
            prop_assert!(bankruptcy > entry);
        }
        prop_assert!(close_enough(position.clone().close(quantity, bankruptcy), Decimal::ZERO));
    }

    /// The liquidation price never leaves the tick grid and never accepts
    /// better than both bankruptcy and mark
    #[test]
    fn liquidation_worst_price_on_grid(
        is_long in any::<bool>(),
        quantity in quantity_strategy(),
        entry in price_strategy(),
        mark in price_strategy(),
        margin in margin_strategy(),
    ) {
        let tick = dec!(0.01);
        let position = Position::new(is_long, quantity, Price::new_unchecked(entry), margin);
        let worst = liquidation_worst_price(&position, mark, tick);
        let bankruptcy = position.bankruptcy_price();

        prop_assert!((worst % tick).is_zero());
        prop_assert!(worst > Decimal::ZERO);
        if is_long {
            prop_assert!(worst <= mark);
            prop_assert!(worst <= bankruptcy.max(tick));
        } else {
            prop_assert!(worst >= mark);
            prop_assert!(worst >= bankruptcy);
        }
    }

    /// Haircut payouts never exceed what is available nor what is owed
    #[test]
    fn haircut_fits_available(
        owed in proptest::collection::vec(-100_000i64..100_000i64, 1..20),
        available in 0i64..1_000_000i64,
    ) {
        let payouts: Vec<(SubaccountId, Decimal)> = owed
            .iter()
            .enumerate()
            .map(|(i, cents)| (sub(i as u64), Decimal::new(*cents, 2)))
            .collect();
        let available = Decimal::new(available, 2);
        let result = apply_haircut(&payouts, available, 18);

        prop_assert!(result.total_paid <= available);
        prop_assert!(result.total_paid <= result.total_owed);
        prop_assert_eq!(result.shortfall, result.total_owed - result.total_paid);
        prop_assert!(result.factor <= Decimal::ONE);
        for ((_, paid), (_, asked)) in result.payouts.iter().zip(&payouts) {
            prop_assert!(*paid >= Decimal::ZERO);
            prop_assert!(*paid <= (*asked).max(Decimal::ZERO));
        }
    }

    /// Reduce-only orders over budget are always the worst priced tail
    #[test]
    fn excess_reduce_only_is_worst_tail(
        position in 1i64..50i64,
        orders in proptest::collection::vec((100i64..200i64, 1i64..20i64), 1..12),
    ) {
        let entries: Vec<QueueEntry> = orders
            .iter()
            .enumerate()
            .map(|(i, (price, quantity))| QueueEntry {
                hash: hash(i as u64 + 1),
                side: OrderSide::Sell,
                price: Decimal::from(*price),
                sequence: i as u64 + 1,
                quantity: Decimal::from(*quantity),
                reduce_only: true,
            })
            .collect();
        let excess = excess_reduce_only(Decimal::from(position), &entries);

        let (evicted, kept): (Vec<&QueueEntry>, Vec<&QueueEntry>) =
            entries.iter().partition(|e| excess.contains(&e.hash));
        let kept_quantity: Decimal = kept.iter().map(|e| e.quantity).sum();
        prop_assert!(kept_quantity <= Decimal::from(position));
        for gone in &evicted {
            for stays in &kept {
                prop_assert!(gone.price >= stays.price);
            }
        }
    }

    /// Fees split without creating or losing anything
    #[test]
    fn fee_split_sums_to_fee(
        notional in margin_strategy(),
        rate in 0i64..100i64,
        share in 0i64..=100i64,
    ) {
        let fee = trading_fee(notional, Decimal::new(rate, 4));
        let split = split_fee(fee, Decimal::new(share, 2));
        prop_assert_eq!(split.total(), fee);
        prop_assert!(split.relayer <= fee);
    }

    /// Fills taken piece by piece release exactly the hold and the margin
    #[test]
    fn take_fill_releases_everything(
        chunks in proptest::collection::vec(1i64..50i64, 1..10),
        price in price_strategy(),
        margin in margin_strategy(),
    ) {
        let quantity: Decimal = chunks.iter().map(|c| Decimal::new(*c, 1)).sum();
        let hold = margin + price * quantity * dec!(0.001);
        let mut order = order(1, OrderSide::Buy, price, quantity, margin, hold);

        let (mut released, mut used) = (Decimal::ZERO, Decimal::ZERO);
        for (i, chunk) in chunks.iter().enumerate() {
            let share = order.take_fill(Decimal::new(*chunk, 1));
            released += share.hold_released;
            used += share.execution_margin;
            prop_assert_eq!(share.completed, i == chunks.len() - 1);
        }

        prop_assert!(order.is_filled());
        prop_assert_eq!(released, hold);
        prop_assert_eq!(used, margin);
        prop_assert_eq!(order.hold.remaining, Decimal::ZERO);
    }

    /// One clearing price for every matched pair, inside every pair's limits
    #[test]
    fn batch_auction_price_inside_limits(
        buys in proptest::collection::vec((9_000i64..11_000i64, 1i64..30i64), 1..10),
        sells in proptest::collection::vec((9_000i64..11_000i64, 1i64..30i64), 1..10),
    ) {
        let tick = dec!(0.01);
        let mut transients = TransientOrders::new();
        let mut n = 0;
        for (side, orders) in [(OrderSide::Buy, &buys), (OrderSide::Sell, &sells)] {
            for (cents, tenths) in orders {
                n += 1;
                let price = Decimal::new(*cents, 2);
                let quantity = Decimal::new(*tenths, 1);
                transients.push(order(n, side, price, quantity, price * quantity, price * quantity));
            }
        }

        let mut guard = ReduceOnlyGuard::default();
        let result = run_batch_auction(MarketId(1), &mut transients, &mut guard, tick);

        let traded: Decimal = result.trades.iter().map(|t| t.quantity()).sum();
        prop_assert_eq!(traded, result.matched_quantity);
        if let Some(clearing) = result.clearing_price {
            prop_assert!((clearing % tick).is_zero());
            for trade in &result.trades {
                let buy = transients.get(&trade.buy.order_hash).map(|o| o.price());
                let sell = transients.get(&trade.sell.order_hash).map(|o| o.price());
                prop_assert!(buy.is_some_and(|p| p >= clearing));
                prop_assert!(sell.is_some_and(|p| p <= clearing));
                prop_assert_eq!(trade.price(), clearing);
            }
        } else {
            prop_assert!(result.trades.is_empty());
        }

        // nothing left crosses
        let open = |side: OrderSide| transients.iter().filter(move |o| o.side == side && !o.is_filled());
        let best_bid = open(OrderSide::Buy).map(|o| o.price()).max();
        let best_ask = open(OrderSide::Sell).map(|o| o.price()).min();
        if let (Some(bid), Some(ask)) = (best_bid, best_ask) {
            prop_assert!(bid < ask);
        }
    }
}

/// Non-proptest edge cases
mod edge_cases {
    use super::*;

    #[test]
    fn haircut_with_nothing_available_pays_nothing() {
        let payouts = vec![(sub(1), dec!(10)), (sub(2), dec!(-5)), (sub(3), dec!(30))];
        let result = apply_haircut(&payouts, Decimal::ZERO, 18);
        assert_eq!(result.total_owed, dec!(40));
        assert_eq!(result.total_paid, Decimal::ZERO);
        assert_eq!(result.shortfall, dec!(40));
    }

    #[test]
    fn haircut_rounds_toward_zero() {
        let payouts = vec![(sub(1), dec!(1)), (sub(2), dec!(1)), (sub(3), dec!(1))];
        let result = apply_haircut(&payouts, dec!(1), 2);
        assert!(result.payouts.iter().all(|(_, p)| *p == dec!(0.33)));
        assert_eq!(result.total_paid, dec!(0.99));
        assert_eq!(result.shortfall, dec!(2.01));
    }

    #[test]
    fn spot_buy_hold_covers_notional_and_fee() {
        let params = ExchangeParams::default();
        let market = Market::spot(MarketId(1), "INJ/USDT", Denom::new("inj"), Denom::new("usdt"), &params);
        let (denom, amount) = order_hold(&market, OrderSide::Buy, OrderType::Vanilla, dec!(10), dec!(3), Decimal::ZERO);
        assert_eq!(denom, Denom::new("usdt"));
        assert_eq!(amount, dec!(30) * (Decimal::ONE + market.max_fee_rate()));

        let (denom, amount) = order_hold(&market, OrderSide::Sell, OrderType::Vanilla, dec!(10), dec!(3), Decimal::ZERO);
        assert_eq!(denom, Denom::new("inj"));
        assert_eq!(amount, dec!(3));
    }

    #[test]
    fn extreme_price_drop_keeps_payout_exact() {
        let mut position = Position::new(true, dec!(1000), Price::new_unchecked(dec!(50000)), dec!(2500000));
        let payout = position.close(dec!(1000), dec!(0.01));
        assert_eq!(payout, dec!(2500000) + dec!(1000) * (dec!(0.01) - dec!(50000)));
        assert!(payout < Decimal::ZERO);
    }
}
