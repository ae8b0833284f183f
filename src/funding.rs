// 13.0: perpetual funding. each interval longs pay shorts (or the reverse) in
// proportion to how far traded prices sat from mark, so the perp tracks spot.
// 13.0 has the params/state structs, 13.1+ the rate arithmetic.
//
// between fundings every clearing adds premium * seconds since the interval
// opened to `cumulative_price`. at the interval end the hourly rate is
//     clamp(cumulative_price / (interval * 24) + hourly interest, +-cap)
// and `cumulative_funding` grows by rate * mark. a position pays
// quantity * that growth: longs out of margin, shorts into it. open interest
// is balanced so the market balance never moves.

use crate::position::Position;
use crate::types::Timestamp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingParams {
    pub hourly_interest_rate: Decimal,
    pub hourly_funding_rate_cap: Decimal,
    pub interval_seconds: i64,
}

impl Default for FundingParams {
    fn default() -> Self {
        Self {
            hourly_interest_rate: dec!(0.00000416666),
            hourly_funding_rate_cap: dec!(0.000625),
            interval_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingState {
    /// Funding paid per unit of long position since the market opened
    pub cumulative_funding: Decimal,
    /// Time weighted premium of this interval
    pub cumulative_price: Decimal,
    /// Start of the current interval
    pub last_timestamp: Timestamp,
    pub last_rate: Decimal,
}

impl FundingState {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            cumulative_funding: Decimal::ZERO,
            cumulative_price: Decimal::ZERO,
            last_timestamp: timestamp,
            last_rate: Decimal::ZERO,
        }
    }

    pub fn next_funding(&self, params: &FundingParams) -> Timestamp {
        Timestamp::from_millis(self.last_timestamp.as_millis() + params.interval_seconds * 1000)
    }

    pub fn is_due(&self, now: Timestamp, params: &FundingParams) -> bool {
        now >= self.next_funding(params)
    }
}

fn seconds_between(from: Timestamp, to: Timestamp) -> Decimal {
    Decimal::new((to.as_millis() - from.as_millis()).max(0), 3)
}

// 13.1: how far a traded price is from mark. positive = perp above mark
pub fn calculate_premium_index(trade_price: Decimal, mark_price: Decimal) -> Decimal {
    if mark_price.is_zero() {
        return Decimal::ZERO;
    }
    (trade_price - mark_price) / mark_price
}

/// Adds one clearing to the interval's premium.
pub fn record_premium(state: &mut FundingState, trade_price: Decimal, mark_price: Decimal, now: Timestamp) {
    let premium = calculate_premium_index(trade_price, mark_price);
    state.cumulative_price += premium * seconds_between(state.last_timestamp, now);
}

// 13.2: daily premium spread over the hour, plus interest, capped both ways
pub fn calculate_funding_rate(state: &FundingState, params: &FundingParams) -> Decimal {
    let interval = Decimal::from(params.interval_seconds.max(1));
    let twap = state.cumulative_price / (interval * dec!(24));
    let rate = twap + params.hourly_interest_rate;
    rate.max(-params.hourly_funding_rate_cap)
        .min(params.hourly_funding_rate_cap)
}

// 13.3: what a position pays for a growth in cumulative funding. negative
// means it receives
pub fn calculate_funding_payment(position: &Position, funding_delta: Decimal) -> Decimal {
    position.quantity * funding_delta * position.direction_sign()
}

/// Closes the interval at `now`. returns the rate and the cumulative growth.
pub fn close_interval(state: &mut FundingState, mark_price: Decimal, now: Timestamp, params: &FundingParams) -> (Decimal, Decimal) {
    let rate = calculate_funding_rate(state, params);
    let delta = rate * mark_price;
    state.cumulative_funding += delta;
    state.cumulative_price = Decimal::ZERO;
    state.last_timestamp = now;
    state.last_rate = rate;
    (rate, delta)
}
