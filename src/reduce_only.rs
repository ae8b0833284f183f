// reduce-only budget arithmetic. pure, the engine gathers the closing side
// orders of one subaccount and applies whatever plan comes back.
//
// queue priority is the book's: better price first, earlier sequence first.
// a reduce-only order is valid while
//     (reduce-only quantity at or ahead of it, itself included)
//   + (vanilla quantity at a strictly better price)
//   <= position quantity
// both sums only grow walking towards worse prices, so the invalid orders
// are always a tail of the queue and cancelling from the worst end never
// changes the verdict for anything ahead.

use crate::order::Order;
use crate::position::Position;
use crate::types::{OrderHash, OrderSide};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReduceOnlyError {
    #[error("no open position to reduce")]
    NoPosition,
    #[error("reduce-only order would increase the position")]
    WrongDirection,
    #[error("reduce-only quantity {quantity} exceeds position {position}")]
    QuantityExceedsPosition { quantity: Decimal, position: Decimal },
    #[error("better priced orders already cover the position")]
    NoClosableBudget,
}

/// One closing side order of the position owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub hash: OrderHash,
    pub side: OrderSide,
    pub price: Decimal,
    pub sequence: u64,
    pub quantity: Decimal,
    pub reduce_only: bool,
}

impl QueueEntry {
    pub fn from_order(order: &Order) -> Self {
        Self {
            hash: order.hash,
            side: order.side,
            price: order.price(),
            sequence: order.sequence,
            quantity: order.fillable_quantity,
            reduce_only: order.is_reduce_only(),
        }
    }

    fn priority(&self) -> Decimal {
        match self.side {
            OrderSide::Buy => -self.price,
            OrderSide::Sell => self.price,
        }
    }

    fn better_price_than(&self, other: &QueueEntry) -> bool {
        self.priority() < other.priority()
    }
}

/// What admitting a reduce-only order takes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionPlan {
    /// Quantity the order enters with, possibly resized down
    pub quantity: Decimal,
    /// Reduce-only orders to cancel, worst first
    pub evict: Vec<OrderHash>,
}

fn sort_queue(entries: &mut [QueueEntry]) {
    entries.sort_by(|a, b| a.priority().cmp(&b.priority()).then(a.sequence.cmp(&b.sequence)));
}

/// Reduce-only orders over budget, worst first. `entries` must all be on
/// the position's closing side.
pub fn excess_reduce_only(position_quantity: Decimal, entries: &[QueueEntry]) -> Vec<OrderHash> {
    let mut queue = entries.to_vec();
    sort_queue(&mut queue);

    let mut excess = Vec::new();
    let mut reduce_only_ahead = Decimal::ZERO;
    for entry in queue.iter().filter(|e| e.reduce_only) {
        reduce_only_ahead += entry.quantity;
        let vanilla_better: Decimal = queue
            .iter()
            .filter(|v| !v.reduce_only && v.better_price_than(entry))
            .map(|v| v.quantity)
            .sum();
        if reduce_only_ahead + vanilla_better > position_quantity {
            excess.push(entry.hash);
        }
    }
    excess.reverse();
    excess
}

/// Decides whether a new reduce-only order fits next to the owner's
/// existing closing side orders.
///
/// Orders ahead of it keep their claim. If what is left is smaller than the
/// order, it is resized down only when that frees room from a strictly worse
/// priced reduce-only order, otherwise it is rejected. Worse priced
/// reduce-only orders pushed over budget are evicted.
pub fn admit_reduce_only(
    position: Option<&Position>,
    new_order: &QueueEntry,
    existing: &[QueueEntry],
) -> Result<AdmissionPlan, ReduceOnlyError> {
    let position = position.filter(|p| !p.is_empty()).ok_or(ReduceOnlyError::NoPosition)?;
    if new_order.side != position.closing_side() {
        return Err(ReduceOnlyError::WrongDirection);
    }
    if new_order.quantity > position.quantity {
        return Err(ReduceOnlyError::QuantityExceedsPosition {
            quantity: new_order.quantity,
            position: position.quantity,
        });
    }

    let closing: Vec<&QueueEntry> = existing.iter().filter(|e| e.side == new_order.side).collect();
    let ahead: Decimal = closing
        .iter()
        .filter(|e| {
            if e.reduce_only {
                // the new order queues behind equal priced ones
                !new_order.better_price_than(e)
            } else {
                e.better_price_than(new_order)
            }
        })
        .map(|e| e.quantity)
        .sum();

    let budget = position.quantity - ahead;
    if budget <= Decimal::ZERO {
        return Err(ReduceOnlyError::NoClosableBudget);
    }

    let mut quantity = new_order.quantity;
    if quantity > budget {
        let displaces_worse = closing
            .iter()
            .any(|e| e.reduce_only && new_order.better_price_than(e));
        if !displaces_worse {
            return Err(ReduceOnlyError::QuantityExceedsPosition {
                quantity,
                position: budget,
            });
        }
        quantity = budget;
    }

    let mut queue: Vec<QueueEntry> = closing.into_iter().cloned().collect();
    queue.push(QueueEntry {
        quantity,
        ..new_order.clone()
    });
    let evict = excess_reduce_only(position.quantity, &queue);
    debug_assert!(!evict.contains(&new_order.hash));

    Ok(AdmissionPlan { quantity, evict })
}
