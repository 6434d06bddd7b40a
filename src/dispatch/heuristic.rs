//! ## Greedy nearest/farthest heuristic
//!
//! One rule, used by both sides. The coordinator asks "which car should take this
//! order" by feeding one `(session, status, order)` triple per car. The elevator asks
//! "which order should I take next" by feeding one `(order, my status, order)` triple
//! per order it holds. Both get the same answer for the same geometry.
//!
//! Tiers, best first:
//! 1. [Suitability::Exact]: car standing still at the order's floor. Wins at once.
//! 2. [Suitability::EnRoute]: car moving towards the floor in the order's direction
//!    (car calls match any direction of travel).
//! 3. [Suitability::Idle]: car standing still somewhere else.
//! 4. [Suitability::Detour]: everything else.
//!
//! Tier 2 is used if non-empty, else tier 3, picking the smallest distance. If both
//! are empty the largest distance in tier 4 wins. Ties go to whichever came first.
//! Unknown statuses never enter any tier.

use crate::protocol::{Dirn, KnownStatus, Order, Status};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Suitability {
    Exact,
    EnRoute,
    Idle,
    Detour,
}

/// Places one car relative to one order.
pub fn classify(car: KnownStatus, order: Order) -> Suitability {
    if car.dirn == Dirn::Stop {
        if car.floor == order.floor {
            Suitability::Exact
        } else {
            Suitability::Idle
        }
    } else {
        let ahead = (i64::from(order.floor) - i64::from(car.floor)) * i64::from(car.dirn.step()) > 0;
        let same_way = order.dirn == car.dirn || order.dirn == Dirn::Stop;
        if ahead && same_way {
            Suitability::EnRoute
        } else {
            Suitability::Detour
        }
    }
}

/// Floors between the car and the order.
pub fn distance(car: KnownStatus, order: Order) -> u32 {
    car.floor.abs_diff(order.floor)
}

/// Picks the winner among `candidates`, or `None` if no candidate has a known status.
///
/// Each candidate is `(key, status, order)`; the key of the winner is returned.
pub fn select<T>(candidates: impl IntoIterator<Item = (T, Status, Order)>) -> Option<T> {
    let mut en_route: Option<(T, u32)> = None;
    let mut idle: Option<(T, u32)> = None;
    let mut detour: Option<(T, u32)> = None;

    for (key, status, order) in candidates {
        let car = match status.known() {
            Ok(car) => car,
            Err(_) => continue,
        };
        let dist = distance(car, order);
        match classify(car, order) {
            Suitability::Exact => return Some(key),
            Suitability::EnRoute => keep_if(&mut en_route, key, dist, |new, old| new < old),
            Suitability::Idle => keep_if(&mut idle, key, dist, |new, old| new < old),
            Suitability::Detour => keep_if(&mut detour, key, dist, |new, old| new > old),
        }
    }

    en_route.or(idle).or(detour).map(|(key, _)| key)
}

/// Replaces the current best only on a strict improvement, so ties keep the earlier one.
fn keep_if<T>(best: &mut Option<(T, u32)>, key: T, dist: u32, better: impl Fn(u32, u32) -> bool) {
    let replace = match best {
        Some((_, old)) => better(dist, *old),
        None => true,
    };
    if replace {
        *best = Some((key, dist));
    }
}
