//! ## Shared protocol types
//!
//! Everything that crosses a socket or lands in a log file lives here:
//! [Dirn], [Order], [Status] and the tagged [Message]. Framing is in [codec].
//!
//! A [Status] with `last_floor == -1` means "unknown / emergency stopped". Nothing
//! outside this module compares that sentinel directly; callers go through
//! [Status::known], which hands back a [KnownStatus] or a [StatusUnknown] error.

pub mod codec;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Travel direction of a car, or the direction qualifier of an order.
///
/// `Stop` on an order marks a car call.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dirn {
    Down,
    Stop,
    Up,
}

impl Dirn {
    /// Sign of travel along the shaft: `-1`, `0` or `1`.
    pub fn step(self) -> i32 {
        match self {
            Dirn::Down => -1,
            Dirn::Stop => 0,
            Dirn::Up => 1,
        }
    }

    /// Direction needed to get from `from` to `to`.
    pub fn towards(from: i32, to: i32) -> Dirn {
        match to.cmp(&from) {
            std::cmp::Ordering::Greater => Dirn::Up,
            std::cmp::Ordering::Less => Dirn::Down,
            std::cmp::Ordering::Equal => Dirn::Stop,
        }
    }
}

impl fmt::Display for Dirn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dirn::Down => "down",
            Dirn::Stop => "stop",
            Dirn::Up => "up",
        };
        write!(f, "{}", s)
    }
}

/// Highest floor number a car can report. The driver addresses floors with one byte.
pub const MAX_FLOOR: i32 = u8::MAX as i32;

/// A unit of work. Hall calls carry `Up`/`Down`, car calls carry `Stop`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Order {
    pub dirn: Dirn,
    pub floor: i32,
}

impl Order {
    pub fn new(dirn: Dirn, floor: i32) -> Self {
        Order { dirn, floor }
    }

    /// Hall calls are the ones the dispatcher is responsible for.
    pub fn is_hall_call(&self) -> bool {
        self.dirn != Dirn::Stop
    }

    /// False for floors no car can ever reach, as sent by a broken or hostile peer.
    pub fn is_on_shaft(&self) -> bool {
        (0..=MAX_FLOOR).contains(&self.floor)
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.dirn {
            Dirn::Stop => write!(f, "cab@{}", self.floor),
            d => write!(f, "{}@{}", d, self.floor),
        }
    }
}

/// Last report from a car, as sent on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub dirn: Dirn,
    pub last_floor: i32,
}

/// Reading a status whose floor is not known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("elevator status is unknown")]
pub struct StatusUnknown;

/// A status that is safe to use in distance comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownStatus {
    pub dirn: Dirn,
    pub floor: i32,
}

impl Status {
    /// Floor sentinel for "never reported" and "emergency stopped"
    pub const UNKNOWN_FLOOR: i32 = -1;

    pub fn new(dirn: Dirn, last_floor: i32) -> Self {
        Status { dirn, last_floor }
    }

    /// Initial value of every session, and what a stopped car reports.
    pub fn unknown() -> Self {
        Status { dirn: Dirn::Stop, last_floor: Self::UNKNOWN_FLOOR }
    }

    pub fn is_unknown(&self) -> bool {
        self.last_floor < 0
    }

    /// Either the unknown sentinel or a floor on the shaft.
    pub fn is_plausible(&self) -> bool {
        self.last_floor == Self::UNKNOWN_FLOOR || (0..=MAX_FLOOR).contains(&self.last_floor)
    }

    /// Returns the status as something the dispatch heuristic may compare.
    ///
    /// ## Returns
    /// - `Err(StatusUnknown)` if the floor is the sentinel. The car must then be left
    ///   out of all distance comparisons.
    pub fn known(&self) -> Result<KnownStatus, StatusUnknown> {
        if self.is_unknown() {
            Err(StatusUnknown)
        } else {
            Ok(KnownStatus { dirn: self.dirn, floor: self.last_floor })
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.known() {
            Ok(s) => write!(f, "{}@{}", s.dirn, s.floor),
            Err(_) => write!(f, "unknown"),
        }
    }
}

/// Everything that travels between a dispatcher and an elevator.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Car report: direction and last floor
    Status(Status),
    /// New hall call (elevator → dispatcher), or lamp notify (dispatcher → elevator)
    Order(Order),
    /// The order is done, every car may turn its lamp off
    Served(Order),
    /// Assignment from the dispatcher to one car
    ToServe(Order),
    /// Liveness only, carries nothing
    Probe,
}

/// Pushes a [Message::Probe] into an outbound queue every `period`.
///
/// Runs until the queue's receiver is dropped, i.e. until the connection owning
/// the queue is gone. Probes are produced independent of application traffic.
pub async fn send_probes(outbound: mpsc::UnboundedSender<Message>, period: Duration) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if outbound.send(Message::Probe).is_err() {
            break;
        }
    }
}
