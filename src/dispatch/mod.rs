//! ## Dispatcher side
//!
//! - [heuristic]: which car takes which order (shared with the elevator side)
//! - [session]: one connected elevator
//! - [coordinator]: the fleet, the pending set and the order log

pub mod coordinator;
pub mod heuristic;
pub mod session;
