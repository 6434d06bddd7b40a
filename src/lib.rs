//! # Elevator fleet dispatcher
//!
//! A central dispatcher that assigns hall calls to a fleet of elevators over TCP,
//! kept alive by a primary/backup process pair, and the elevator program each car runs.
//!
//! ## Overview
//! - **Config**: Constants and per-run settings.
//! - **Print**: Color-coded terminal logging and the fleet table.
//! - **Protocol**: Shared message types and the length-prefixed wire codec.
//! - **Order log**: Durable append/rewrite log of orders.
//! - **Dispatch**: Sessions, the coordinator and the assignment heuristic.
//! - **Backup / Regulator**: Process-pair failover for the dispatcher.
//! - **Elevio**: Interface for elevator I/O.
//! - **Elevator Logic**: Order manager, motion control and the dispatcher link of one car.

/// Global variables
pub mod config;

/// Print functions with color coding
pub mod print;

/// Messages and framing
pub mod protocol;

pub mod order_log;

pub mod dispatch;

/// Socket helpers
pub mod network;

pub mod display;

/// Process-pair heartbeat
pub mod backup;

pub mod regulator;

/// Interface for elevator input/output. Only the parts this crate uses. For the original driver see: [https://github.com/TTK4145/driver-rust/tree/master/src/elevio]
pub mod elevio;

pub mod elevator_logic;

/// Argument parsing for the binaries
pub mod init;
