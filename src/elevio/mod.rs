//! ## Elevator I/O module for the local elevator
//!
//! The rest of the elevator program only sees the [ElevatorDevice] trait: button
//! reads, lamp writes, motor writes, floor sensor reads, door and stop lamps. It is
//! polled, never interrupt-driven.
//!
//! - [elev]: the TCP driver for the elevator server (hardware or simulator)
//! - [poll]: edge detection on the inputs, forwarded over `crossbeam_channel`s
//! - [mock]: an in-memory car for tests
//!
//! This module also holds [CallType] and [CallButton], and their mapping to [Order]s.

pub mod elev;
pub mod mock;
pub mod poll;

use serde::{Deserialize, Serialize};

use crate::protocol::{Dirn, Order};

/// Abstract car hardware. One handle is shared by every part of the elevator program.
pub trait ElevatorDevice: Send + Sync {
    fn num_floors(&self) -> u8;
    fn call_button(&self, floor: u8, call: CallType) -> bool;
    fn set_call_button_light(&self, floor: u8, call: CallType, on: bool);
    fn set_motor_direction(&self, dirn: Dirn);
    fn floor_sensor(&self) -> Option<u8>;
    fn stop_button(&self) -> bool;
    fn obstruction(&self) -> bool;
    fn set_floor_indicator(&self, floor: u8);
    fn set_door_open_lamp(&self, on: bool);
    fn set_stop_lamp(&self, on: bool);
}

/// Represents the type of call for an elevator.
///
/// ## Variants
/// - `UP`: A request to go up.
/// - `DOWN`: A request to go down.
/// - `INSIDE`: A request made from inside the elevator.
/// - `COSMIC_ERROR`: An invalid call type (used as an error fallback).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum CallType {
    /// Call to go up.
    UP = 0,

    /// Call to go down.
    DOWN = 1,

    /// Call from inside the elevator.
    INSIDE = 2,

    /// Represents an invalid call type.
    COSMIC_ERROR = 255,
}

impl CallType {
    /// The three real call types, in driver order.
    pub const ALL: [CallType; 3] = [CallType::UP, CallType::DOWN, CallType::INSIDE];

    /// Which button an order's lamp sits on.
    pub fn of(dirn: Dirn) -> CallType {
        match dirn {
            Dirn::Up => CallType::UP,
            Dirn::Down => CallType::DOWN,
            Dirn::Stop => CallType::INSIDE,
        }
    }

    /// Direction qualifier of an order made with this button.
    pub fn dirn(self) -> Option<Dirn> {
        match self {
            CallType::UP => Some(Dirn::Up),
            CallType::DOWN => Some(Dirn::Down),
            CallType::INSIDE => Some(Dirn::Stop),
            CallType::COSMIC_ERROR => None,
        }
    }
}

/// Represents a button press.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallButton {
    /// The floor where the call was made.
    pub floor: u8,

    /// The type of call (UP, DOWN, or INSIDE).
    pub call_type: CallType,
}

impl CallButton {
    /// The order this press asks for. `None` for `COSMIC_ERROR`.
    pub fn order(&self) -> Option<Order> {
        self.call_type.dirn().map(|d| Order::new(d, self.floor as i32))
    }
}
