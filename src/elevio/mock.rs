//! In-memory car used by tests and dry runs.
//!
//! The shaft is divided into [TICKS_PER_FLOOR] positions per floor. The car only
//! moves when [MockDevice::advance] is called, one position in the motor's direction,
//! so tests decide exactly when the car reaches the next floor.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::Dirn;

use super::{CallType, ElevatorDevice};

pub const TICKS_PER_FLOOR: i32 = 4;

#[derive(Debug)]
struct MockState {
    position: i32,
    motor: Dirn,
    pressed: HashSet<(u8, CallType)>,
    lamps: HashSet<(u8, CallType)>,
    stop: bool,
    obstruction: bool,
    door_open: bool,
    stop_lamp: bool,
    floor_indicator: Option<u8>,
}

#[derive(Debug)]
pub struct MockDevice {
    num_floors: u8,
    state: Mutex<MockState>,
}

impl MockDevice {
    /// A car resting at `floor`.
    pub fn new(num_floors: u8, floor: u8) -> Self {
        Self::at_position(num_floors, floor as i32 * TICKS_PER_FLOOR)
    }

    /// A car stuck halfway above `floor`, seeing no floor sensor.
    pub fn between_floors(num_floors: u8, floor: u8) -> Self {
        Self::at_position(num_floors, floor as i32 * TICKS_PER_FLOOR + TICKS_PER_FLOOR / 2)
    }

    fn at_position(num_floors: u8, position: i32) -> Self {
        MockDevice {
            num_floors,
            state: Mutex::new(MockState {
                position,
                motor: Dirn::Stop,
                pressed: HashSet::new(),
                lamps: HashSet::new(),
                stop: false,
                obstruction: false,
                door_open: false,
                stop_lamp: false,
                floor_indicator: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the car one position in the motor's direction, bounded by the shaft.
    pub fn advance(&self) {
        let top = (self.num_floors as i32 - 1) * TICKS_PER_FLOOR;
        let mut s = self.state();
        let next = s.position + s.motor.step();
        s.position = next.clamp(0, top);
    }

    pub fn press(&self, floor: u8, call: CallType) {
        self.state().pressed.insert((floor, call));
    }

    pub fn release(&self, floor: u8, call: CallType) {
        self.state().pressed.remove(&(floor, call));
    }

    pub fn set_stop(&self, pressed: bool) {
        self.state().stop = pressed;
    }

    pub fn set_obstruction(&self, on: bool) {
        self.state().obstruction = on;
    }

    pub fn motor(&self) -> Dirn {
        self.state().motor
    }

    pub fn lamp(&self, floor: u8, call: CallType) -> bool {
        self.state().lamps.contains(&(floor, call))
    }

    pub fn door_open(&self) -> bool {
        self.state().door_open
    }

    pub fn stop_lamp(&self) -> bool {
        self.state().stop_lamp
    }

    pub fn floor_indicator(&self) -> Option<u8> {
        self.state().floor_indicator
    }
}

impl ElevatorDevice for MockDevice {
    fn num_floors(&self) -> u8 {
        self.num_floors
    }

    fn call_button(&self, floor: u8, call: CallType) -> bool {
        self.state().pressed.contains(&(floor, call))
    }

    fn set_call_button_light(&self, floor: u8, call: CallType, on: bool) {
        let mut s = self.state();
        if on {
            s.lamps.insert((floor, call));
        } else {
            s.lamps.remove(&(floor, call));
        }
    }

    fn set_motor_direction(&self, dirn: Dirn) {
        self.state().motor = dirn;
    }

    fn floor_sensor(&self) -> Option<u8> {
        let pos = self.state().position;
        if pos % TICKS_PER_FLOOR == 0 {
            Some((pos / TICKS_PER_FLOOR) as u8)
        } else {
            None
        }
    }

    fn stop_button(&self) -> bool {
        self.state().stop
    }

    fn obstruction(&self) -> bool {
        self.state().obstruction
    }

    fn set_floor_indicator(&self, floor: u8) {
        self.state().floor_indicator = Some(floor);
    }

    fn set_door_open_lamp(&self, on: bool) {
        self.state().door_open = on;
    }

    fn set_stop_lamp(&self, on: bool) {
        self.state().stop_lamp = on;
    }
}
