//! ## Motion controller
//!
//! Drives the motor and the door of one car towards the order it is given.
//!
//! ```text
//! Initializing ──floor──▶ Idle ──order──▶ Moving ──target floor──▶ DoorOpen
//!                          ▲                                          │
//!                          └──────────── door time, no obstruction ───┘
//! ```
//!
//! The controller keeps two directions: `motor`, what the motor does right now, and
//! `heading`, the direction the car last travelled or was told to leave in. The
//! heading is what the order heuristic uses to pick the next order.

use crate::elevio::ElevatorDevice;
use crate::protocol::{Dirn, Order, Status};

use super::timer::{self, Timer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Initializing,
    Idle,
    Moving,
    DoorOpen,
}

/// What happened during one call into the motion controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionEvent {
    /// First floor seen after start-up
    Initialized { floor: i32 },
    Departed { dirn: Dirn, floor: i32 },
    PassedFloor { dirn: Dirn, floor: i32 },
    /// Stopped with the door open. `target` is the order that was driven to.
    Arrived { floor: i32, target: Option<Order>, heading: Dirn },
    DoorClosed { floor: i32 },
}

#[derive(Debug)]
pub struct MotionController {
    behaviour: Behaviour,
    last_floor: i32,
    heading: Dirn,
    motor: Dirn,
    target: Option<Order>,
    door: Timer,
    obstructed: bool,
    top_floor: i32,
}

impl MotionController {
    pub fn new(num_floors: u8, door_open_time: std::time::Duration) -> Self {
        MotionController {
            behaviour: Behaviour::Initializing,
            last_floor: Status::UNKNOWN_FLOOR,
            heading: Dirn::Stop,
            motor: Dirn::Stop,
            target: None,
            door: timer::new(door_open_time),
            obstructed: false,
            top_floor: num_floors as i32 - 1,
        }
    }

    pub fn behaviour(&self) -> Behaviour {
        self.behaviour
    }

    pub fn last_floor(&self) -> i32 {
        self.last_floor
    }

    pub fn heading(&self) -> Dirn {
        self.heading
    }

    pub fn target(&self) -> Option<Order> {
        self.target
    }

    /// Heading and last floor, the input to picking the next order.
    pub fn status(&self) -> Status {
        if self.last_floor < 0 {
            Status::unknown()
        } else {
            Status::new(self.heading, self.last_floor)
        }
    }

    /// What the dispatcher should be told about this car right now.
    pub fn report(&self) -> Status {
        match self.behaviour {
            Behaviour::Initializing => Status::unknown(),
            Behaviour::Moving => Status::new(self.motor, self.last_floor),
            Behaviour::Idle | Behaviour::DoorOpen => Status::new(Dirn::Stop, self.last_floor),
        }
    }

    /// Finds a floor: stays if the car is at one, else drives down until it sees one.
    pub fn start(&mut self, elev: &dyn ElevatorDevice) -> Vec<MotionEvent> {
        elev.set_door_open_lamp(false);
        elev.set_stop_lamp(false);
        match elev.floor_sensor() {
            Some(floor) => self.on_floor(elev, floor),
            None => {
                self.set_motor(elev, Dirn::Down);
                Vec::new()
            }
        }
    }

    pub fn set_obstruction(&mut self, on: bool) {
        self.obstructed = on;
    }

    fn set_motor(&mut self, elev: &dyn ElevatorDevice, dirn: Dirn) {
        self.motor = dirn;
        elev.set_motor_direction(dirn);
    }

    /// The floor sensor saw `floor`.
    pub fn on_floor(&mut self, elev: &dyn ElevatorDevice, floor: u8) -> Vec<MotionEvent> {
        let floor = floor as i32;
        self.last_floor = floor;
        elev.set_floor_indicator(floor as u8);

        match self.behaviour {
            Behaviour::Initializing => {
                self.set_motor(elev, Dirn::Stop);
                self.heading = Dirn::Stop;
                self.behaviour = Behaviour::Idle;
                vec![MotionEvent::Initialized { floor }]
            }
            Behaviour::Moving => {
                let at_target = self.target.map_or(false, |t| t.floor == floor);
                let at_end = (floor <= 0 && self.motor == Dirn::Down) || (floor >= self.top_floor && self.motor == Dirn::Up);
                if at_target || at_end {
                    vec![self.stop_at(elev, floor)]
                } else {
                    vec![MotionEvent::PassedFloor { dirn: self.motor, floor }]
                }
            }
            Behaviour::Idle | Behaviour::DoorOpen => Vec::new(),
        }
    }

    /// Stops, opens the door and settles the heading.
    fn stop_at(&mut self, elev: &dyn ElevatorDevice, floor: i32) -> MotionEvent {
        self.set_motor(elev, Dirn::Stop);
        let target = self.target.take();
        self.heading = match target {
            Some(t) if t.is_hall_call() && t.floor == floor => t.dirn,
            _ if floor >= self.top_floor => Dirn::Down,
            _ if floor <= 0 => Dirn::Up,
            _ => self.heading,
        };
        elev.set_door_open_lamp(true);
        self.door.timer_start();
        self.behaviour = Behaviour::DoorOpen;
        MotionEvent::Arrived { floor, target, heading: self.heading }
    }

    /// Runs the door and the motor given the order to drive to.
    pub fn drive(&mut self, elev: &dyn ElevatorDevice, next: Option<Order>) -> Vec<MotionEvent> {
        match self.behaviour {
            Behaviour::Initializing => Vec::new(),
            Behaviour::Idle => match next {
                Some(order) => self.depart(elev, order),
                None => Vec::new(),
            },
            Behaviour::Moving => {
                if let Some(order) = next {
                    let ahead = (order.floor - self.last_floor) * self.motor.step() > 0;
                    if ahead {
                        self.target = Some(order);
                    }
                }
                Vec::new()
            }
            Behaviour::DoorOpen => {
                if let Some(order) = next.filter(|o| o.floor == self.last_floor) {
                    self.target = Some(order);
                    return vec![self.stop_at(elev, order.floor)];
                }
                if !self.door.timer_timeouted() {
                    return Vec::new();
                }
                if self.obstructed {
                    self.door.timer_start();
                    return Vec::new();
                }
                self.door.timer_stop();
                elev.set_door_open_lamp(false);
                self.behaviour = Behaviour::Idle;
                vec![MotionEvent::DoorClosed { floor: self.last_floor }]
            }
        }
    }

    fn depart(&mut self, elev: &dyn ElevatorDevice, order: Order) -> Vec<MotionEvent> {
        if self.last_floor < 0 {
            return Vec::new();
        }
        let at_floor = elev.floor_sensor().map(|f| f as i32) == Some(self.last_floor);
        if order.floor == self.last_floor && at_floor {
            self.target = Some(order);
            return vec![self.stop_at(elev, order.floor)];
        }
        let dirn = if order.floor != self.last_floor {
            Dirn::towards(self.last_floor, order.floor)
        } else if self.heading == Dirn::Up {
            // stopped just above the floor
            Dirn::Down
        } else {
            Dirn::Up
        };
        self.target = Some(order);
        self.heading = dirn;
        self.set_motor(elev, dirn);
        self.behaviour = Behaviour::Moving;
        vec![MotionEvent::Departed { dirn, floor: self.last_floor }]
    }

    /// Halts the car where it is. The car keeps its floor knowledge.
    pub fn emergency_stop(&mut self, elev: &dyn ElevatorDevice) {
        self.set_motor(elev, Dirn::Stop);
        self.target = None;
        self.door.timer_stop();
        elev.set_door_open_lamp(false);
        if self.behaviour != Behaviour::Initializing {
            self.behaviour = Behaviour::Idle;
        }
    }

    /// Continues after an emergency stop.
    pub fn resume(&mut self, elev: &dyn ElevatorDevice) {
        if self.behaviour == Behaviour::Initializing {
            self.set_motor(elev, Dirn::Down);
        }
    }
}
