//! TCP driver for the elevator server.
//!
//! Every command is four bytes. Reads answer with four bytes, the value in byte 1
//! (and the floor in byte 2 for the floor sensor).

use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, PoisonError};

use crate::print;
use crate::protocol::Dirn;

use super::{CallType, ElevatorDevice};

pub const DIRN_DOWN: u8 = u8::MAX;
pub const DIRN_STOP: u8 = 0;
pub const DIRN_UP: u8 = 1;

#[derive(Clone, Debug)]
pub struct Elevator {
    socket: Arc<Mutex<TcpStream>>,
    pub num_floors: u8,
}

impl Elevator {
    pub fn init(addr: &str, num_floors: u8) -> io::Result<Elevator> {
        let socket = TcpStream::connect(addr)?;
        socket.set_nodelay(true)?;
        Ok(Self {
            socket: Arc::new(Mutex::new(socket)),
            num_floors,
        })
    }

    fn write(&self, buf: [u8; 4]) {
        let mut sock = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = sock.write_all(&buf) {
            print::err(format!("Elevator server write {:?} failed: {}", buf, e));
        }
    }

    /// Sends a request and returns the reply. All zeroes if the server is gone.
    fn request(&self, buf: [u8; 4]) -> [u8; 4] {
        let mut reply = [0u8; 4];
        let mut sock = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        let res = sock.write_all(&buf).and_then(|_| sock.read_exact(&mut reply));
        if let Err(e) = res {
            print::err(format!("Elevator server request {:?} failed: {}", buf, e));
            return [0u8; 4];
        }
        reply
    }
}

fn dirn_byte(dirn: Dirn) -> u8 {
    match dirn {
        Dirn::Down => DIRN_DOWN,
        Dirn::Stop => DIRN_STOP,
        Dirn::Up => DIRN_UP,
    }
}

impl ElevatorDevice for Elevator {
    fn num_floors(&self) -> u8 {
        self.num_floors
    }

    fn call_button(&self, floor: u8, call: CallType) -> bool {
        self.request([6, call as u8, floor, 0])[1] != 0
    }

    fn set_call_button_light(&self, floor: u8, call: CallType, on: bool) {
        self.write([2, call as u8, floor, on as u8]);
    }

    fn set_motor_direction(&self, dirn: Dirn) {
        self.write([1, dirn_byte(dirn), 0, 0]);
    }

    fn floor_sensor(&self) -> Option<u8> {
        let buf = self.request([7, 0, 0, 0]);
        if buf[1] != 0 {
            Some(buf[2])
        } else {
            None
        }
    }

    fn stop_button(&self) -> bool {
        self.request([8, 0, 0, 0])[1] != 0
    }

    fn obstruction(&self) -> bool {
        self.request([9, 0, 0, 0])[1] != 0
    }

    fn set_floor_indicator(&self, floor: u8) {
        self.write([3, floor, 0, 0]);
    }

    fn set_door_open_lamp(&self, on: bool) {
        self.write([4, on as u8, 0, 0]);
    }

    fn set_stop_lamp(&self, on: bool) {
        self.write([5, on as u8, 0, 0]);
    }
}

impl fmt::Display for Elevator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sock = self.socket.lock().unwrap_or_else(PoisonError::into_inner);
        match sock.peer_addr() {
            Ok(addr) => write!(f, "Elevator@{}({})", addr, self.num_floors),
            Err(_) => write!(f, "Elevator@?({})", self.num_floors),
        }
    }
}
