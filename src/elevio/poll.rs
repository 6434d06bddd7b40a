//! Polling of the elevator inputs.
//!
//! Each input has a one-shot edge detector ([call_buttons], [floor_sensor],
//! [stop_button], [obstruction]) that compares the current reading with the previous
//! one and forwards changes over a `crossbeam_channel`. [spawn] runs each of them in
//! its own thread; tests call [Poller::poll_once] instead to stay deterministic.

use crossbeam_channel as cbc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::print;

use super::{CallButton, CallType, ElevatorDevice};

/// Sending halves, owned by whoever polls the hardware.
#[derive(Clone)]
pub struct HardwareTx {
    pub call_button: cbc::Sender<CallButton>,
    pub floor_sensor: cbc::Sender<u8>,
    pub stop_button: cbc::Sender<bool>,
    pub obstruction: cbc::Sender<bool>,
}

/// Receiving halves, owned by the elevator controller.
pub struct HardwareRx {
    pub call_button: cbc::Receiver<CallButton>,
    pub floor_sensor: cbc::Receiver<u8>,
    pub stop_button: cbc::Receiver<bool>,
    pub obstruction: cbc::Receiver<bool>,
}

pub fn channels() -> (HardwareTx, HardwareRx) {
    let (call_tx, call_rx) = cbc::unbounded::<CallButton>();
    let (floor_tx, floor_rx) = cbc::unbounded::<u8>();
    let (stop_tx, stop_rx) = cbc::unbounded::<bool>();
    let (obs_tx, obs_rx) = cbc::unbounded::<bool>();
    (
        HardwareTx {
            call_button: call_tx,
            floor_sensor: floor_tx,
            stop_button: stop_tx,
            obstruction: obs_tx,
        },
        HardwareRx {
            call_button: call_rx,
            floor_sensor: floor_rx,
            stop_button: stop_rx,
            obstruction: obs_rx,
        },
    )
}

/// Reports every rising edge of every call button.
///
/// Returns `false` once nobody is listening.
pub fn call_buttons(elev: &dyn ElevatorDevice, prev: &mut Vec<[bool; 3]>, ch: &cbc::Sender<CallButton>) -> bool {
    prev.resize(elev.num_floors() as usize, [false; 3]);
    for f in 0..elev.num_floors() {
        for call in CallType::ALL {
            let c = call as usize;
            let v = elev.call_button(f, call);
            if v && !prev[f as usize][c] && ch.send(CallButton { floor: f, call_type: call }).is_err() {
                return false;
            }
            prev[f as usize][c] = v;
        }
    }
    true
}

/// Reports every arrival at a floor, including coming back to the one just left.
pub fn floor_sensor(elev: &dyn ElevatorDevice, prev: &mut Option<u8>, ch: &cbc::Sender<u8>) -> bool {
    let now = elev.floor_sensor();
    if let Some(f) = now {
        if *prev != Some(f) && ch.send(f).is_err() {
            return false;
        }
    }
    *prev = now;
    true
}

pub fn stop_button(elev: &dyn ElevatorDevice, prev: &mut bool, ch: &cbc::Sender<bool>) -> bool {
    let v = elev.stop_button();
    if *prev != v {
        *prev = v;
        return ch.send(v).is_ok();
    }
    true
}

pub fn obstruction(elev: &dyn ElevatorDevice, prev: &mut bool, ch: &cbc::Sender<bool>) -> bool {
    let v = elev.obstruction();
    if *prev != v {
        *prev = v;
        return ch.send(v).is_ok();
    }
    true
}

/// All four detectors in one place, polled on demand.
pub struct Poller {
    buttons: Vec<[bool; 3]>,
    floor: Option<u8>,
    stop: bool,
    obstruction: bool,
}

impl Poller {
    pub fn new() -> Self {
        Poller { buttons: Vec::new(), floor: None, stop: false, obstruction: false }
    }

    pub fn poll_once(&mut self, elev: &dyn ElevatorDevice, tx: &HardwareTx) -> bool {
        call_buttons(elev, &mut self.buttons, &tx.call_button)
            && floor_sensor(elev, &mut self.floor, &tx.floor_sensor)
            && stop_button(elev, &mut self.stop, &tx.stop_button)
            && obstruction(elev, &mut self.obstruction, &tx.obstruction)
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

/// Starts one polling thread per input. Threads end when the receivers are dropped.
pub fn spawn(elev: Arc<dyn ElevatorDevice>, period: Duration) -> HardwareRx {
    let (tx, rx) = channels();

    {
        let elev = elev.clone();
        let ch = tx.call_button.clone();
        thread::spawn(move || {
            let mut prev = Vec::new();
            while call_buttons(elev.as_ref(), &mut prev, &ch) {
                thread::sleep(period);
            }
        });
    }
    {
        let elev = elev.clone();
        let ch = tx.floor_sensor.clone();
        thread::spawn(move || {
            let mut prev = None;
            while floor_sensor(elev.as_ref(), &mut prev, &ch) {
                thread::sleep(period);
            }
        });
    }
    {
        let elev = elev.clone();
        let ch = tx.stop_button.clone();
        thread::spawn(move || {
            let mut prev = false;
            while stop_button(elev.as_ref(), &mut prev, &ch) {
                thread::sleep(period);
            }
        });
    }
    {
        let ch = tx.obstruction;
        thread::spawn(move || {
            let mut prev = false;
            while obstruction(elev.as_ref(), &mut prev, &ch) {
                thread::sleep(period);
            }
            print::info("Hardware polling stopped".to_string());
        });
    }

    rx
}
