//! ## Elevator side
//!
//! Everything that runs next to one car:
//!
//! - [connection]: the link to the dispatcher (reconnect, probes, unsent buffer)
//! - [order_manager]: car calls, assigned hall calls and the lamps
//! - [motion]: motor and door state machine
//! - [timer]: the one-shot timers the state machine uses
//!
//! [ElevatorController] glues them together in one polling loop. Each iteration
//! drains the hardware channels and the link's events, then lets the motion
//! controller act on the next order.

pub mod connection;
pub mod motion;
pub mod order_manager;
pub mod timer;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::config::{self, ElevatorSettings};
use crate::elevio::elev::Elevator;
use crate::elevio::poll::{self, HardwareRx};
use crate::elevio::ElevatorDevice;
use crate::order_log::OrderLog;
use crate::print;
use crate::protocol::{Dirn, Message, Status};

use connection::{DispatcherLink, LinkEvent, Uplink};
use motion::{Behaviour, MotionController, MotionEvent};
use order_manager::OrderManager;
use timer::Timer;

pub struct ElevatorController {
    elev: Arc<dyn ElevatorDevice>,
    link: Arc<dyn Uplink>,
    hw: HardwareRx,
    link_events: mpsc::UnboundedReceiver<LinkEvent>,
    orders: OrderManager,
    motion: MotionController,
    stop_timer: Timer,
    stopped: bool,
    idle_reported: bool,
}

impl ElevatorController {
    /// Restores car calls from the log and starts looking for a floor.
    pub fn new(
        elev: Arc<dyn ElevatorDevice>,
        link: Arc<dyn Uplink>,
        hw: HardwareRx,
        link_events: mpsc::UnboundedReceiver<LinkEvent>,
        settings: &ElevatorSettings,
    ) -> Self {
        let log = OrderLog::new(&settings.log_path).with_retry_delay(settings.log_retry_delay);
        let orders = OrderManager::new(log, elev.as_ref());
        let motion = MotionController::new(elev.num_floors(), settings.door_open_time);

        let mut controller = ElevatorController {
            elev,
            link,
            hw,
            link_events,
            orders,
            motion,
            stop_timer: timer::new(settings.stop_lamp_time),
            stopped: false,
            idle_reported: false,
        };
        let events = controller.motion.start(controller.elev.as_ref());
        controller.handle_motion(events);
        controller
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    pub fn motion(&self) -> &MotionController {
        &self.motion
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// One iteration of the control loop.
    pub fn step(&mut self) {
        let elev = self.elev.clone();
        let link = self.link.clone();

        while let Ok(press) = self.hw.call_button.try_recv() {
            self.orders.on_button(elev.as_ref(), link.as_ref(), press);
        }
        while let Ok(floor) = self.hw.floor_sensor.try_recv() {
            let events = self.motion.on_floor(elev.as_ref(), floor);
            self.handle_motion(events);
        }
        while let Ok(pressed) = self.hw.stop_button.try_recv() {
            if pressed {
                self.emergency_stop();
            }
        }
        while let Ok(on) = self.hw.obstruction.try_recv() {
            self.motion.set_obstruction(on);
        }

        while let Ok(event) = self.link_events.try_recv() {
            self.handle_link(event);
        }

        if self.stopped && self.stop_timer.timer_timeouted() {
            self.stop_timer.timer_stop();
            self.stopped = false;
            elev.set_stop_lamp(false);
            self.motion.resume(elev.as_ref());
        }

        let next = if self.stopped { None } else { self.orders.next_order(self.motion.status()) };
        let events = self.motion.drive(elev.as_ref(), next);
        self.handle_motion(events);

        if !self.stopped && !self.idle_reported && next.is_none() && self.motion.behaviour() == Behaviour::Idle {
            self.link.send(Message::Status(Status::new(Dirn::Stop, self.motion.last_floor())));
            self.idle_reported = true;
        }
    }

    /// Steps forever, one step per `period`.
    pub async fn run(mut self, period: Duration) {
        loop {
            self.step();
            sleep(period).await;
        }
    }

    fn handle_link(&mut self, event: LinkEvent) {
        let elev = self.elev.clone();
        match event {
            LinkEvent::Connected => {
                let status = if self.stopped { Status::unknown() } else { self.motion.report() };
                self.link.send(Message::Status(status));
                self.orders.on_connected(self.link.as_ref());
            }
            LinkEvent::ConnectionLost => {
                print::warn("Dispatcher lost, serving lit hall calls locally".to_string());
                self.orders.on_connection_lost();
            }
            LinkEvent::Message(Message::Order(order)) => self.orders.on_notify(elev.as_ref(), order),
            LinkEvent::Message(Message::ToServe(order)) => {
                print::elevator(format!("Assigned {}", order));
                self.orders.on_to_serve(elev.as_ref(), order);
            }
            LinkEvent::Message(Message::Served(order)) => self.orders.on_served(elev.as_ref(), order),
            LinkEvent::Message(other) => {
                print::warn(format!("Unexpected message from dispatcher: {:?}", other));
            }
        }
    }

    fn handle_motion(&mut self, events: Vec<MotionEvent>) {
        for event in events {
            match event {
                MotionEvent::Initialized { floor } => {
                    print::ok(format!("Elevator ready at floor {}", floor));
                }
                MotionEvent::Departed { dirn, floor } => {
                    self.link.send(Message::Status(Status::new(dirn, floor)));
                    self.idle_reported = false;
                }
                MotionEvent::PassedFloor { dirn, floor } => {
                    self.link.send(Message::Status(Status::new(dirn, floor)));
                }
                MotionEvent::Arrived { floor, target, heading } => {
                    self.link.send(Message::Status(Status::new(Dirn::Stop, floor)));
                    self.orders
                        .arrived(self.elev.as_ref(), self.link.as_ref(), floor, target, heading);
                    self.idle_reported = true;
                }
                MotionEvent::DoorClosed { .. } => {}
            }
        }
    }

    fn emergency_stop(&mut self) {
        print::warn("Emergency stop!".to_string());
        self.motion.emergency_stop(self.elev.as_ref());
        self.orders.emergency_stop(self.elev.as_ref());
        self.elev.set_stop_lamp(true);
        self.stop_timer.timer_start();
        self.stopped = true;
        self.idle_reported = false;
        self.link.send(Message::Status(Status::unknown()));
    }
}

/// Runs the elevator program against the elevator server in `settings`.
pub async fn run_local_elevator(settings: ElevatorSettings) -> anyhow::Result<()> {
    let driver = Elevator::init(&settings.driver_addr, settings.num_floors)
        .with_context(|| format!("connecting to the elevator server at {}", settings.driver_addr))?;
    print::info(format!("Elevator started:\n{}", driver));
    let elev: Arc<dyn ElevatorDevice> = Arc::new(driver);

    let hw = poll::spawn(elev.clone(), config::ELEV_POLL);
    let (link, link_events) = DispatcherLink::spawn(&settings);
    let controller = ElevatorController::new(elev, Arc::new(link), hw, link_events, &settings);

    controller.run(settings.poll_period).await;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::connection::Uplink;
    use crate::protocol::Message;

    /// Remembers what would have been sent. Probes never reach it.
    pub struct RecordingUplink {
        sent: Mutex<Vec<Message>>,
        connected: AtomicBool,
    }

    impl RecordingUplink {
        pub fn connected() -> Self {
            RecordingUplink { sent: Mutex::new(Vec::new()), connected: AtomicBool::new(true) }
        }

        pub fn disconnected() -> Self {
            RecordingUplink { sent: Mutex::new(Vec::new()), connected: AtomicBool::new(false) }
        }

        pub fn set_connected(&self, on: bool) {
            self.connected.store(on, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<Message> {
            self.sent.lock().unwrap().clone()
        }

        pub fn take(&self) -> Vec<Message> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    impl Uplink for RecordingUplink {
        fn send(&self, msg: Message) {
            self.sent.lock().unwrap().push(msg);
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingUplink;
    use super::*;
    use crate::elevio::mock::{MockDevice, TICKS_PER_FLOOR};
    use crate::elevio::poll::{channels, HardwareTx, Poller};
    use crate::elevio::CallType;
    use crate::protocol::Order;

    struct Rig {
        dev: Arc<MockDevice>,
        link: Arc<RecordingUplink>,
        tx: HardwareTx,
        poller: Poller,
        link_tx: mpsc::UnboundedSender<LinkEvent>,
        ctl: ElevatorController,
        _dir: tempfile::TempDir,
    }

    impl Rig {
        fn new(dev: MockDevice) -> Rig {
            let dir = tempfile::tempdir().unwrap();
            let settings = ElevatorSettings {
                log_path: dir.path().join("elev_log.bin"),
                door_open_time: Duration::from_millis(20),
                stop_lamp_time: Duration::from_millis(20),
                ..ElevatorSettings::default()
            };
            let dev = Arc::new(dev);
            let link = Arc::new(RecordingUplink::connected());
            let (tx, rx) = channels();
            let (link_tx, link_rx) = mpsc::unbounded_channel();
            let ctl = ElevatorController::new(dev.clone(), link.clone(), rx, link_rx, &settings);
            Rig { dev, link, tx, poller: Poller::new(), link_tx, ctl, _dir: dir }
        }

        /// Polls, steps and moves the car, `n` times.
        fn run(&mut self, n: usize) {
            for _ in 0..n {
                self.poller.poll_once(self.dev.as_ref(), &self.tx);
                self.ctl.step();
                self.dev.advance();
            }
        }

        fn run_until(&mut self, mut done: impl FnMut(&Rig) -> bool) {
            for _ in 0..2000 {
                if done(self) {
                    return;
                }
                self.run(1);
                std::thread::sleep(Duration::from_millis(1));
            }
            panic!("condition never reached");
        }
    }

    #[test]
    fn reports_idle_once_after_finding_a_floor() {
        let mut rig = Rig::new(MockDevice::between_floors(4, 2));
        assert_eq!(rig.dev.motor(), Dirn::Down);
        rig.run(TICKS_PER_FLOOR as usize);
        rig.run(5);
        assert_eq!(rig.link.take(), vec![Message::Status(Status::new(Dirn::Stop, 2))]);
    }

    #[test]
    fn serves_an_assigned_hall_call() {
        let mut rig = Rig::new(MockDevice::new(4, 0));
        rig.run(2);
        rig.link.take();

        let order = Order::new(Dirn::Down, 2);
        rig.link_tx.send(LinkEvent::Message(Message::Order(order))).unwrap();
        rig.link_tx.send(LinkEvent::Message(Message::ToServe(order))).unwrap();
        rig.run_until(|r| r.link.sent().contains(&Message::Served(order)));

        assert_eq!(
            rig.link.take(),
            vec![
                Message::Status(Status::new(Dirn::Up, 0)),
                Message::Status(Status::new(Dirn::Up, 1)),
                Message::Status(Status::new(Dirn::Stop, 2)),
                Message::Served(order),
            ]
        );
        assert!(rig.dev.door_open());
        assert!(!rig.dev.lamp(2, CallType::DOWN));
        assert!(rig.ctl.orders().is_empty());
    }

    #[test]
    fn car_call_is_served_without_the_dispatcher() {
        let mut rig = Rig::new(MockDevice::new(4, 3));
        rig.run(2);
        rig.dev.press(1, CallType::INSIDE);
        rig.run(1);
        rig.dev.release(1, CallType::INSIDE);
        assert!(rig.dev.lamp(1, CallType::INSIDE));

        rig.run_until(|r| r.ctl.motion().behaviour() == Behaviour::DoorOpen);
        assert_eq!(rig.ctl.motion().last_floor(), 1);
        assert!(!rig.dev.lamp(1, CallType::INSIDE));
        assert!(rig.ctl.orders().internal().is_empty());
        assert!(!rig.link.sent().iter().any(|m| matches!(m, Message::Served(_))));
    }

    #[test]
    fn emergency_stop_reports_unknown_then_idle() {
        let mut rig = Rig::new(MockDevice::new(4, 0));
        rig.run(2);
        rig.link_tx.send(LinkEvent::Message(Message::ToServe(Order::new(Dirn::Up, 3)))).unwrap();
        rig.run(2);
        rig.link.take();

        rig.dev.set_stop(true);
        rig.run(1);
        rig.dev.set_stop(false);
        assert!(rig.ctl.is_stopped());
        assert!(rig.dev.stop_lamp());
        assert_eq!(rig.dev.motor(), Dirn::Stop);
        assert!(rig.ctl.orders().is_empty());
        assert_eq!(rig.link.take(), vec![Message::Status(Status::unknown())]);

        rig.run_until(|r| !r.ctl.is_stopped());
        rig.run(1);
        assert!(!rig.dev.stop_lamp());
        let sent = rig.link.take();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], Message::Status(Status { dirn: Dirn::Stop, last_floor: 0 })));
    }

    #[test]
    fn reconnect_sends_status_and_announces_lit_hall_calls() {
        let mut rig = Rig::new(MockDevice::new(4, 1));
        rig.run(2);
        rig.link.set_connected(false);
        rig.link_tx.send(LinkEvent::ConnectionLost).unwrap();
        rig.dev.press(3, CallType::DOWN);
        rig.run(1);
        rig.dev.release(3, CallType::DOWN);
        assert!(rig.dev.lamp(3, CallType::DOWN));
        assert_eq!(rig.ctl.orders().external(), &[Order::new(Dirn::Down, 3)]);
        rig.link.take();

        rig.link.set_connected(true);
        rig.link_tx.send(LinkEvent::Connected).unwrap();
        rig.ctl.step();
        let sent = rig.link.take();
        assert!(matches!(sent[0], Message::Status(_)));
        assert!(sent.contains(&Message::Order(Order::new(Dirn::Down, 3))));
    }
}
