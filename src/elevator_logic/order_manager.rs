//! ## Order manager
//!
//! Keeps the orders of one car and the lamps that go with them.
//!
//! - Internal orders are car calls. They are logged to disk, so a restarted elevator
//!   still owes them.
//! - External orders are hall calls this car serves: assigned by the dispatcher, or
//!   adopted while the dispatcher is unreachable.
//!
//! The next order to drive to is picked with the same heuristic the dispatcher uses
//! to pick a car, with this car as the only candidate.

use crate::dispatch::heuristic;
use crate::elevio::{CallButton, CallType, ElevatorDevice};
use crate::order_log::{self, OrderLog};
use crate::print;
use crate::protocol::{Dirn, Message, Order, Status};

use super::connection::Uplink;

#[derive(Debug)]
pub struct OrderManager {
    internal: Vec<Order>,
    external: Vec<Order>,
    log: OrderLog,
    num_floors: u8,
    /// Hall lamps as last written, `[up, down]` per floor
    hall_lamps: Vec<[bool; 2]>,
}

impl OrderManager {
    /// Restores car calls from `log` and puts every lamp in a matching state.
    pub fn new(log: OrderLog, elev: &dyn ElevatorDevice) -> Self {
        let num_floors = elev.num_floors();
        let mut internal: Vec<Order> = Vec::new();
        for o in log.read_all() {
            let valid = o.dirn == Dirn::Stop && o.floor >= 0 && o.floor < num_floors as i32;
            if valid && !internal.contains(&o) {
                internal.push(o);
            }
        }
        for f in 0..num_floors {
            for call in CallType::ALL {
                elev.set_call_button_light(f, call, false);
            }
        }
        for o in &internal {
            elev.set_call_button_light(o.floor as u8, CallType::INSIDE, true);
        }
        if !internal.is_empty() {
            print::info(format!("Restored {} car call(s) from {}", internal.len(), log.path().display()));
        }
        OrderManager {
            internal,
            external: Vec::new(),
            log,
            num_floors,
            hall_lamps: vec![[false; 2]; num_floors as usize],
        }
    }

    pub fn internal(&self) -> &[Order] {
        &self.internal
    }

    pub fn external(&self) -> &[Order] {
        &self.external
    }

    pub fn is_empty(&self) -> bool {
        self.internal.is_empty() && self.external.is_empty()
    }

    fn lamp(&mut self, elev: &dyn ElevatorDevice, order: Order, on: bool) {
        if !self.on_shaft(order) {
            return;
        }
        let call = CallType::of(order.dirn);
        elev.set_call_button_light(order.floor as u8, call, on);
        if order.is_hall_call() {
            self.hall_lamps[order.floor as usize][call as usize] = on;
        }
    }

    fn on_shaft(&self, order: Order) -> bool {
        order.floor >= 0 && order.floor < self.num_floors as i32
    }

    pub fn hall_lamp(&self, order: Order) -> bool {
        if !order.is_hall_call() || !self.on_shaft(order) {
            return false;
        }
        self.hall_lamps[order.floor as usize][CallType::of(order.dirn) as usize]
    }

    /// Hall calls whose lamp is lit.
    pub fn lit_hall_calls(&self) -> Vec<Order> {
        let mut lit = Vec::new();
        for (f, lamps) in self.hall_lamps.iter().enumerate() {
            if lamps[CallType::UP as usize] {
                lit.push(Order::new(Dirn::Up, f as i32));
            }
            if lamps[CallType::DOWN as usize] {
                lit.push(Order::new(Dirn::Down, f as i32));
            }
        }
        lit
    }

    /// A new press on a call button.
    pub fn on_button(&mut self, elev: &dyn ElevatorDevice, link: &dyn Uplink, press: CallButton) {
        let order = match press.order() {
            Some(o) => o,
            None => return,
        };
        if order.dirn == Dirn::Stop {
            if self.internal.contains(&order) {
                return;
            }
            self.internal.push(order);
            self.lamp(elev, order, true);
            let log = &self.log;
            order_log::run_blocking(|| log.append(&[order]));
        } else if link.is_connected() {
            link.send(Message::Order(order));
        } else if !self.external.contains(&order) {
            print::warn(format!("Dispatcher unreachable, serving {} locally", order));
            self.external.push(order);
            self.lamp(elev, order, true);
        }
    }

    /// The dispatcher told every car about a new hall call.
    pub fn on_notify(&mut self, elev: &dyn ElevatorDevice, order: Order) {
        self.lamp(elev, order, true);
    }

    /// The dispatcher assigned a hall call to this car.
    pub fn on_to_serve(&mut self, elev: &dyn ElevatorDevice, order: Order) {
        if !self.on_shaft(order) {
            print::warn(format!("Ignoring assignment {}, no such floor", order));
            return;
        }
        if !self.external.contains(&order) {
            self.external.push(order);
        }
        self.lamp(elev, order, true);
    }

    /// Some car served `order`.
    pub fn on_served(&mut self, elev: &dyn ElevatorDevice, order: Order) {
        self.external.retain(|o| *o != order);
        self.lamp(elev, order, false);
    }

    /// Adopts every lit hall call, since nobody else can be told to take it.
    pub fn on_connection_lost(&mut self) {
        for order in self.lit_hall_calls() {
            if !self.external.contains(&order) {
                self.external.push(order);
            }
        }
    }

    /// Announces every lit hall call to a freshly connected dispatcher.
    pub fn on_connected(&self, link: &dyn Uplink) {
        for order in self.lit_hall_calls() {
            link.send(Message::Order(order));
        }
    }

    /// Clears what is done once the car stops with its door open at `floor`.
    ///
    /// ## Parameters
    /// - `target`: the order the car drove to
    /// - `heading`: the car's direction after stopping
    pub fn arrived(&mut self, elev: &dyn ElevatorDevice, link: &dyn Uplink, floor: i32, target: Option<Order>, heading: Dirn) {
        let mut served: Vec<Order> = Vec::new();
        if let Some(t) = target {
            if t.is_hall_call() && t.floor == floor {
                served.push(t);
            }
        }
        let passing = Order::new(heading, floor);
        if passing.is_hall_call() && !served.contains(&passing) && self.external.contains(&passing) {
            served.push(passing);
        }

        for order in served {
            self.external.retain(|o| *o != order);
            self.lamp(elev, order, false);
            link.send(Message::Served(order));
        }

        let car_call = Order::new(Dirn::Stop, floor);
        if self.internal.contains(&car_call) {
            self.internal.retain(|o| *o != car_call);
            self.lamp(elev, car_call, false);
            let (log, internal) = (&self.log, &self.internal);
            order_log::run_blocking(|| log.rewrite(internal));
        }
    }

    /// Drops every order this car holds after an emergency stop.
    pub fn emergency_stop(&mut self, elev: &dyn ElevatorDevice) {
        for order in std::mem::take(&mut self.internal) {
            self.lamp(elev, order, false);
        }
        self.external.clear();
        let log = &self.log;
        order_log::run_blocking(|| log.rewrite(&[]));
    }

    /// Picks the order to drive to, given the car's heading and last floor.
    pub fn next_order(&self, car: Status) -> Option<Order> {
        heuristic::select(
            self.external
                .iter()
                .chain(self.internal.iter())
                .map(|o| (*o, car, *o)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevator_logic::test_support::RecordingUplink;
    use crate::elevio::mock::MockDevice;
    use std::time::Duration;

    fn manager(dir: &tempfile::TempDir, dev: &MockDevice) -> OrderManager {
        OrderManager::new(OrderLog::new(dir.path().join("elev_log.bin")), dev)
    }

    fn press(floor: u8, call_type: CallType) -> CallButton {
        CallButton { floor, call_type }
    }

    #[test]
    fn car_calls_are_logged_and_restored_with_lamps() {
        let dir = tempfile::tempdir().unwrap();
        let dev = MockDevice::new(4, 0);
        let link = RecordingUplink::connected();
        {
            let mut om = manager(&dir, &dev);
            om.on_button(&dev, &link, press(3, CallType::INSIDE));
            om.on_button(&dev, &link, press(3, CallType::INSIDE));
            om.on_button(&dev, &link, press(1, CallType::INSIDE));
            assert_eq!(om.internal().len(), 2);
        }
        assert!(link.sent().is_empty());

        let fresh = MockDevice::new(4, 0);
        let om = manager(&dir, &fresh);
        assert_eq!(om.internal(), &[Order::new(Dirn::Stop, 3), Order::new(Dirn::Stop, 1)]);
        assert!(fresh.lamp(3, CallType::INSIDE));
        assert!(fresh.lamp(1, CallType::INSIDE));
        assert!(!fresh.lamp(2, CallType::INSIDE));
    }

    #[test]
    fn hall_press_goes_to_the_dispatcher_when_connected() {
        let dir = tempfile::tempdir().unwrap();
        let dev = MockDevice::new(4, 0);
        let link = RecordingUplink::connected();
        let mut om = manager(&dir, &dev);

        om.on_button(&dev, &link, press(2, CallType::DOWN));
        assert_eq!(link.sent(), vec![Message::Order(Order::new(Dirn::Down, 2))]);
        // lamp waits for the dispatcher's notify
        assert!(!dev.lamp(2, CallType::DOWN));
        assert!(om.external().is_empty());

        om.on_notify(&dev, Order::new(Dirn::Down, 2));
        assert!(dev.lamp(2, CallType::DOWN));
        assert!(om.external().is_empty());
    }

    #[test]
    fn hall_press_is_adopted_when_disconnected_and_announced_later() {
        let dir = tempfile::tempdir().unwrap();
        let dev = MockDevice::new(4, 0);
        let link = RecordingUplink::disconnected();
        let mut om = manager(&dir, &dev);

        om.on_button(&dev, &link, press(2, CallType::UP));
        assert!(link.sent().is_empty());
        assert!(dev.lamp(2, CallType::UP));
        assert_eq!(om.external(), &[Order::new(Dirn::Up, 2)]);

        link.set_connected(true);
        om.on_connected(&link);
        assert_eq!(link.sent(), vec![Message::Order(Order::new(Dirn::Up, 2))]);
    }

    #[test]
    fn lost_connection_adopts_lit_hall_calls() {
        let dir = tempfile::tempdir().unwrap();
        let dev = MockDevice::new(4, 0);
        let mut om = manager(&dir, &dev);

        om.on_notify(&dev, Order::new(Dirn::Up, 1));
        om.on_notify(&dev, Order::new(Dirn::Down, 3));
        om.on_served(&dev, Order::new(Dirn::Down, 3));
        om.on_connection_lost();
        assert_eq!(om.external(), &[Order::new(Dirn::Up, 1)]);
        om.on_connection_lost();
        assert_eq!(om.external().len(), 1);
    }

    #[test]
    fn arrival_clears_target_car_call_and_hall_call_in_heading() {
        let dir = tempfile::tempdir().unwrap();
        let dev = MockDevice::new(4, 0);
        let link = RecordingUplink::connected();
        let mut om = manager(&dir, &dev);

        om.on_button(&dev, &link, press(2, CallType::INSIDE));
        om.on_to_serve(&dev, Order::new(Dirn::Up, 2));
        om.on_to_serve(&dev, Order::new(Dirn::Down, 2));
        om.on_to_serve(&dev, Order::new(Dirn::Up, 3));

        om.arrived(&dev, &link, 2, Some(Order::new(Dirn::Stop, 2)), Dirn::Up);

        assert_eq!(link.sent(), vec![Message::Served(Order::new(Dirn::Up, 2))]);
        assert!(om.internal().is_empty());
        assert_eq!(om.external(), &[Order::new(Dirn::Down, 2), Order::new(Dirn::Up, 3)]);
        assert!(!dev.lamp(2, CallType::UP));
        assert!(!dev.lamp(2, CallType::INSIDE));
        assert!(dev.lamp(2, CallType::DOWN));
        assert!(OrderLog::new(dir.path().join("elev_log.bin")).read_all().is_empty());
    }

    #[test]
    fn arrival_serves_the_target_whatever_its_direction() {
        let dir = tempfile::tempdir().unwrap();
        let dev = MockDevice::new(4, 0);
        let link = RecordingUplink::connected();
        let mut om = manager(&dir, &dev);

        om.on_to_serve(&dev, Order::new(Dirn::Down, 3));
        om.arrived(&dev, &link, 3, Some(Order::new(Dirn::Down, 3)), Dirn::Down);
        assert_eq!(link.sent(), vec![Message::Served(Order::new(Dirn::Down, 3))]);
        assert!(om.is_empty());
    }

    #[test]
    fn emergency_stop_drops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let dev = MockDevice::new(4, 0);
        let link = RecordingUplink::connected();
        let mut om = manager(&dir, &dev);

        om.on_button(&dev, &link, press(1, CallType::INSIDE));
        om.on_to_serve(&dev, Order::new(Dirn::Up, 2));
        om.emergency_stop(&dev);

        assert!(om.is_empty());
        assert!(!dev.lamp(1, CallType::INSIDE));
        assert!(OrderLog::new(dir.path().join("elev_log.bin")).read_all().is_empty());
    }

    #[test]
    fn next_order_prefers_orders_ahead_then_nearest() {
        let dir = tempfile::tempdir().unwrap();
        let dev = MockDevice::new(6, 0);
        let link = RecordingUplink::connected();
        let mut om = manager(&dir, &dev);

        assert_eq!(om.next_order(Status::new(Dirn::Up, 2)), None);

        om.on_to_serve(&dev, Order::new(Dirn::Up, 5));
        om.on_button(&dev, &link, press(4, CallType::INSIDE));
        om.on_to_serve(&dev, Order::new(Dirn::Down, 1));

        // heading up from 2: nearest order ahead that goes our way
        assert_eq!(om.next_order(Status::new(Dirn::Up, 2)), Some(Order::new(Dirn::Stop, 4)));
        // heading down from 2: only the down call at 1 is on the way
        assert_eq!(om.next_order(Status::new(Dirn::Down, 2)), Some(Order::new(Dirn::Down, 1)));
        // unknown floor: nothing
        assert_eq!(om.next_order(Status::unknown()), None);
    }

    #[test]
    fn assignments_off_the_shaft_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let dev = MockDevice::new(4, 0);
        let mut om = manager(&dir, &dev);
        om.on_to_serve(&dev, Order::new(Dirn::Up, 9));
        assert!(om.is_empty());
        assert!(!om.hall_lamp(Order::new(Dirn::Up, 9)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn stalled_log_write_does_not_stall_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("later");
        let log = OrderLog::new(log_dir.join("elev_log.bin")).with_retry_delay(Duration::from_millis(5));

        // the car call's write fails until the directory shows up
        let writer = {
            let log = log.clone();
            tokio::spawn(async move {
                let dev = MockDevice::new(4, 0);
                let link = RecordingUplink::connected();
                let mut om = OrderManager::new(log, &dev);
                om.on_button(&dev, &link, press(2, CallType::INSIDE));
                om.internal().to_vec()
            })
        };
        let fixer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            std::fs::create_dir_all(&log_dir).unwrap();
        });

        let held = tokio::time::timeout(Duration::from_secs(5), writer)
            .await
            .expect("log write blocked the only worker")
            .unwrap();
        fixer.await.unwrap();
        assert_eq!(held, vec![Order::new(Dirn::Stop, 2)]);
        assert_eq!(log.read_all(), vec![Order::new(Dirn::Stop, 2)]);
    }
}
