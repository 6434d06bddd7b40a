mod common;

use std::sync::Arc;

use tokio::time::{sleep, Duration};

use common::{fast_settings, wait_until, FakeCar, RecordingDisplay};
use elevdispatch::dispatch::coordinator::Coordinator;
use elevdispatch::order_log::OrderLog;
use elevdispatch::protocol::{Dirn, Message, Order, Status};

const SHORT: Duration = Duration::from_millis(300);
const LONG: Duration = Duration::from_secs(3);

async fn start(dir: &tempfile::TempDir, recovering: bool) -> (Arc<Coordinator>, Arc<RecordingDisplay>) {
    let display = Arc::new(RecordingDisplay::default());
    let settings = fast_settings(&dir.path().join("elevator_log.bin"));
    let coordinator = Coordinator::start(settings, display.clone(), recovering).await.unwrap();
    (coordinator, display)
}

/// Connects one car per status and waits until the dispatcher has applied them all.
async fn fleet(coordinator: &Arc<Coordinator>, statuses: &[Status]) -> Vec<FakeCar> {
    let mut cars = Vec::new();
    for status in statuses {
        let n = cars.len() + 1;
        let mut car = FakeCar::connect(coordinator.local_addr()).await;
        wait_until(LONG, || coordinator.elevator_count() == n).await;
        car.send(Message::Status(*status)).await;
        cars.push(car);
    }
    wait_until(LONG, || {
        let mut seen: Vec<Status> = coordinator.fleet().iter().map(|s| s.status()).collect();
        let mut want = statuses.to_vec();
        seen.sort_by_key(|s| s.last_floor);
        want.sort_by_key(|s| s.last_floor);
        seen == want
    })
    .await;
    cars
}

fn log_at(dir: &tempfile::TempDir) -> OrderLog {
    OrderLog::new(dir.path().join("elevator_log.bin"))
}

#[tokio::test]
async fn car_standing_at_the_floor_wins() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _) = start(&dir, false).await;
    let mut cars = fleet(
        &coordinator,
        &[Status::new(Dirn::Stop, 0), Status::new(Dirn::Stop, 3), Status::new(Dirn::Stop, 5)],
    )
    .await;

    let order = Order::new(Dirn::Up, 3);
    cars[0].send(Message::Order(order)).await;

    for car in cars.iter_mut() {
        assert_eq!(car.next(LONG).await, Some(Message::Order(order)));
    }
    assert_eq!(cars[1].next(LONG).await, Some(Message::ToServe(order)));
    assert_eq!(cars[0].next(SHORT).await, None);
    assert_eq!(cars[2].next(SHORT).await, None);
}

#[tokio::test]
async fn car_on_its_way_beats_a_nearer_idle_car() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _) = start(&dir, false).await;
    let mut cars = fleet(&coordinator, &[Status::new(Dirn::Stop, 5), Status::new(Dirn::Up, 1)]).await;

    let order = Order::new(Dirn::Up, 4);
    cars[0].send(Message::Order(order)).await;

    assert_eq!(cars[1].assignment(LONG).await, Some(order));
    assert_eq!(cars[0].assignment(SHORT).await, None);
}

#[tokio::test]
async fn order_is_logged_until_served_and_served_is_broadcast() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, display) = start(&dir, false).await;
    let mut cars = fleet(&coordinator, &[Status::new(Dirn::Stop, 0), Status::new(Dirn::Stop, 2)]).await;

    let order = Order::new(Dirn::Down, 2);
    cars[0].send(Message::Order(order)).await;
    assert_eq!(cars[1].assignment(LONG).await, Some(order));
    assert_eq!(log_at(&dir).read_all(), vec![order]);
    wait_until(LONG, || coordinator.pending().is_empty()).await;

    cars[1].send(Message::Served(order)).await;
    for car in cars.iter_mut() {
        assert!(car.wait_for(Message::Served(order), LONG).await);
    }
    wait_until(LONG, || log_at(&dir).read_all().is_empty()).await;
    assert!(coordinator.fleet().iter().all(|s| s.outstanding().is_empty()));

    for e in ["Order received", "Order dispatched", "Order served"] {
        wait_until(LONG, || display.events().iter().any(|x| x == e)).await;
    }
}

#[tokio::test]
async fn lost_car_has_its_orders_redispatched_once() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, display) = start(&dir, false).await;
    let mut cars = fleet(&coordinator, &[Status::new(Dirn::Stop, 0), Status::new(Dirn::Stop, 3)]).await;

    let order = Order::new(Dirn::Down, 3);
    cars[0].send(Message::Order(order)).await;
    assert_eq!(cars[1].assignment(LONG).await, Some(order));

    let lost = cars.pop().unwrap();
    drop(lost);

    assert_eq!(cars[0].assignment(LONG).await, Some(order));
    assert_eq!(cars[0].assignment(SHORT).await, None);
    wait_until(LONG, || coordinator.elevator_count() == 1).await;
    assert_eq!(log_at(&dir).read_all(), vec![order]);
    assert!(display.events().iter().any(|e| e == "Elevator disconnected"));
}

#[tokio::test]
async fn order_waits_for_a_car_with_known_status() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, display) = start(&dir, false).await;
    let mut car = FakeCar::connect(coordinator.local_addr()).await;
    wait_until(LONG, || coordinator.elevator_count() == 1).await;

    let order = Order::new(Dirn::Up, 2);
    car.send(Message::Order(order)).await;
    assert_eq!(car.assignment(SHORT).await, None);
    assert_eq!(coordinator.pending(), vec![order]);
    assert!(display.events().iter().any(|e| e == "Order delayed"));

    car.send(Message::Status(Status::new(Dirn::Stop, 0))).await;
    assert_eq!(car.assignment(LONG).await, Some(order));
    wait_until(LONG, || coordinator.pending().is_empty()).await;
}

#[tokio::test]
async fn emergency_stopped_car_gives_up_its_orders() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _) = start(&dir, false).await;
    let mut cars = fleet(&coordinator, &[Status::new(Dirn::Stop, 0), Status::new(Dirn::Stop, 3)]).await;

    let order = Order::new(Dirn::Up, 3);
    cars[0].send(Message::Order(order)).await;
    assert_eq!(cars[1].assignment(LONG).await, Some(order));

    cars[1].send(Message::Status(Status::unknown())).await;
    assert_eq!(cars[0].assignment(LONG).await, Some(order));
    assert_eq!(cars[1].assignment(SHORT).await, None);
}

#[tokio::test]
async fn recovery_replays_the_log_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let up = Order::new(Dirn::Up, 1);
    let down = Order::new(Dirn::Down, 2);
    log_at(&dir).append(&[up, up, down]);

    let (coordinator, _) = start(&dir, true).await;
    sleep(Duration::from_millis(50)).await;
    let mut pending = coordinator.pending();
    pending.sort_by_key(|o| o.floor);
    assert_eq!(pending, vec![up, down]);

    let mut cars = fleet(&coordinator, &[Status::new(Dirn::Stop, 0)]).await;
    let mut got = vec![
        cars[0].assignment(LONG).await.unwrap(),
        cars[0].assignment(LONG).await.unwrap(),
    ];
    got.sort_by_key(|o| o.floor);
    assert_eq!(got, vec![up, down]);
    assert_eq!(cars[0].assignment(SHORT).await, None);
}

#[tokio::test]
async fn fresh_start_forgets_an_old_log() {
    let dir = tempfile::tempdir().unwrap();
    log_at(&dir).append(&[Order::new(Dirn::Up, 1)]);

    let (coordinator, _) = start(&dir, false).await;
    assert!(coordinator.pending().is_empty());
    assert!(log_at(&dir).read_all().is_empty());
    assert!(!dir.path().join("elevator_log.bin").exists());
}

#[tokio::test]
async fn recovered_orders_light_the_lamps_of_new_cars() {
    let dir = tempfile::tempdir().unwrap();
    let up = Order::new(Dirn::Up, 1);
    log_at(&dir).append(&[up]);

    let (coordinator, _) = start(&dir, true).await;
    // no status yet, so nothing can be assigned; the lamp notify still arrives
    let mut car = FakeCar::connect(coordinator.local_addr()).await;
    assert_eq!(car.next(LONG).await, Some(Message::Order(up)));
    assert_eq!(coordinator.pending(), vec![up]);
}

#[tokio::test]
async fn cars_that_hang_up_at_once_are_not_counted() {
    let dir = tempfile::tempdir().unwrap();
    let (coordinator, _) = start(&dir, false).await;

    for _ in 0..20 {
        let car = FakeCar::connect(coordinator.local_addr()).await;
        drop(car);
    }
    wait_until(LONG, || coordinator.elevator_count() == 0).await;
    sleep(Duration::from_millis(100)).await;
    assert_eq!(coordinator.elevator_count(), 0);

    let _car = FakeCar::connect(coordinator.local_addr()).await;
    wait_until(LONG, || coordinator.elevator_count() == 1).await;
}
