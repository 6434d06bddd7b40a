//! ## Dispatch coordinator
//!
//! Accepts elevator connections, owns the fleet, and reacts to session events:
//!
//! - **order**: notify every car, append to the log, then assign. With no eligible
//!   car the order waits `dispatch_retry` and is tried again, forever.
//! - **served**: tell every car, then rewrite the log to what is still owed.
//! - **status** with unknown floor (emergency stop): re-dispatch what that car owed.
//! - **disconnect**: drop the session and re-dispatch what it owed.
//! - **accept**: a new car gets a lamp notify for every order still owed.
//!
//! Orders waiting for a car are kept in a pending list. Log rewrites include them,
//! so an order is in the log from the moment it is received until it is served.
//!
//! Every event is handled in its own task; handlers run concurrently with each
//! other and with the accept loop. The fleet is only read through snapshots.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::Context;
use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use super::heuristic;
use super::session::{Session, SessionConfig, SessionEvent};
use crate::config::{self, DispatcherSettings};
use crate::display::StatusDisplay;
use crate::network;
use crate::order_log::OrderLog;
use crate::print;
use crate::protocol::{Order, Status};

pub struct Coordinator {
    settings: DispatcherSettings,
    local_addr: SocketAddr,
    fleet: RwLock<Vec<Arc<Session>>>,
    pending: Mutex<Vec<Order>>,
    /// Serializes log writes with the snapshots they are computed from
    log: tokio::sync::Mutex<OrderLog>,
    events: mpsc::UnboundedSender<SessionEvent>,
    next_id: AtomicU64,
    display: Arc<dyn StatusDisplay>,
}

impl Coordinator {
    /// Binds the elevator port and starts serving.
    ///
    /// ## Parameters
    /// - `recovering`: `true` when taking over from a dead dispatcher. The log is then
    ///   replayed and every order in it is dispatched again. Otherwise a stale log
    ///   from an earlier run is deleted.
    ///
    /// ## Returns
    /// The running coordinator. Its tasks keep running after the handle is dropped.
    pub async fn start(
        settings: DispatcherSettings,
        display: Arc<dyn StatusDisplay>,
        recovering: bool,
    ) -> anyhow::Result<Arc<Coordinator>> {
        let listener = network::create_reusable_listener(&settings.bind_ip, settings.elevator_port)
            .with_context(|| format!("binding elevator port {}:{}", settings.bind_ip, settings.elevator_port))?;
        let local_addr = listener.local_addr().context("reading elevator listener address")?;

        let log = OrderLog::new(&settings.log_path).with_retry_delay(settings.log_retry_delay);
        let recovered = {
            let log = log.clone();
            if recovering {
                tokio::task::spawn_blocking(move || log.read_all()).await?
            } else {
                tokio::task::spawn_blocking(move || log.remove()).await?;
                Vec::new()
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(Coordinator {
            settings,
            local_addr,
            fleet: RwLock::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            log: tokio::sync::Mutex::new(log),
            events: events_tx,
            next_id: AtomicU64::new(1),
            display,
        });

        coordinator.display.address(network::local_ip(), local_addr.port());
        coordinator.display.elevator_count(0);

        {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator.event_loop(events_rx).await;
            });
        }

        if !recovered.is_empty() {
            let mut unique: Vec<Order> = Vec::new();
            for order in recovered {
                if !unique.contains(&order) {
                    unique.push(order);
                }
            }
            print::dispatch(format!("Recovering {} order(s) from the log", unique.len()));
            coordinator.add_pending(&unique);
            for order in unique {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    coordinator.dispatch_pending(order).await;
                });
            }
        }

        {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator.accept_loop(listener).await;
            });
        }

        if let Some(exe) = coordinator.settings.local_elevator.clone() {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator.supervise_local_elevator(exe).await;
            });
        }

        Ok(coordinator)
    }

    /// Address the elevator listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of the live fleet.
    pub fn fleet(&self) -> Vec<Arc<Session>> {
        self.fleet.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn elevator_count(&self) -> usize {
        self.fleet.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Orders received but not yet accepted by any car.
    pub fn pending(&self) -> Vec<Order> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Runs the assignment rule over the current fleet.
    ///
    /// ## Returns
    /// - `None` if no live car has a known status.
    pub fn choose(&self, order: Order) -> Option<Arc<Session>> {
        let fleet = self.fleet.read().unwrap_or_else(PoisonError::into_inner);
        heuristic::select(
            fleet
                .iter()
                .filter(|s| s.is_alive())
                .map(|s| (s.clone(), s.status(), order)),
        )
    }

    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            probe_period: self.settings.probe_period,
            liveness_timeout: self.settings.liveness_timeout,
            codec_retry_budget: self.settings.codec_retry_budget,
        }
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        let config = self.session_config();
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                    let session = Session::spawn(id, stream, config, self.events.clone());
                    let Some(count) = self.admit(&session) else {
                        print::warn(format!("Elevator {} from {} hung up before it was added", id, addr));
                        continue;
                    };
                    print::dispatch(format!("Elevator {} connected from {}", id, addr));
                    // the newcomer lights the lamps of everything still owed
                    for order in self.owed() {
                        let _ = session.send_notify(order);
                    }
                    self.display.event("Elevator connected");
                    self.display.elevator_count(count);
                    self.show_fleet();
                }
                Err(e) => {
                    print::err(format!("Error while accepting elevator connection: {}", e));
                    sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Adds a freshly spawned session to the fleet, unless it already died.
    ///
    /// A session that dies before this point has had its disconnect handled without
    /// being found, so it must not enter the fleet. Checked under the fleet lock, which
    /// the disconnect handler also takes.
    ///
    /// ## Returns
    /// - `Some(count)`: the new fleet size
    /// - `None`: the session was already dead and was left out
    fn admit(&self, session: &Arc<Session>) -> Option<usize> {
        let mut fleet = self.fleet.write().unwrap_or_else(PoisonError::into_inner);
        if !session.is_alive() {
            return None;
        }
        fleet.push(session.clone());
        Some(fleet.len())
    }

    async fn event_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            let coordinator = self.clone();
            tokio::spawn(async move {
                coordinator.handle(event).await;
            });
        }
    }

    async fn handle(self: Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::Order { session, order } => {
                print::dispatch(format!("Order {} from elevator {}", order, session.id()));
                self.order_received(order).await;
            }
            SessionEvent::Served { session, order } => {
                print::dispatch(format!("Order {} served by elevator {}", order, session.id()));
                self.served_received(order).await;
            }
            SessionEvent::Status { session, status } => {
                self.status_received(session, status).await;
            }
            SessionEvent::Disconnected { session, unserved } => {
                self.disconnected(session, unserved).await;
            }
        }
    }

    /// A new hall call: light every lamp, make it durable, then find it a car.
    pub async fn order_received(self: &Arc<Self>, order: Order) {
        self.add_pending(&[order]);
        for session in self.fleet() {
            let _ = session.send_notify(order);
        }
        {
            let log = self.log.lock().await;
            let writer = log.clone();
            if let Err(e) = tokio::task::spawn_blocking(move || writer.append(&[order])).await {
                print::err(format!("Appending {} to the log panicked: {}", order, e));
            }
        }
        self.display.event("Order received");
        self.dispatch_pending(order).await;
    }

    /// Retries until some car accepts `order`, or until it is served while waiting.
    ///
    /// `order` must already be in the pending list.
    async fn dispatch_pending(self: &Arc<Self>, order: Order) {
        loop {
            if !self.is_pending(order) {
                print::dispatch(format!("Order {} was served while waiting for a car", order));
                return;
            }
            match self.choose(order) {
                Some(session) => {
                    if session.send_assignment(order).is_ok() {
                        self.remove_pending_once(order);
                        print::dispatch(format!("Order {} dispatched to elevator {}", order, session.id()));
                        self.display.event("Order dispatched");
                        self.show_fleet();
                        return;
                    }
                    // the car died between choice and send; it is not alive any more, pick again
                }
                None => {
                    print::dispatch(format!(
                        "No eligible elevator for {}, retrying in {:?}",
                        order, self.settings.dispatch_retry
                    ));
                    self.display.event("Order delayed");
                    sleep(self.settings.dispatch_retry).await;
                }
            }
        }
    }

    /// A car finished `order`: every car turns the lamp off, the log shrinks.
    pub async fn served_received(self: &Arc<Self>, order: Order) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|o| *o != order);
        for session in self.fleet() {
            let _ = session.send_served(order);
        }
        self.rewrite_log().await;
        self.display.event("Order served");
        self.show_fleet();
    }

    async fn status_received(self: &Arc<Self>, session: Arc<Session>, status: Status) {
        if !status.is_unknown() {
            return;
        }
        let owed = {
            let _log = self.log.lock().await;
            let owed = session.take_outstanding();
            self.add_pending(&owed);
            owed
        };
        print::dispatch(format!(
            "Elevator {} emergency stopped, re-dispatching {} order(s)",
            session.id(),
            owed.len()
        ));
        self.display.event("Elevator stopped");
        self.redispatch(owed).await;
    }

    async fn disconnected(self: &Arc<Self>, session: Arc<Session>, unserved: Vec<Order>) {
        let (found, count) = {
            let _log = self.log.lock().await;
            self.add_pending(&unserved);
            let mut fleet = self.fleet.write().unwrap_or_else(PoisonError::into_inner);
            let before = fleet.len();
            fleet.retain(|s| !Arc::ptr_eq(s, &session));
            (fleet.len() != before, fleet.len())
        };
        if !found {
            self.remove_pending(&unserved);
            return;
        }
        print::dispatch(format!(
            "Elevator {} disconnected, re-dispatching {} order(s)",
            session.id(),
            unserved.len()
        ));
        self.display.event("Elevator disconnected");
        self.display.elevator_count(count);
        self.show_fleet();
        self.redispatch(unserved).await;
    }

    /// Sends already-pending orders through assignment again, concurrently.
    async fn redispatch(self: &Arc<Self>, orders: Vec<Order>) {
        join_all(orders.into_iter().map(|order| {
            let coordinator = self.clone();
            async move {
                for session in coordinator.fleet() {
                    let _ = session.send_notify(order);
                }
                coordinator.dispatch_pending(order).await;
            }
        }))
        .await;
    }

    /// Every order still owed by a car or waiting for one, without duplicates.
    fn owed(&self) -> Vec<Order> {
        let mut owed: Vec<Order> = Vec::new();
        let sources = self
            .fleet()
            .iter()
            .flat_map(|s| s.outstanding())
            .chain(self.pending())
            .collect::<Vec<_>>();
        for order in sources {
            if !owed.contains(&order) {
                owed.push(order);
            }
        }
        owed
    }

    /// Rewrites the log to every order still owed by a car or waiting for one.
    async fn rewrite_log(&self) {
        let log = self.log.lock().await;
        let owed = self.owed();
        let writer = log.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || writer.rewrite(&owed)).await {
            print::err(format!("Rewriting the log panicked: {}", e));
        }
    }

    /// Keeps an elevator running on this host while the fleet is empty.
    async fn supervise_local_elevator(self: Arc<Self>, exe: std::path::PathBuf) {
        let mut child: Option<tokio::process::Child> = None;
        loop {
            sleep(self.settings.local_elevator_check).await;
            if self.elevator_count() > 0 {
                continue;
            }
            if let Some(running) = child.as_mut() {
                if let Ok(None) = running.try_wait() {
                    continue;
                }
            }
            print::info(format!("No elevators connected, starting {}", exe.display()));
            match Command::new(&exe)
                .arg(config::DEFAULT_DISPATCHER_IP)
                .arg(self.local_addr.port().to_string())
                .spawn()
            {
                Ok(c) => child = Some(c),
                Err(e) => print::err(format!("Could not start local elevator {}: {}", exe.display(), e)),
            }
        }
    }

    fn add_pending(&self, orders: &[Order]) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(orders);
    }

    fn remove_pending(&self, orders: &[Order]) {
        for order in orders {
            self.remove_pending_once(*order);
        }
    }

    fn remove_pending_once(&self, order: Order) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(idx) = pending.iter().position(|o| *o == order) {
            pending.remove(idx);
        }
    }

    fn is_pending(&self, order: Order) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&order)
    }

    fn show_fleet(&self) {
        let rows: Vec<_> = self.fleet().iter().map(|s| s.fleet_row()).collect();
        print::fleet(&format!("DISPATCHER {}", self.local_addr), &rows);
    }
}
