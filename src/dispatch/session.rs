//! ## Session handler
//!
//! One [Session] per connected elevator. It owns the car's last [Status] and the
//! orders assigned to it that are not yet served, and runs three tasks:
//!
//! - a reader, turning frames into [SessionEvent]s (with a liveness watchdog),
//! - a writer, draining the session's outbound queue onto the socket,
//! - a prober, putting a `Probe` in the outbound queue every probe period.
//!
//! A session never retries a failed send. Any failure marks it dead, closes the
//! socket and emits exactly one [SessionEvent::Disconnected] with what it still owed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;

use crate::print::{self, FleetRow};
use crate::protocol::codec::{FrameReader, FrameWriter, ProtocolError};
use crate::protocol::{self, KnownStatus, Message, Order, Status, StatusUnknown};

/// What a session reports upwards.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Status { session: Arc<Session>, status: Status },
    Order { session: Arc<Session>, order: Order },
    Served { session: Arc<Session>, order: Order },
    Disconnected { session: Arc<Session>, unserved: Vec<Order> },
}

/// Operation on a session that is already torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("session {0} is closed")]
pub struct SessionClosed(pub u64);

/// Connection timing shared by every session.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub probe_period: Duration,
    pub liveness_timeout: Duration,
    pub codec_retry_budget: u32,
}

#[derive(Debug)]
pub struct Session {
    id: u64,
    peer: SocketAddr,
    alive: AtomicBool,
    status: Mutex<Status>,
    outstanding: Mutex<Vec<Order>>,
    outbound: mpsc::UnboundedSender<Message>,
    shutdown: watch::Sender<bool>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    /// Takes over `stream` and starts the session's tasks.
    ///
    /// ## Parameters
    /// - `id`: Unique per dispatcher process, used in logs and the fleet table
    /// - `events`: Where status, order, served and disconnect events are published
    pub fn spawn(
        id: u64,
        stream: TcpStream,
        config: SessionConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Arc<Session> {
        let peer = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)));
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let session = Arc::new(Session {
            id,
            peer,
            alive: AtomicBool::new(true),
            status: Mutex::new(Status::unknown()),
            outstanding: Mutex::new(Vec::new()),
            outbound: outbound.clone(),
            shutdown,
            events,
        });

        {
            let session = session.clone();
            let writer = FrameWriter::new(write_half, config.codec_retry_budget);
            tokio::spawn(async move {
                session.write_loop(writer, outbound_rx).await;
            });
        }
        {
            let session = session.clone();
            let reader = FrameReader::new(read_half, config.codec_retry_budget);
            tokio::spawn(async move {
                session.read_loop(reader, config.liveness_timeout).await;
            });
        }
        tokio::spawn(protocol::send_probes(outbound, config.probe_period));

        session
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Last applied status, unknown or not.
    pub fn status(&self) -> Status {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last status, if it may be used for distance comparisons.
    pub fn read_status(&self) -> Result<KnownStatus, StatusUnknown> {
        self.status().known()
    }

    /// Copy of the orders this car owes.
    pub fn outstanding(&self) -> Vec<Order> {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Empties the outstanding set and returns what was in it.
    pub fn take_outstanding(&self) -> Vec<Order> {
        std::mem::take(&mut *self.outstanding.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Records `order` as owed by this car and sends it a `ToServe`.
    pub fn send_assignment(&self, order: Order) -> Result<(), SessionClosed> {
        {
            let mut outstanding = self.outstanding.lock().unwrap_or_else(PoisonError::into_inner);
            // checked under the lock so a concurrent teardown sees this order in its snapshot
            if !self.is_alive() {
                return Err(SessionClosed(self.id));
            }
            outstanding.push(order);
        }
        self.transmit(Message::ToServe(order))
    }

    /// Forgets every copy of `order` and tells the car it is served.
    ///
    /// Serving an order the car never had is fine.
    pub fn send_served(&self, order: Order) -> Result<(), SessionClosed> {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|o| *o != order);
        self.transmit(Message::Served(order))
    }

    /// Lets the car light its lamp for `order` without assigning it.
    pub fn send_notify(&self, order: Order) -> Result<(), SessionClosed> {
        self.transmit(Message::Order(order))
    }

    /// Tears the session down without an error. Still emits the disconnect event.
    pub fn close(self: &Arc<Self>) {
        self.fail("closed by dispatcher".to_string());
    }

    pub fn fleet_row(&self) -> FleetRow {
        let status = self.status();
        let known = status.known().ok();
        FleetRow {
            id: self.id,
            peer: self.peer.to_string(),
            direction: known.map(|s| s.dirn.to_string()),
            floor: known.map(|s| s.floor),
            outstanding: self.outstanding().iter().map(|o| o.to_string()).collect(),
        }
    }

    fn transmit(&self, msg: Message) -> Result<(), SessionClosed> {
        if !self.is_alive() {
            return Err(SessionClosed(self.id));
        }
        self.outbound.send(msg).map_err(|_| SessionClosed(self.id))
    }

    /// Marks the session dead. Only the first call does anything.
    fn fail(self: &Arc<Self>, reason: String) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        let unserved = self.outstanding();
        print::warn(format!("Session {} ({}) lost: {}", self.id, self.peer, reason));
        self.shutdown.send_replace(true);
        let _ = self.events.send(SessionEvent::Disconnected { session: self.clone(), unserved });
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: FrameWriter<tokio::net::tcp::OwnedWriteHalf>,
        mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    ) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Err(e) = writer.send(&msg).await {
                        self.fail(format!("send failed: {}", e));
                        break;
                    }
                }
                _ = stopped(&mut shutdown) => break,
            }
        }
        writer.shutdown().await;
    }

    async fn read_loop(
        self: Arc<Self>,
        mut reader: FrameReader<tokio::net::tcp::OwnedReadHalf>,
        liveness_timeout: Duration,
    ) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let msg = tokio::select! {
                res = reader.next_within(liveness_timeout) => res,
                _ = stopped(&mut shutdown) => break,
            };
            match msg {
                Ok(Message::Probe) => {}
                Ok(Message::Status(status)) if !status.is_plausible() => {
                    print::warn(format!("Session {} reported floor {}, ignoring", self.id, status.last_floor));
                }
                Ok(Message::Order(order) | Message::Served(order)) if !order.is_on_shaft() => {
                    print::warn(format!("Session {} sent an order for floor {}, ignoring", self.id, order.floor));
                }
                Ok(Message::Status(status)) => {
                    *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
                    self.publish(SessionEvent::Status { session: self.clone(), status });
                }
                Ok(Message::Order(order)) => {
                    self.publish(SessionEvent::Order { session: self.clone(), order });
                }
                Ok(Message::Served(order)) => {
                    self.publish(SessionEvent::Served { session: self.clone(), order });
                }
                Ok(Message::ToServe(order)) => {
                    print::warn(format!("Session {} sent an assignment ({}), ignoring", self.id, order));
                }
                Err(ProtocolError::Closed) => {
                    self.fail("elevator hung up".to_string());
                    break;
                }
                Err(e) => {
                    self.fail(e.to_string());
                    break;
                }
            }
        }
    }

    fn publish(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            print::cosmic_err(format!("Session {} has no event subscriber", self.id));
        }
    }
}

/// Resolves once the session is told to stop.
///
/// The borrow from `wait_for` is dropped in here, so the calling task stays `Send`.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
