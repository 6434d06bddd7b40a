//! ## Link to the dispatcher
//!
//! A background task that keeps one TCP connection to the dispatcher alive:
//!
//! - connects, and on failure retries after the reconnect delay, forever
//! - sends a `Probe` every probe period while connected
//! - drops the connection if nothing arrives within the liveness timeout
//! - keeps `Order` and `Served` messages that could not be sent, and sends them
//!   first on the next connection. `Status` and `Probe` are only meaningful on a live
//!   link and are dropped instead.
//!
//! Everything received, plus `Connected` / `ConnectionLost`, is handed to the
//! controller as [LinkEvent]s.

use std::collections::VecDeque;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep, timeout, Duration, MissedTickBehavior};

use crate::config::ElevatorSettings;
use crate::print;
use crate::protocol::codec::{FrameReader, FrameWriter, ProtocolError};
use crate::protocol::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    ConnectionLost,
    Message(Message),
}

/// Outgoing side of the dispatcher link, as seen by the order manager and controller.
pub trait Uplink: Send + Sync {
    fn send(&self, msg: Message);
    fn is_connected(&self) -> bool;
}

/// Handle to the link task. Dropping every handle stops the task.
#[derive(Debug, Clone)]
pub struct DispatcherLink {
    outbound: mpsc::UnboundedSender<Message>,
    connected: watch::Receiver<bool>,
}

impl DispatcherLink {
    /// Starts the link task. Must be called inside a tokio runtime.
    pub fn spawn(settings: &ElevatorSettings) -> (DispatcherLink, mpsc::UnboundedReceiver<LinkEvent>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected) = watch::channel(false);

        tokio::spawn(link_loop(settings.clone(), outbound_rx, events_tx, connected_tx));

        (DispatcherLink { outbound, connected }, events_rx)
    }
}

impl Uplink for DispatcherLink {
    fn send(&self, msg: Message) {
        if self.outbound.send(msg).is_err() {
            print::warn(format!("Dispatcher link is gone, dropped {:?}", msg));
        }
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }
}

/// Messages worth delivering late.
fn keep_unsent(msg: &Message) -> bool {
    matches!(msg, Message::Order(_) | Message::Served(_))
}

/// Moves whatever the controller queued while offline into `unsent`.
fn collect_offline(outbound: &mut mpsc::UnboundedReceiver<Message>, unsent: &mut VecDeque<Message>) {
    while let Ok(msg) = outbound.try_recv() {
        if keep_unsent(&msg) {
            unsent.push_back(msg);
        }
    }
}

async fn link_loop(
    settings: ElevatorSettings,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    events: mpsc::UnboundedSender<LinkEvent>,
    connected: watch::Sender<bool>,
) {
    let mut unsent: VecDeque<Message> = VecDeque::new();

    loop {
        collect_offline(&mut outbound, &mut unsent);
        if outbound.is_closed() && events.is_closed() {
            return;
        }

        let stream = match timeout(settings.liveness_timeout, TcpStream::connect(&settings.dispatcher_addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                print::warn(format!("Could not reach dispatcher at {}: {}", settings.dispatcher_addr, e));
                sleep(settings.reconnect_delay).await;
                continue;
            }
            Err(_) => {
                print::warn(format!("Connecting to dispatcher at {} timed out", settings.dispatcher_addr));
                sleep(settings.reconnect_delay).await;
                continue;
            }
        };
        let _ = stream.set_nodelay(true);
        print::ok(format!("Connected to dispatcher at {}", settings.dispatcher_addr));

        connected.send_replace(true);
        if events.send(LinkEvent::Connected).is_err() {
            return;
        }

        let reason = run_connection(stream, &settings, &mut outbound, &events, &mut unsent).await;

        connected.send_replace(false);
        print::err(format!("Lost connection to dispatcher: {}", reason));
        if events.send(LinkEvent::ConnectionLost).is_err() {
            return;
        }
        sleep(settings.reconnect_delay).await;
    }
}

/// Serves one connection until it fails. Returns why it ended.
async fn run_connection(
    stream: TcpStream,
    settings: &ElevatorSettings,
    outbound: &mut mpsc::UnboundedReceiver<Message>,
    events: &mpsc::UnboundedSender<LinkEvent>,
    unsent: &mut VecDeque<Message>,
) -> ProtocolError {
    let (read_half, write_half) = stream.into_split();
    let mut writer = FrameWriter::new(write_half, settings.codec_retry_budget);
    let reader = FrameReader::new(read_half, settings.codec_retry_budget);

    // own task, a frame read must never be cancelled halfway
    let mut reader_task = tokio::spawn(read_loop(reader, settings.liveness_timeout, events.clone()));

    let reason = 'conn: {
        while let Some(msg) = unsent.pop_front() {
            if let Err(e) = writer.send(&msg).await {
                unsent.push_front(msg);
                break 'conn e;
            }
        }

        let mut probes = interval(settings.probe_period);
        probes.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                res = &mut reader_task => {
                    break 'conn match res {
                        Ok(e) => e,
                        Err(_) => ProtocolError::Closed,
                    };
                }
                msg = outbound.recv() => {
                    let msg = match msg {
                        Some(msg) => msg,
                        None => break 'conn ProtocolError::Closed,
                    };
                    if let Err(e) = writer.send(&msg).await {
                        if keep_unsent(&msg) {
                            unsent.push_back(msg);
                        }
                        break 'conn e;
                    }
                }
                _ = probes.tick() => {
                    if let Err(e) = writer.send(&Message::Probe).await {
                        break 'conn e;
                    }
                }
            }
        }
    };

    reader_task.abort();
    writer.shutdown().await;
    reason
}

async fn read_loop(
    mut reader: FrameReader<tokio::net::tcp::OwnedReadHalf>,
    liveness: Duration,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> ProtocolError {
    loop {
        match reader.next_within(liveness).await {
            Ok(Message::Probe) => {}
            Ok(msg) => {
                if events.send(LinkEvent::Message(msg)).is_err() {
                    return ProtocolError::Closed;
                }
            }
            Err(e) => return e,
        }
    }
}
