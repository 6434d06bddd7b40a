#![allow(dead_code)]

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Mutex;

use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{sleep, Duration, Instant};

use elevdispatch::backup::Role;
use elevdispatch::config::DispatcherSettings;
use elevdispatch::display::StatusDisplay;
use elevdispatch::protocol::codec::{FrameReader, FrameWriter, ProtocolError};
use elevdispatch::protocol::{Message, Order};

pub fn fast_settings(log_path: &Path) -> DispatcherSettings {
    DispatcherSettings {
        bind_ip: "127.0.0.1".to_string(),
        elevator_port: 0,
        log_path: log_path.to_path_buf(),
        probe_period: Duration::from_millis(50),
        liveness_timeout: Duration::from_secs(5),
        dispatch_retry: Duration::from_millis(100),
        log_retry_delay: Duration::from_millis(5),
        heartbeat_period: Duration::from_millis(10),
        heartbeat_timeout: Duration::from_millis(300),
        backup_connect_timeout: Duration::from_secs(2),
        ..DispatcherSettings::default()
    }
}

/// Keeps what the dispatcher wanted to show.
#[derive(Default)]
pub struct RecordingDisplay {
    pub events: Mutex<Vec<String>>,
    pub modes: Mutex<Vec<Role>>,
    pub counts: Mutex<Vec<usize>>,
}

impl RecordingDisplay {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn modes(&self) -> Vec<Role> {
        self.modes.lock().unwrap().clone()
    }
}

impl StatusDisplay for RecordingDisplay {
    fn event(&self, text: &str) {
        self.events.lock().unwrap().push(text.to_string());
    }

    fn elevator_count(&self, count: usize) {
        self.counts.lock().unwrap().push(count);
    }

    fn mode(&self, role: Role) {
        self.modes.lock().unwrap().push(role);
    }

    fn address(&self, _ip: IpAddr, _port: u16) {}
}

/// A hand-driven elevator on the wire.
pub struct FakeCar {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl FakeCar {
    pub async fn connect(addr: SocketAddr) -> FakeCar {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (r, w) = stream.into_split();
        FakeCar { reader: FrameReader::new(r, 5), writer: FrameWriter::new(w, 5) }
    }

    pub async fn send(&mut self, msg: Message) {
        self.writer.send(&msg).await.unwrap();
    }

    /// Next message that is not a probe, or `None` if nothing else arrives in time.
    pub async fn next(&mut self, limit: Duration) -> Option<Message> {
        let deadline = Instant::now() + limit;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.reader.next_within(left).await {
                Ok(Message::Probe) => continue,
                Ok(msg) => return Some(msg),
                Err(ProtocolError::Timeout(_)) => return None,
                Err(e) => panic!("fake car lost its connection: {}", e),
            }
        }
    }

    /// Waits for an assignment, skipping lamp notifies and served messages.
    pub async fn assignment(&mut self, limit: Duration) -> Option<Order> {
        let deadline = Instant::now() + limit;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.next(left).await? {
                Message::ToServe(order) => return Some(order),
                _ => continue,
            }
        }
    }

    /// Waits for one specific message, skipping everything else.
    pub async fn wait_for(&mut self, want: Message, limit: Duration) -> bool {
        let deadline = Instant::now() + limit;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.next(left).await {
                Some(msg) if msg == want => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    }
}

/// Polls `cond` until it holds, failing the test after `limit`.
pub async fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + limit;
    while !cond() {
        if Instant::now() > deadline {
            panic!("condition not met within {:?}", limit);
        }
        sleep(Duration::from_millis(10)).await;
    }
}
