//! ## Durable order log
//!
//! An unversioned sequence of bincode-encoded [Order] records in one file. The
//! dispatcher keeps every outstanding hall call here, the elevator keeps its car calls.
//!
//! Writes are required side effects: a failed write is retried after a short
//! backoff until it succeeds. The calls block the current thread while retrying,
//! so async callers run them through `tokio::task::spawn_blocking` or [run_blocking].
//!
//! Reading is forgiving. A missing file is an empty log, and a torn record at the
//! end (a crash in the middle of a write) is dropped.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};

use crate::config;
use crate::print;
use crate::protocol::Order;

/// Log writes that keep failing are reported once per this many attempts.
const WARN_EVERY: u32 = 100;

/// Runs a blocking log call from code that may sit on a tokio worker.
///
/// On a multi-threaded runtime the worker hands its other tasks to a fresh thread
/// first. Outside a runtime, or on a current-thread one, `write` simply runs.
pub fn run_blocking<T>(write: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(write)
        }
        _ => write(),
    }
}

#[derive(Debug, Clone)]
pub struct OrderLog {
    path: PathBuf,
    retry_delay: Duration,
}

impl OrderLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        OrderLog { path: path.into(), retry_delay: config::LOG_RETRY_DELAY }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `orders` to the end of the log.
    pub fn append(&self, orders: &[Order]) {
        if orders.is_empty() {
            return;
        }
        let bytes = encode_all(orders);
        self.retry("append", || {
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            file.write_all(&bytes)?;
            file.flush()
        });
    }

    /// Replaces the whole log with `orders`.
    pub fn rewrite(&self, orders: &[Order]) {
        let bytes = encode_all(orders);
        self.retry("rewrite", || {
            let mut file = File::create(&self.path)?;
            file.write_all(&bytes)?;
            file.flush()
        });
    }

    /// Reads every record in the log, in the order they were written.
    ///
    /// Duplicates are kept; the log is an over-approximation.
    pub fn read_all(&self) -> Vec<Order> {
        let bytes = self.retry("read", || match fs::read(&self.path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        });
        decode_all(&bytes)
    }

    /// Deletes the log. Used when a dispatcher starts fresh instead of recovering.
    pub fn remove(&self) {
        self.retry("remove", || match fs::remove_file(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        });
    }

    fn retry<T>(&self, what: &str, mut op: impl FnMut() -> io::Result<T>) -> T {
        let mut attempts: u32 = 0;
        loop {
            match op() {
                Ok(value) => return value,
                Err(e) => {
                    if attempts % WARN_EVERY == 0 {
                        print::warn(format!(
                            "Order log {} on {} failed, retrying: {}",
                            what,
                            self.path.display(),
                            e
                        ));
                    }
                    attempts = attempts.wrapping_add(1);
                    thread::sleep(self.retry_delay);
                }
            }
        }
    }
}

fn encode_all(orders: &[Order]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for order in orders {
        // An Order is two plain fields, serializing into a Vec cannot fail
        if let Err(e) = bincode::serialize_into(&mut bytes, order) {
            print::cosmic_err(format!("order_log::encode_all {}: {}", order, e));
        }
    }
    bytes
}

fn decode_all(bytes: &[u8]) -> Vec<Order> {
    let mut cursor = Cursor::new(bytes);
    let mut orders = Vec::new();
    while (cursor.position() as usize) < bytes.len() {
        match bincode::deserialize_from::<_, Order>(cursor.by_ref()) {
            Ok(order) => orders.push(order),
            Err(e) => {
                print::warn(format!(
                    "Order log has {} unreadable trailing bytes, ignoring them: {}",
                    bytes.len() - cursor.position() as usize,
                    e
                ));
                break;
            }
        }
    }
    orders
}
