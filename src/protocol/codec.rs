//! ## Wire codec
//!
//! Sends on format: `(length of payload) as u16` big-endian, then the bincode payload.
//!
//! A frame whose payload does not decode is skipped. Only when `budget` frames in a
//! row fail does the reader give up with [ProtocolError::Decode]; one good frame
//! resets the count. Encoding is retried the same number of times.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Duration};

use super::Message;
use crate::{config, print};

/// Fatal conditions on one connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed by peer")]
    Closed,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("payload of {0} bytes does not fit in one frame")]
    FrameTooLarge(usize),

    #[error("could not encode message after {attempts} attempts: {source}")]
    Encode {
        attempts: u32,
        #[source]
        source: bincode::Error,
    },

    #[error("{attempts} malformed frames in a row, last: {source}")]
    Decode {
        attempts: u32,
        #[source]
        source: bincode::Error,
    },

    #[error("no frame received within {0:?}")]
    Timeout(Duration),
}

/// Serializes `msg` into one length-prefixed frame.
///
/// ## Parameters
/// - `budget`: number of attempts before the error is surfaced (at least one attempt is made)
pub fn encode(msg: &Message, budget: u32) -> Result<Vec<u8>, ProtocolError> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match bincode::serialize(msg) {
            Ok(payload) => {
                if payload.len() > config::MAX_FRAME_LEN {
                    return Err(ProtocolError::FrameTooLarge(payload.len()));
                }
                let mut frame = Vec::with_capacity(2 + payload.len());
                frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                frame.extend_from_slice(&payload);
                return Ok(frame);
            }
            Err(source) if attempts >= budget.max(1) => {
                return Err(ProtocolError::Encode { attempts, source });
            }
            Err(e) => {
                print::warn(format!("Encoding {:?} failed (attempt {}): {}", msg, attempts, e));
            }
        }
    }
}

/// Write half of a framed connection.
pub struct FrameWriter<W> {
    inner: W,
    budget: u32,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, budget: u32) -> Self {
        FrameWriter { inner, budget }
    }

    /// Encodes and writes one message, then flushes.
    pub async fn send(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let frame = encode(msg, self.budget)?;
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Closes the write direction. Errors are ignored, the peer may already be gone.
    pub async fn shutdown(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

/// Read half of a framed connection.
pub struct FrameReader<R> {
    inner: R,
    budget: u32,
    malformed: u32,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, budget: u32) -> Self {
        FrameReader { inner, budget: budget.max(1), malformed: 0 }
    }

    /// Reads until one frame decodes, skipping malformed frames within the budget.
    pub async fn next_message(&mut self) -> Result<Message, ProtocolError> {
        loop {
            let payload = self.read_frame().await?;
            match bincode::deserialize::<Message>(&payload) {
                Ok(msg) => {
                    self.malformed = 0;
                    return Ok(msg);
                }
                Err(source) => {
                    self.malformed += 1;
                    if self.malformed >= self.budget {
                        return Err(ProtocolError::Decode { attempts: self.malformed, source });
                    }
                    print::warn(format!(
                        "Skipping malformed frame ({}/{}): {}",
                        self.malformed, self.budget, source
                    ));
                }
            }
        }
    }

    /// Like [FrameReader::next_message], but fails with [ProtocolError::Timeout] if nothing
    /// decodes within `limit`. Used as the liveness watchdog: the peer sends probes, so
    /// silence means the connection is half-open.
    pub async fn next_within(&mut self, limit: Duration) -> Result<Message, ProtocolError> {
        match timeout(limit, self.next_message()).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout(limit)),
        }
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let mut len_buf = [0u8; 2];
        self.inner.read_exact(&mut len_buf).await.map_err(closed_on_eof)?;
        let len = u16::from_be_bytes(len_buf) as usize;

        let mut buffer = vec![0u8; len];
        self.inner.read_exact(&mut buffer).await.map_err(closed_on_eof)?;
        Ok(buffer)
    }
}

fn closed_on_eof(e: io::Error) -> ProtocolError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ProtocolError::Closed
    } else {
        ProtocolError::Io(e)
    }
}
