//! TCP event bus: newline-delimited JSON from many publishers to one subscriber.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use visionaid_models::EventRecord;

use crate::error::Result;

/// Well-known address the coordinator binds by default.
pub const DEFAULT_BUS_ADDR: &str = "127.0.0.1:5555";

/// Longest accepted line, newline included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// What the subscriber hands to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    /// One raw line from a publisher (not yet validated).
    Payload(String),
    /// A line that could not be decoded (not UTF-8, or too long). The
    /// connection stays open.
    Invalid(String),
    /// Accepting or reading from a publisher failed.
    TransportError(String),
}

/// The coordinator's single subscriber endpoint.
///
/// Publishers connect; each connection gets its own reader task, so lines
/// from one publisher reach the sink in send order. There is no ordering
/// across publishers.
pub struct BusSubscriber {
    listener: TcpListener,
}

impl BusSubscriber {
    /// Binds the subscriber endpoint.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "event bus bound");
        Ok(Self { listener })
    }

    /// The bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts publishers until `shutdown` flips to true or the sink closes.
    ///
    /// Accept failures are forwarded as [`BusMessage::TransportError`] and the
    /// loop keeps going.
    pub async fn run(self, sink: mpsc::Sender<BusMessage>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(peer = %peer, "publisher connected");
                        tokio::spawn(read_publisher(stream, peer, sink.clone(), shutdown.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, "bus accept failed");
                        if sink.send(BusMessage::TransportError(e.to_string())).await.is_err() {
                            break;
                        }
                        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("bus subscriber received shutdown signal");
                        break;
                    }
                }
            }
        }

        debug!("bus subscriber stopped");
    }
}

async fn read_publisher(
    stream: TcpStream,
    peer: SocketAddr,
    sink: mpsc::Sender<BusMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(stream);

    loop {
        tokio::select! {
            line = next_line(&mut reader) => {
                let message = match line {
                    Ok(Line::Text(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        trace!(peer = %peer, len = line.len(), "bus message");
                        BusMessage::Payload(line)
                    }
                    Ok(Line::Invalid(reason)) => {
                        warn!(peer = %peer, reason = %reason, "undecodable bus message");
                        BusMessage::Invalid(format!("{}: {}", peer, reason))
                    }
                    Ok(Line::Eof) => {
                        debug!(peer = %peer, "publisher disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(peer = %peer, error = %e, "bus read failed");
                        let _ = sink
                            .send(BusMessage::TransportError(format!("{}: {}", peer, e)))
                            .await;
                        break;
                    }
                };
                if sink.send(message).await.is_err() {
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

enum Line {
    Text(String),
    Invalid(String),
    Eof,
}

/// Reads one newline-terminated line of at most [`MAX_LINE_BYTES`].
///
/// An oversized line is skipped up to its newline and reported as invalid.
async fn next_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Line> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(Line::Eof);
    }

    if n == MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
        loop {
            buf.clear();
            let skipped = (&mut *reader)
                .take(MAX_LINE_BYTES as u64)
                .read_until(b'\n', &mut buf)
                .await?;
            if skipped == 0 || buf.last() == Some(&b'\n') {
                break;
            }
        }
        return Ok(Line::Invalid(format!(
            "line exceeds {} bytes",
            MAX_LINE_BYTES
        )));
    }

    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    match String::from_utf8(buf) {
        Ok(line) => Ok(Line::Text(line)),
        Err(e) => Ok(Line::Invalid(format!("not valid UTF-8: {}", e.utf8_error()))),
    }
}

/// A publisher connection, as used by perceptual agents.
pub struct BusPublisher {
    stream: TcpStream,
}

impl BusPublisher {
    /// Connects to the coordinator's subscriber endpoint.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    /// Sends one record. No acknowledgement is expected.
    pub async fn publish(&mut self, record: &EventRecord) -> Result<()> {
        let payload = record.to_json()?;
        self.publish_raw(&payload).await
    }

    /// Sends one raw line, unvalidated.
    pub async fn publish_raw(&mut self, payload: &str) -> Result<()> {
        let mut line = payload.replace('\n', " ");
        line.push('\n');
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
