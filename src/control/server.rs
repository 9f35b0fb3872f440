//! Sequential TCP control server.
//!
//! One connection at a time: accept, read one line, dispatch, reply with
//! `OK`/`ERROR`, close.  Other clients wait in the listen backlog.
//!
//! Shutdown is cooperative: accept waits at most `accept_poll` before the
//! `done` flag is checked again, and the line read has its own timeout, so
//! the loop never parks indefinitely.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::dispatch::Dispatcher;
use super::request::Outcome;
use crate::config::ControlConfig;

/// How long a finished connection keeps reading leftover input.
const LINGER: Duration = Duration::from_millis(50);

/// Result of waiting for a request line.
#[derive(Debug)]
enum LineRead {
    /// A newline-terminated line, or the bytes sent before the peer closed.
    Line(String),
    /// Peer closed without sending anything.
    Closed,
    TooLong,
    TimedOut,
    Failed(io::Error),
}

pub struct ControlServer {
    dispatcher: Dispatcher,
    accept_poll: Duration,
    read_timeout: Option<Duration>,
    max_line_bytes: usize,
}

impl ControlServer {
    pub fn new(dispatcher: Dispatcher, config: &ControlConfig) -> Self {
        Self {
            dispatcher,
            accept_poll: config.accept_poll(),
            read_timeout: config.read_timeout(),
            max_line_bytes: config.max_line_bytes.max(1),
        }
    }

    /// Serve connections until `done` is set.
    pub async fn serve_forever(&self, listener: TcpListener, done: Arc<AtomicBool>) {
        match listener.local_addr() {
            Ok(addr) => log::info!("control: listening on {addr}"),
            Err(e) => log::warn!("control: listening (address unknown: {e})"),
        }

        while !done.load(Ordering::Acquire) {
            let accepted = match tokio::time::timeout(self.accept_poll, listener.accept()).await {
                Err(_elapsed) => continue,
                Ok(accepted) => accepted,
            };
            match accepted {
                Ok((stream, peer)) => self.serve_connection(stream, peer).await,
                Err(e) => {
                    // Usually EMFILE or a reset in the backlog; back off briefly.
                    log::warn!("control: accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
        log::info!("control: stopped");
    }

    /// Handle exactly one request on `stream`.  The stream is dropped (and
    /// the socket closed) on every path.
    pub async fn serve_connection(&self, mut stream: TcpStream, peer: SocketAddr) {
        let outcome = match self.read_line(&mut stream).await {
            LineRead::Line(line) => self.dispatcher.handle_line(&line),
            LineRead::Closed => {
                log::debug!("control: {peer} closed without sending a request");
                Outcome::Error
            }
            LineRead::TooLong => {
                log::warn!("control: {peer} sent more than {} bytes", self.max_line_bytes);
                Outcome::Error
            }
            LineRead::TimedOut => {
                log::warn!("control: {peer} timed out");
                Outcome::Error
            }
            LineRead::Failed(e) => {
                log::warn!("control: read from {peer} failed: {e}");
                Outcome::Error
            }
        };

        if let Err(e) = stream.write_all(outcome.as_line().as_bytes()).await {
            log::debug!("control: reply to {peer} failed: {e}");
        }
        let _ = stream.shutdown().await;

        // Closing with unread input makes the kernel send RST, which can
        // destroy the reply before the client reads it.
        let _ = tokio::time::timeout(LINGER, discard_input(&mut stream)).await;
    }

    async fn read_line(&self, stream: &mut TcpStream) -> LineRead {
        let limit = self.max_line_bytes as u64 + 1;
        let mut reader = BufReader::new(stream).take(limit);
        let mut buf = Vec::new();

        let read = reader.read_until(b'\n', &mut buf);
        let result = match self.read_timeout {
            Some(t) => match tokio::time::timeout(t, read).await {
                Ok(r) => r,
                Err(_) => return LineRead::TimedOut,
            },
            None => read.await,
        };

        // A final line without a newline still counts once the peer closes.
        match result {
            Err(e) => LineRead::Failed(e),
            Ok(0) => LineRead::Closed,
            Ok(n) if n as u64 >= limit && buf.last() != Some(&b'\n') => LineRead::TooLong,
            Ok(_) => LineRead::Line(String::from_utf8_lossy(&buf).into_owned()),
        }
    }
}

async fn discard_input(stream: &mut TcpStream) {
    let mut scratch = [0u8; 1024];
    while let Ok(n) = stream.read(&mut scratch).await {
        if n == 0 {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
