//! Scan session protocol engine
//!
//! The server pulls content: it sends RETR commands naming byte ranges, the
//! client answers each range with a RUN chunk, and the server ends the
//! conversation with QUIT carrying the result JSON. A session moves through
//! `InitSent -> Running -> Done` and reports exactly one outcome through its
//! [`Completion`].

use std::sync::Arc;
use std::time::Duration;

use amscan_core::{ContentSource, Error, Result};
use futures::{Stream, StreamExt};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tonic::{Code, Status};
use tracing::{debug, info, warn};

use crate::proto::{ByteRange, Command, Stage, C2S, S2C};
use crate::stream::Outbound;

/// Interval between outbound readiness checks
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// INIT was sent, no RETR seen yet
    InitSent,
    /// Serving RETR commands
    Running,
    /// Outcome delivered; further input is ignored
    Done,
}

/// Transfer counters for one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Ranges served
    pub fetch_count: u64,
    /// Bytes read from the content source
    pub fetch_bytes: u64,
}

/// Receiving end of a session's single outcome
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<String>>,
}

impl Completion {
    /// Wait until the session is done and return its result JSON or error
    pub async fn wait_for_completion(self) -> Result<String> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(Error::Unexpected("scan session ended without an outcome".into())))
    }
}

/// Protocol engine for one scan.
///
/// Owns the outbound half of the call and reads requested ranges from the
/// content source. Handlers become no-ops once the session is done.
pub struct ScanSession<O: Outbound> {
    source: Arc<dyn ContentSource>,
    outbound: O,
    timeout: Duration,
    started: Instant,
    phase: Phase,
    stats: SessionStats,
    done_tx: Option<oneshot::Sender<Result<String>>>,
}

impl<O: Outbound> ScanSession<O> {
    /// Bind a session to its content and outbound stream.
    ///
    /// `started` is when INIT was sent; `timeout` is measured from there.
    pub fn new(
        source: Arc<dyn ContentSource>,
        outbound: O,
        timeout: Duration,
        started: Instant,
    ) -> (Self, Completion) {
        let (done_tx, rx) = oneshot::channel();
        let session = Self {
            source,
            outbound,
            timeout,
            started,
            phase: Phase::InitSent,
            stats: SessionStats::default(),
            done_tx: Some(done_tx),
        };
        (session, Completion { rx })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Consume server messages until the session is done
    pub async fn drive<S>(mut self, mut inbound: S) -> SessionStats
    where
        S: Stream<Item = std::result::Result<S2C, Status>> + Unpin,
    {
        while !self.is_done() {
            match inbound.next().await {
                Some(Ok(message)) => self.handle_message(message).await,
                Some(Err(status)) => self.handle_error(status),
                None => self.handle_closed(),
            }
        }
        self.stats
    }

    /// React to one server message
    pub async fn handle_message(&mut self, message: S2C) {
        if self.is_done() {
            debug!("Ignoring message for finished session {}", self.source.identifier());
            return;
        }

        match Command::try_from(message.cmd) {
            Ok(Command::Retr) => self.handle_retr(&message).await,
            Ok(Command::Quit) => self.handle_quit(message),
            Err(_) => {
                warn!("Unknown command {} from scanner", message.cmd);
                self.violation(
                    Code::InvalidArgument,
                    format!("unknown command {}", message.cmd),
                );
            }
        }
    }

    /// React to the call failing with a status
    pub fn handle_error(&mut self, status: Status) {
        if self.is_done() {
            return;
        }

        warn!(
            "Scan of {} failed: {:?} {}",
            self.source.identifier(),
            status.code(),
            status.message()
        );
        let error = match status.code() {
            Code::Unauthenticated => Error::AuthFailed,
            code => Error::Transport {
                code: code as i32,
                description: status.message().to_string(),
            },
        };
        self.finish(Err(error));
    }

    /// React to the server ending the call without QUIT
    pub fn handle_closed(&mut self) {
        if self.is_done() {
            return;
        }
        warn!("Scan stream for {} closed before QUIT", self.source.identifier());
        self.finish(Err(Error::Protocol("stream closed before QUIT".into())));
    }

    async fn handle_retr(&mut self, message: &S2C) {
        if message.stage != Stage::Run as i32 {
            warn!("RETR received in stage {}", message.stage);
            self.outbound.abort(Code::Aborted, "RETR outside RUN stage");
            self.finish(Err(Error::Protocol(format!(
                "RETR received in stage {}",
                message.stage
            ))));
            return;
        }

        let ranges = match message.ranges() {
            Ok(ranges) => ranges,
            Err(reason) => {
                warn!("Malformed RETR: {}", reason);
                self.violation(Code::InvalidArgument, reason);
                return;
            }
        };

        self.phase = Phase::Running;
        for range in ranges {
            if !self.serve_range(range).await {
                return;
            }
        }
    }

    /// Read and send one range. Returns false when no further ranges should be served.
    async fn serve_range(&mut self, range: ByteRange) -> bool {
        let capacity =
            amscan_core::source::readable_len(self.source.length(), range.start(), range.len());
        let mut buf = vec![0u8; capacity];

        let read = match self.source.read_range(range.start(), &mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Reading {} failed: {}", self.source.identifier(), e);
                self.outbound.abort(Code::Aborted, "content read failed");
                self.finish(Err(e));
                return false;
            }
        };
        buf.truncate(read);

        self.stats.fetch_count += 1;
        self.stats.fetch_bytes += read as u64;
        debug!(
            "RETR offset={} length={} read={}",
            range.offset, range.length, read
        );

        if !self.await_ready().await {
            return false;
        }

        if let Err(e) = self.outbound.send(C2S::chunk(range.offset, buf)).await {
            // Stop serving; the inbound side carries the call's final status
            warn!("Sending chunk at {} failed: {}", range.offset, e);
            return false;
        }
        true
    }

    /// Wait for outbound room, enforcing the session timeout between checks
    async fn await_ready(&mut self) -> bool {
        loop {
            if self.outbound.wait_ready(READY_POLL_INTERVAL).await {
                return true;
            }

            let elapsed = self.started.elapsed();
            if elapsed > self.timeout {
                warn!(
                    "Scan of {} exceeded {:?} waiting for the stream",
                    self.source.identifier(),
                    self.timeout
                );
                self.outbound
                    .abort(Code::DeadlineExceeded, "scan deadline exceeded");
                self.finish(Err(Error::DeadlineExceeded { elapsed }));
                return false;
            }
        }
    }

    fn handle_quit(&mut self, message: S2C) {
        info!(
            "Scan of {} done: {} fetches, {} bytes",
            self.source.identifier(),
            self.stats.fetch_count,
            self.stats.fetch_bytes
        );
        self.outbound.half_close();
        self.finish(Ok(message.result));
    }

    fn violation(&mut self, code: Code, reason: String) {
        self.outbound.abort(code, &reason);
        self.finish(Err(Error::Protocol(reason)));
    }

    fn finish(&mut self, outcome: Result<String>) {
        self.phase = Phase::Done;
        if let Some(done_tx) = self.done_tx.take() {
            let _ = done_tx.send(outcome);
        }
    }
}
