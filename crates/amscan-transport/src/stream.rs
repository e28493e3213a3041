//! Stream seams between the scan session and the wire
//!
//! A [`Transport`] opens one bidirectional scan call and hands back a
//! [`ScanStream`]: an outbound half the session writes to and an inbound
//! stream of server messages.

use std::pin::Pin;
use std::time::Duration;

use amscan_core::{Error, Result};
use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc::{self, OwnedPermit};
use tokio::sync::oneshot;
use tonic::{Code, Status};
use tracing::debug;

use crate::proto::{C2S, S2C};

/// Server messages as delivered by the transport
pub type InboundStream = Pin<Box<dyn Stream<Item = std::result::Result<S2C, Status>> + Send>>;

/// Outbound half of a scan call, as seen by the session
#[async_trait]
pub trait Outbound: Send {
    /// Wait up to `max_wait` for room to send one message.
    ///
    /// Returns true when the next `send` will not block.
    async fn wait_ready(&mut self, max_wait: Duration) -> bool;

    /// Queue one message
    async fn send(&mut self, message: C2S) -> Result<()>;

    /// Signal normal end of the client stream
    fn half_close(&mut self);

    /// Tear the call down with an error status
    fn abort(&mut self, code: Code, message: &str);
}

/// Opens scan calls
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open one bidirectional scan call bounded by `deadline`
    async fn open(&self, deadline: Duration) -> Result<ScanStream>;
}

/// Both halves of an open scan call
pub struct ScanStream {
    pub outbound: ChannelOutbound,
    pub inbound: InboundStream,
}

/// The far side of a [`ChannelOutbound`]: the queued messages and the abort signal
pub struct OutboundPeer {
    pub messages: mpsc::Receiver<C2S>,
    pub aborted: oneshot::Receiver<Status>,
}

/// [`Outbound`] over a bounded channel.
///
/// Readiness means a channel slot is reserved. Dropping it without
/// `half_close` aborts the call.
pub struct ChannelOutbound {
    tx: Option<mpsc::Sender<C2S>>,
    permit: Option<OwnedPermit<C2S>>,
    abort_tx: Option<oneshot::Sender<Status>>,
}

impl ChannelOutbound {
    /// Create an outbound half holding at most `capacity` unsent messages
    pub fn channel(capacity: usize) -> (Self, OutboundPeer) {
        let (tx, messages) = mpsc::channel(capacity.max(1));
        let (abort_tx, aborted) = oneshot::channel();
        let outbound = Self {
            tx: Some(tx),
            permit: None,
            abort_tx: Some(abort_tx),
        };
        (outbound, OutboundPeer { messages, aborted })
    }

    /// True once the stream was half-closed or aborted
    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

#[async_trait]
impl Outbound for ChannelOutbound {
    async fn wait_ready(&mut self, max_wait: Duration) -> bool {
        if self.permit.is_some() {
            return true;
        }
        let Some(tx) = &self.tx else {
            return true;
        };

        match tokio::time::timeout(max_wait, tx.clone().reserve_owned()).await {
            Ok(Ok(permit)) => {
                self.permit = Some(permit);
                true
            }
            // Receiver gone; the send fails fast and the inbound side reports why
            Ok(Err(_)) => true,
            Err(_) => false,
        }
    }

    async fn send(&mut self, message: C2S) -> Result<()> {
        if let Some(permit) = self.permit.take() {
            permit.send(message);
            return Ok(());
        }

        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| Error::Unexpected("send on a closed scan stream".into()))?;
        tx.send(message)
            .await
            .map_err(|_| Error::Unexpected("scan stream receiver dropped".into()))
    }

    fn half_close(&mut self) {
        self.permit = None;
        self.tx = None;
        self.abort_tx = None;
    }

    fn abort(&mut self, code: Code, message: &str) {
        self.permit = None;
        self.tx = None;
        if let Some(abort_tx) = self.abort_tx.take() {
            debug!("Aborting scan stream: {:?} {}", code, message);
            let _ = abort_tx.send(Status::new(code, message));
        }
    }
}

impl Drop for ChannelOutbound {
    fn drop(&mut self) {
        if self.abort_tx.is_some() {
            self.abort(Code::Cancelled, "scan session dropped");
        }
    }
}
