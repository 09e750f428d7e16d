//! Sending half of a sync session.
//!
//! ```text
//! Idle ─begin─► SendingSom ─► SendingChunks{cursor} ─► SendingEom ─► Idle
//! ```
//!
//! The sender only advances when the link accepts a chunk. A refusal leaves
//! everything as it was until the next pump, which the session triggers on
//! the link's readiness event. Too many consecutive refusals, or a
//! transmission outliving its deadline, abandons the transmission.

use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::framing::{self, Frame};
use super::link::PeerLink;
use crate::error::SyncError;

/// Sender state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    SendingSom,
    SendingChunks { cursor: usize },
    SendingEom,
}

/// Result of one pump
#[derive(Debug)]
pub enum PumpOutcome {
    /// Nothing to send
    Idle,
    /// The link refused a chunk; wait for readiness
    Blocked,
    /// EOM went out; the sender is idle again
    Completed { bytes: usize },
    /// The transmission was abandoned; the sender is idle again
    Aborted(SyncError),
}

struct Transmission {
    snapshot: Bytes,
    announced: u32,
    started: Instant,
    refused: u32,
}

/// Framing and flow control for outgoing messages
pub struct Sender {
    state: SenderState,
    current: Option<Transmission>,
    max_refused_sends: u32,
    timeout: Duration,
}

impl Sender {
    pub fn new(max_refused_sends: u32, timeout: Duration) -> Self {
        Self {
            state: SenderState::Idle,
            current: None,
            max_refused_sends,
            timeout,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == SenderState::Idle
    }

    /// (payload bytes sent, payload bytes total) of the running transmission
    pub fn progress(&self) -> Option<(usize, usize)> {
        let total = self.current.as_ref()?.snapshot.len();
        let sent = match self.state {
            SenderState::Idle | SenderState::SendingSom => 0,
            SenderState::SendingChunks { cursor } => cursor,
            SenderState::SendingEom => total,
        };
        Some((sent, total))
    }

    /// Start sending `snapshot`. Returns `Ok(false)` if a transmission is
    /// already running; the snapshot is then dropped.
    pub fn begin(&mut self, snapshot: Bytes, now: Instant) -> Result<bool, SyncError> {
        if !self.is_idle() {
            return Ok(false);
        }
        let announced = framing::announced_len(&snapshot)?;
        debug!(bytes = snapshot.len(), "Transmission queued");
        self.current = Some(Transmission {
            snapshot,
            announced,
            started: now,
            refused: 0,
        });
        self.state = SenderState::SendingSom;
        Ok(true)
    }

    /// Abandon the running transmission, if any
    pub fn cancel(&mut self) {
        if self.current.take().is_some() {
            debug!(state = ?self.state, "Transmission cancelled");
        }
        self.state = SenderState::Idle;
    }

    /// Abort the running transmission if it is past its deadline
    pub fn check_deadline(&mut self, now: Instant) -> Option<SyncError> {
        let started = self.current.as_ref()?.started;
        if now.saturating_duration_since(started) > self.timeout {
            warn!(timeout = ?self.timeout, "Transmission deadline passed");
            self.cancel();
            return Some(SyncError::TransmissionTimedOut(self.timeout));
        }
        None
    }

    /// Send as many chunks as the link will take
    pub fn pump<L: PeerLink + ?Sized>(&mut self, link: &mut L, now: Instant) -> PumpOutcome {
        if let Some(err) = self.check_deadline(now) {
            return PumpOutcome::Aborted(err);
        }
        let step = framing::payload_per_chunk(link.max_chunk_size());

        loop {
            let Some(tx) = self.current.as_mut() else {
                return PumpOutcome::Idle;
            };

            let (chunk, next) = match self.state {
                SenderState::Idle => return PumpOutcome::Idle,
                SenderState::SendingSom => {
                    let next = if tx.snapshot.is_empty() {
                        SenderState::SendingEom
                    } else {
                        SenderState::SendingChunks { cursor: 0 }
                    };
                    (Frame::Start { len: tx.announced }.encode(), next)
                }
                SenderState::SendingChunks { cursor } => {
                    let end = (cursor + step).min(tx.snapshot.len());
                    let next = if end >= tx.snapshot.len() {
                        SenderState::SendingEom
                    } else {
                        SenderState::SendingChunks { cursor: end }
                    };
                    (Frame::Data(tx.snapshot.slice(cursor..end)).encode(), next)
                }
                SenderState::SendingEom => (Frame::End.encode(), SenderState::Idle),
            };

            if !link.try_send(&chunk) {
                tx.refused += 1;
                trace!(refused = tx.refused, state = ?self.state, "Link not ready");
                if tx.refused > self.max_refused_sends {
                    let refused = tx.refused;
                    warn!(peer = link.peer_id(), refused, "Giving up on transmission");
                    self.cancel();
                    return PumpOutcome::Aborted(SyncError::RetriesExhausted(refused));
                }
                return PumpOutcome::Blocked;
            }

            tx.refused = 0;
            self.state = next;

            if next == SenderState::Idle {
                let bytes = tx.snapshot.len();
                self.current = None;
                info!(peer = link.peer_id(), bytes, "Transmission complete");
                return PumpOutcome::Completed { bytes };
            }
        }
    }
}
