//! Receiving half of a sync session: reassembles framed chunks into one
//! message.
//!
//! ```text
//!               SOM                    EOM (length matches)
//! AwaitingStart ────► Receiving ─────────────────────────► AwaitingStart
//!      ▲                │  ▲ DATA                              (Complete)
//!      │                └──┘
//!      └──── any violation: buffer dropped ────┘
//! ```
//!
//! Violations never leave the receiver stuck mid-message. A SOM arriving
//! mid-message drops the partial buffer and starts over with the new message,
//! since the sender has evidently restarted.

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use super::framing::Frame;
use crate::error::ProtocolError;

/// Receiver state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverState {
    /// Waiting for a SOM; everything else is ignored
    AwaitingStart,
    /// Accumulating DATA until EOM
    Receiving { expected: usize, received: usize },
}

/// What one chunk did to the receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Chunk was not part of any message and was dropped
    Ignored,
    /// A new message started
    Started { expected: usize },
    /// Payload appended
    Buffered { received: usize },
    /// A full message arrived
    Complete(Bytes),
    /// Framing was violated; receiver is back to awaiting a start unless the
    /// offending chunk itself started a new message
    Violation(ProtocolError),
}

/// Chunk reassembly state machine
#[derive(Debug)]
pub struct Receiver {
    max_message_bytes: usize,
    expected: Option<usize>,
    buffer: BytesMut,
}

impl Receiver {
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            max_message_bytes,
            expected: None,
            buffer: BytesMut::new(),
        }
    }

    pub fn state(&self) -> ReceiverState {
        match self.expected {
            None => ReceiverState::AwaitingStart,
            Some(expected) => ReceiverState::Receiving {
                expected,
                received: self.buffer.len(),
            },
        }
    }

    /// Drop any partial message (peer gone or session cancelled)
    pub fn reset(&mut self) {
        if let Some(expected) = self.expected.take() {
            debug!(
                expected,
                received = self.buffer.len(),
                "Discarding partial message"
            );
        }
        self.buffer.clear();
    }

    /// Feed one chunk from the link
    pub fn on_chunk(&mut self, chunk: &[u8]) -> ReceiveOutcome {
        let frame = match Frame::parse(chunk) {
            Ok(frame) => frame,
            Err(e) => return self.violation(e),
        };

        match (self.expected, frame) {
            (None, Frame::Start { len }) => self.start(len as usize),
            (None, Frame::End) => {
                warn!("End of message without a start");
                ReceiveOutcome::Violation(ProtocolError::UnexpectedEnd)
            }
            (None, Frame::Data(_)) => ReceiveOutcome::Ignored,

            (Some(_), Frame::Start { len }) => {
                let discarded = self.buffer.len();
                warn!(discarded, "Start of message while receiving, restarting");
                self.reset();
                match self.start(len as usize) {
                    ReceiveOutcome::Started { .. } => {
                        ReceiveOutcome::Violation(ProtocolError::RestartMidMessage { discarded })
                    }
                    other => other,
                }
            }
            (Some(expected), Frame::Data(payload)) => {
                if self.buffer.len() + payload.len() > expected {
                    return self.violation(ProtocolError::LengthOverrun { expected });
                }
                self.buffer.extend_from_slice(&payload);
                ReceiveOutcome::Buffered {
                    received: self.buffer.len(),
                }
            }
            (Some(expected), Frame::End) => {
                let received = self.buffer.len();
                if received != expected {
                    return self.violation(ProtocolError::LengthMismatch { expected, received });
                }
                self.expected = None;
                let message = self.buffer.split().freeze();
                debug!(bytes = message.len(), "Message complete");
                ReceiveOutcome::Complete(message)
            }
        }
    }

    fn start(&mut self, expected: usize) -> ReceiveOutcome {
        if expected > self.max_message_bytes {
            return self.violation(ProtocolError::MessageTooLarge {
                announced: expected,
                limit: self.max_message_bytes,
            });
        }
        self.buffer.clear();
        self.buffer.reserve(expected);
        self.expected = Some(expected);
        debug!(expected, "Message started");
        ReceiveOutcome::Started { expected }
    }

    fn violation(&mut self, error: ProtocolError) -> ReceiveOutcome {
        warn!(%error, "Framing violation, resetting receiver");
        self.reset();
        ReceiveOutcome::Violation(error)
    }
}
