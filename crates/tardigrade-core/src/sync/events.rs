//! Session status and the events sessions broadcast

use std::fmt;

use crate::error::ProtocolError;
use crate::store::MergeReport;

/// What a session is doing right now
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Neither sending nor mid-way through receiving
    #[default]
    Idle,
    /// Sending a snapshot
    Sending { sent: usize, total: usize },
    /// Reassembling a peer's message
    Receiving { received: usize, expected: usize },
    /// Peer gone or session cancelled
    Closed,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "Idle"),
            SessionStatus::Sending { sent, total } => write!(f, "Sending ({}/{} bytes)", sent, total),
            SessionStatus::Receiving { received, expected } => {
                write!(f, "Receiving ({}/{} bytes)", received, expected)
            }
            SessionStatus::Closed => write!(f, "Closed"),
        }
    }
}

/// Events emitted by sync sessions
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A store snapshot started going out
    TransmissionStarted { peer_id: String, bytes: usize },
    /// EOM was accepted by the link
    TransmissionCompleted { peer_id: String, bytes: usize },
    /// A transmission was abandoned (deadline, retries, disconnect)
    TransmissionAborted { peer_id: String, reason: String },
    /// A full message was reassembled
    MessageReceived { peer_id: String, bytes: usize },
    /// A received message was merged into the store
    Merged { peer_id: String, report: MergeReport },
    /// A received message could not be merged; the store is unchanged
    MergeFailed { peer_id: String, message: String },
    /// The peer broke framing; the partial message was dropped
    ProtocolViolation { peer_id: String, error: ProtocolError },
    /// The link to the peer went away
    PeerDisconnected { peer_id: String },
}

impl SyncEvent {
    /// Peer this event concerns
    pub fn peer_id(&self) -> &str {
        match self {
            SyncEvent::TransmissionStarted { peer_id, .. }
            | SyncEvent::TransmissionCompleted { peer_id, .. }
            | SyncEvent::TransmissionAborted { peer_id, .. }
            | SyncEvent::MessageReceived { peer_id, .. }
            | SyncEvent::Merged { peer_id, .. }
            | SyncEvent::MergeFailed { peer_id, .. }
            | SyncEvent::ProtocolViolation { peer_id, .. }
            | SyncEvent::PeerDisconnected { peer_id } => peer_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(SessionStatus::Idle.to_string(), "Idle");
        assert_eq!(
            SessionStatus::Sending { sent: 19, total: 40 }.to_string(),
            "Sending (19/40 bytes)"
        );
    }

    #[test]
    fn test_event_peer_id() {
        let event = SyncEvent::PeerDisconnected {
            peer_id: "phone-b".to_string(),
        };
        assert_eq!(event.peer_id(), "phone-b");
    }
}
