//! Capability interface to one short-range peer.
//!
//! A link moves small chunks, in order, to exactly one peer. It knows nothing
//! about messages. Sending is non-blocking and may be refused when the radio's
//! transmit queue is full; the link then reports [`LinkEvent::ReadyToSend`]
//! once it can take more. Incoming chunks and readiness arrive as events on a
//! channel owned by the session.

use bytes::Bytes;

/// Send side of a link to one peer
pub trait PeerLink: Send {
    /// Stable identifier of the peer on the other end
    fn peer_id(&self) -> &str;

    /// Largest chunk the link accepts in one send
    fn max_chunk_size(&self) -> usize;

    /// Offer one chunk. `false` means "not now, retry on the next
    /// [`LinkEvent::ReadyToSend`]" and is not an error.
    fn try_send(&mut self, chunk: &[u8]) -> bool;
}

/// Callbacks from the link, delivered in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link can accept more chunks
    ReadyToSend,
    /// One chunk arrived from the peer
    ChunkReceived(Bytes),
    /// The peer went away; any half-received message is dead
    Disconnected,
}

impl<L: PeerLink + ?Sized> PeerLink for Box<L> {
    fn peer_id(&self) -> &str {
        (**self).peer_id()
    }

    fn max_chunk_size(&self) -> usize {
        (**self).max_chunk_size()
    }

    fn try_send(&mut self, chunk: &[u8]) -> bool {
        (**self).try_send(chunk)
    }
}
