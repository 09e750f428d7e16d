//! In-process loopback link.
//!
//! Connects two sessions inside one process the way a short-range radio
//! would: each direction has a small transmit queue, `try_send` is refused
//! while it is full, and the sender gets [`LinkEvent::ReadyToSend`] once the
//! queue drains below capacity. Used by the integration tests and by the
//! CLI's `simulate` command.
//!
//! ```text
//!  MemoryEnd a                                     MemoryEnd b
//!  ┌────────────┐  try_send   ┌───────────┐ ChunkReceived ┌────────────┐
//!  │ link ──────┼────────────►│ radio a→b │──────────────►│ events     │
//!  │ events ◄───┼─ReadyToSend─┤           │               │            │
//!  └────────────┘             └───────────┘               └────────────┘
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, trace};

use super::link::{LinkEvent, PeerLink};

/// Capacity of each end's event channel
const EVENT_CHANNEL_CAPACITY: usize = 1024;

struct Radio {
    queue: VecDeque<Bytes>,
    capacity: usize,
    /// A send was refused since the last drain
    refused: bool,
    closed: bool,
}

struct Channel {
    radio: Mutex<Radio>,
    notify: Notify,
}

impl Channel {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            radio: Mutex::new(Radio {
                queue: VecDeque::with_capacity(capacity),
                capacity,
                refused: false,
                closed: false,
            }),
            notify: Notify::new(),
        })
    }

    fn close(&self) {
        let mut radio = self.radio.lock();
        radio.closed = true;
        radio.queue.clear();
        drop(radio);
        self.notify.notify_one();
    }
}

/// Send side of one end of a loopback pair
pub struct MemoryLink {
    peer_id: String,
    max_chunk_size: usize,
    outgoing: Arc<Channel>,
}

impl PeerLink for MemoryLink {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }

    fn try_send(&mut self, chunk: &[u8]) -> bool {
        debug_assert!(chunk.len() <= self.max_chunk_size);
        let mut radio = self.outgoing.radio.lock();
        if radio.closed || radio.queue.len() >= radio.capacity {
            radio.refused = true;
            return false;
        }
        radio.queue.push_back(Bytes::copy_from_slice(chunk));
        drop(radio);
        self.outgoing.notify.notify_one();
        true
    }
}

/// Tears down both directions of a pair
#[derive(Clone)]
pub struct LinkControl {
    channels: [Arc<Channel>; 2],
}

impl LinkControl {
    /// Drop anything in flight and deliver `Disconnected` to both ends
    pub fn disconnect(&self) {
        debug!("Loopback link disconnected");
        for channel in &self.channels {
            channel.close();
        }
    }
}

/// One end of a loopback pair
pub struct MemoryEnd {
    pub link: MemoryLink,
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Create a connected pair of links.
///
/// `ids` names the two ends; each end's link reports the *other* end's name
/// as its peer id. Must be called inside a tokio runtime: one delivery task
/// per direction is spawned and ends after [`LinkControl::disconnect`].
pub fn pair(
    ids: (&str, &str),
    max_chunk_size: usize,
    queue_capacity: usize,
) -> (MemoryEnd, MemoryEnd, LinkControl) {
    let a_to_b = Channel::new(queue_capacity.max(1));
    let b_to_a = Channel::new(queue_capacity.max(1));
    let (a_events_tx, a_events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (b_events_tx, b_events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    tokio::spawn(deliver(a_to_b.clone(), b_events_tx.clone(), a_events_tx.clone()));
    tokio::spawn(deliver(b_to_a.clone(), a_events_tx, b_events_tx));

    let a = MemoryEnd {
        link: MemoryLink {
            peer_id: ids.1.to_string(),
            max_chunk_size,
            outgoing: a_to_b.clone(),
        },
        events: a_events,
    };
    let b = MemoryEnd {
        link: MemoryLink {
            peer_id: ids.0.to_string(),
            max_chunk_size,
            outgoing: b_to_a.clone(),
        },
        events: b_events,
    };

    (a, b, LinkControl { channels: [a_to_b, b_to_a] })
}

/// Move chunks from one direction's queue to the receiving end
async fn deliver(
    channel: Arc<Channel>,
    to_receiver: mpsc::Sender<LinkEvent>,
    to_sender: mpsc::Sender<LinkEvent>,
) {
    loop {
        let (next, ready, closed) = {
            let mut radio = channel.radio.lock();
            let next = radio.queue.pop_front();
            let ready = next.is_some() && radio.refused;
            if ready {
                radio.refused = false;
            }
            (next, ready, radio.closed)
        };

        match next {
            Some(chunk) => {
                trace!(bytes = chunk.len(), "Delivering chunk");
                if to_receiver.send(LinkEvent::ChunkReceived(chunk)).await.is_err() {
                    break;
                }
                if ready && to_sender.send(LinkEvent::ReadyToSend).await.is_err() {
                    break;
                }
            }
            None if closed => {
                let _ = to_receiver.send(LinkEvent::Disconnected).await;
                break;
            }
            None => channel.notify.notified().await,
        }
    }
}
