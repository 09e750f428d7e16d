//! Opportunistic peer-to-peer sync over a small-chunk link
//!
//! ## Overview
//!
//! Two devices that come into radio range exchange their whole store. Each
//! side sends one framed snapshot of its store file; each side merges what it
//! receives with last-writer-wins reconciliation. There is no request or
//! acknowledgement: a snapshot is pushed, and the peer's snapshot is merged
//! whenever it fully arrives.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  SyncSession (one per connected peer)                           │
//! │  ├── Sender    SOM ─► DATA... ─► EOM, paced by link readiness   │
//! │  ├── Receiver  reassembles one message at a time                │
//! │  └── RecordStore::merge on every completed message              │
//! │                                                                 │
//! │  PeerLink (capability: peer_id, max_chunk_size, try_send)       │
//! │  LinkEvent (ReadyToSend, ChunkReceived, Disconnected)           │
//! │                                                                 │
//! │  DiscoveryLoop                                                  │
//! │  ├── spawns a session per discovered peer                       │
//! │  └── mirrors the store to a RemoteBackend when online           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let (a, b, _control) = memory::pair(("phone-a", "phone-b"), 20, 8);
//! let session = SyncSession::new(a.link, store, &SessionConfig::default())?;
//! let mut events = session.subscribe();
//! tokio::spawn(session.run(a.events, cancel.child_token()));
//!
//! while let Ok(event) = events.recv().await {
//!     if let SyncEvent::Merged { report, .. } = event {
//!         println!("{} new records", report.added);
//!     }
//! }
//! ```

pub mod discovery;
pub mod events;
pub mod framing;
pub mod link;
pub mod memory;
pub mod receiver;
pub mod sender;
pub mod session;

pub use discovery::{
    ChannelDiscovery, DiscoveredPeer, DiscoveryLoop, NoopBackend, Offline, PeerDiscovery,
    Reachability, RemoteBackend,
};
pub use events::{SessionStatus, SyncEvent};
pub use framing::{chunk_message, Frame, DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE};
pub use link::{LinkEvent, PeerLink};
pub use memory::{LinkControl, MemoryEnd, MemoryLink};
pub use receiver::{ReceiveOutcome, Receiver, ReceiverState};
pub use sender::{PumpOutcome, Sender, SenderState};
pub use session::SyncSession;
