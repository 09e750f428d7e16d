//! Long-running loop that turns discovered peers into sync sessions and
//! pushes the store to a backend whenever the network is reachable.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  DiscoveryLoop                                                  │
//! │  ├── PeerDiscovery   ── new peer ──► spawn SyncSession::run     │
//! │  │                                   (one task per peer id)     │
//! │  ├── Reachability    ── polled every connectivity interval      │
//! │  └── RemoteBackend   ── upload snapshot, download + merge       │
//! │                                                                 │
//! │  CancellationToken   ── parent of every session's token         │
//! │  event_tx            ── shared by all sessions                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The concrete radio stack and the network backend live outside this
//! crate; they plug in through the three traits below.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::SyncEvent;
use super::link::{LinkEvent, PeerLink};
use super::session::SyncSession;
use crate::config::DiscoveryConfig;
use crate::error::{SyncError, SyncResult};
use crate::store::{self, RecordStore};

/// Default capacity for the shared event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A newly connected peer: its link and the link's event stream
pub struct DiscoveredPeer<L> {
    pub link: L,
    pub events: mpsc::Receiver<LinkEvent>,
}

/// Source of connected peers
#[async_trait]
pub trait PeerDiscovery: Send {
    type Link: PeerLink + 'static;

    /// Wait for the next peer; `None` once discovery has stopped for good
    async fn next_peer(&mut self) -> Option<DiscoveredPeer<Self::Link>>;
}

/// Network reachability probe
#[async_trait]
pub trait Reachability: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Remote backend the store is mirrored to when online
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Push a snapshot of the local store
    async fn upload(&self, snapshot: Bytes) -> Result<(), SyncError>;

    /// Fetch the backend's table, if it has one to offer
    async fn download(&self) -> Result<Option<Bytes>, SyncError>;
}

/// Reachability that never reports a connection
#[derive(Debug, Clone, Copy, Default)]
pub struct Offline;

#[async_trait]
impl Reachability for Offline {
    async fn is_online(&self) -> bool {
        false
    }
}

/// Backend that accepts uploads and never has anything to download
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackend;

#[async_trait]
impl RemoteBackend for NoopBackend {
    async fn upload(&self, snapshot: Bytes) -> Result<(), SyncError> {
        debug!(bytes = snapshot.len(), "No backend configured, skipping upload");
        Ok(())
    }

    async fn download(&self) -> Result<Option<Bytes>, SyncError> {
        Ok(None)
    }
}

/// Peer discovery fed from a channel; useful for tests and for wiring a
/// radio stack that reports peers through callbacks
pub struct ChannelDiscovery<L> {
    rx: mpsc::Receiver<DiscoveredPeer<L>>,
}

impl<L> ChannelDiscovery<L> {
    pub fn new(rx: mpsc::Receiver<DiscoveredPeer<L>>) -> Self {
        Self { rx }
    }
}

#[async_trait]
impl<L: PeerLink + 'static> PeerDiscovery for ChannelDiscovery<L> {
    type Link = L;

    async fn next_peer(&mut self) -> Option<DiscoveredPeer<L>> {
        self.rx.recv().await
    }
}

/// Spawns a session per discovered peer and runs the backend cycle
pub struct DiscoveryLoop<D, R, B> {
    discovery: D,
    reachability: R,
    backend: B,
    store: Arc<RecordStore>,
    config: DiscoveryConfig,
    sessions: HashMap<String, JoinHandle<SyncResult<()>>>,
    event_tx: broadcast::Sender<SyncEvent>,
}

impl<D, R, B> DiscoveryLoop<D, R, B>
where
    D: PeerDiscovery,
    R: Reachability,
    B: RemoteBackend,
{
    pub fn new(
        discovery: D,
        reachability: R,
        backend: B,
        store: Arc<RecordStore>,
        config: DiscoveryConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            discovery,
            reachability,
            backend,
            store,
            config,
            sessions: HashMap::new(),
            event_tx,
        }
    }

    /// Events from every session this loop starts
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_tx.subscribe()
    }

    /// Run until `cancel` fires, then cancel and await every session
    pub async fn run(mut self, cancel: CancellationToken) -> SyncResult<()> {
        info!(
            poll_interval = ?self.config.connectivity_poll_interval,
            "Discovery loop started"
        );
        let mut poll = tokio::time::interval(self.config.connectivity_poll_interval);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut discovering = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                peer = self.discovery.next_peer(), if discovering => match peer {
                    Some(peer) => self.open_session(peer, cancel.child_token()),
                    None => {
                        debug!("Peer discovery finished");
                        discovering = false;
                    }
                },
                _ = poll.tick() => {
                    self.reap_finished();
                    self.remote_cycle().await;
                }
            }
        }

        info!(sessions = self.sessions.len(), "Discovery loop stopping");
        let (peer_ids, handles): (Vec<String>, Vec<_>) = self.sessions.drain().unzip();
        let results = futures::future::join_all(handles).await;
        for (peer_id, result) in peer_ids.into_iter().zip(results) {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(%peer_id, error = %e, "Session ended with error"),
                Err(e) => warn!(%peer_id, error = %e, "Session task failed"),
            }
        }
        Ok(())
    }

    fn open_session(&mut self, peer: DiscoveredPeer<D::Link>, cancel: CancellationToken) {
        let peer_id = peer.link.peer_id().to_string();
        if let Some(handle) = self.sessions.get(&peer_id) {
            if !handle.is_finished() {
                debug!(%peer_id, "Session already running for peer");
                return;
            }
        }

        let session = match SyncSession::new(peer.link, self.store.clone(), &self.config.session)
        {
            Ok(session) => session.with_event_sender(self.event_tx.clone()),
            Err(e) => {
                warn!(%peer_id, error = %e, "Cannot open session");
                return;
            }
        };

        info!(%peer_id, "Opening sync session");
        let handle = tokio::spawn(session.run(peer.events, cancel));
        self.sessions.insert(peer_id, handle);
    }

    fn reap_finished(&mut self) {
        self.sessions.retain(|_, handle| !handle.is_finished());
    }

    /// One reachability check and, when online, one upload + download
    async fn remote_cycle(&self) {
        if !self.reachability.is_online().await {
            return;
        }

        let store = Arc::clone(&self.store);
        match store::join(tokio::task::spawn_blocking(move || store.current_file_bytes())).await {
            Ok(snapshot) => {
                if let Err(e) = self.backend.upload(snapshot).await {
                    warn!(error = %e, "Upload failed, retrying next cycle");
                }
            }
            Err(e) => warn!(error = %e, "Cannot snapshot store for upload"),
        }

        match self.backend.download().await {
            Ok(Some(table)) => {
                match store::join(self.store.merge_in_background(table)).await {
                    Ok(report) => info!(added = report.added, replaced = report.replaced, "Merged backend records"),
                    Err(e) => warn!(error = %e, "Backend records rejected"),
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Download failed, retrying next cycle"),
        }
    }
}
